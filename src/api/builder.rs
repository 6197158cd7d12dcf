use std::{sync::Arc, time::Duration};

use anyhow::bail;

use crate::{cache::CompatibilityCache, config::FaninConfig, FanIn};

#[derive(Default)]
pub struct FanInBuilder {
    config: Option<FaninConfig>,
    max_instances: Option<usize>,
    cache_ttl: Option<Duration>,
    enabled: Option<bool>,
    timeout: Option<Duration>,
    cache: Option<Arc<CompatibilityCache>>,
}

impl FanInBuilder {
    /// Base settings, usually from [`FaninConfig::load`].
    ///
    /// Defaults to [`FaninConfig::default`]. Individual setters override it.
    pub fn config(mut self, config: FaninConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// How far back any path may be searched.
    ///
    /// Defaults to 100 instances.
    pub fn max_instances(mut self, max_instances: usize) -> Self {
        self.max_instances = Some(max_instances);
        self
    }

    /// Lifetime of cached results.
    ///
    /// Defaults to five minutes. Ignored when a cache is supplied.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Wall-clock budget of a single coordinated resolution.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Shares an existing cache instead of creating one.
    pub fn cache(mut self, cache: Arc<CompatibilityCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn try_build(self) -> anyhow::Result<FanIn> {
        let Self {
            config,
            max_instances,
            cache_ttl,
            enabled,
            timeout,
            cache,
        } = self;
        let mut config = config.unwrap_or_default();
        if let Some(max_instances) = max_instances {
            config.max_instances = max_instances;
        }
        if let Some(cache_ttl) = cache_ttl {
            config.cache_ttl = cache_ttl;
        }
        if let Some(enabled) = enabled {
            config.enabled = enabled;
        }
        if timeout.is_some() {
            config.timeout = timeout;
        }
        if config.max_instances == 0 {
            bail!("max_instances must be at least 1");
        }

        let cache = cache.unwrap_or_else(|| Arc::new(CompatibilityCache::new(config.cache_ttl)));

        Ok(FanIn::new(config, cache))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn setters_override_config() {
        let fanin = FanIn::builder()
            .config(FaninConfig {
                max_instances: 10,
                ..FaninConfig::default()
            })
            .enabled(false)
            .timeout(Duration::from_secs(2))
            .try_build()
            .unwrap();
        assert_eq!(
            fanin.settings(),
            &FaninConfig {
                max_instances: 10,
                enabled: false,
                timeout: Some(Duration::from_secs(2)),
                ..FaninConfig::default()
            }
        );
        assert_eq!(fanin.cache().ttl(), FaninConfig::DEFAULT_CACHE_TTL);
    }

    #[test]
    fn zero_window_is_rejected() {
        assert!(FanIn::builder().max_instances(0).try_build().is_err());
    }

    #[test]
    fn supplied_cache_is_shared() {
        let cache = Arc::new(CompatibilityCache::new(Duration::from_secs(1)));
        let fanin = FanIn::builder().cache(Arc::clone(&cache)).try_build().unwrap();
        assert!(Arc::ptr_eq(fanin.cache(), &cache));
    }
}
