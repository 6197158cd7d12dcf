use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::bail;
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "fanin.toml";

/// Settings consumed by the resolver, the cache and the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaninConfig {
    /// Exclusive bound on every path's instance pointer, also the history fetch limit.
    pub max_instances: usize,
    pub cache_ttl: Duration,
    /// When false, every path resolves to its latest entry without a consistency check.
    pub enabled: bool,
    pub timeout: Option<Duration>,
}

impl FaninConfig {
    pub const DEFAULT_MAX_INSTANCES: usize = 100;
    pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

    /// Loads `fanin.toml` from the working directory if present, or the given file, which must
    /// exist. Environment variables prefixed with `FANIN_` take precedence.
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let raw_config = match file {
            Some(file) => RawConfig::load(file, true, None)?,
            None => RawConfig::load(&PathBuf::from(DEFAULT_CONFIG_FILE), false, None)?,
        };
        raw_config.into_config()
    }
}

impl Default for FaninConfig {
    fn default() -> Self {
        FaninConfig {
            max_instances: Self::DEFAULT_MAX_INSTANCES,
            cache_ttl: Self::DEFAULT_CACHE_TTL,
            enabled: true,
            timeout: None,
        }
    }
}

impl RawConfig {
    fn into_config(self) -> anyhow::Result<FaninConfig> {
        let max_instances = self
            .lookback
            .max_instances()
            .unwrap_or(FaninConfig::DEFAULT_MAX_INSTANCES);
        if max_instances == 0 {
            bail!("lookback.max-instances must be at least 1");
        }
        Ok(FaninConfig {
            max_instances,
            cache_ttl: self
                .cache
                .ttl
                .map(Duration::from_secs)
                .unwrap_or(FaninConfig::DEFAULT_CACHE_TTL),
            enabled: self.resolve.enabled.unwrap_or(true),
            timeout: self.resolve.timeout.map(Duration::from_secs),
        })
    }
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct RawConfig {
    #[serde(default)]
    lookback: LookbackConfig,
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    resolve: ResolveConfig,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct LookbackConfig {
    #[serde(rename = "max-instances")]
    max_instances: Option<usize>,
    /// Environment variables cannot spell `max-instances`.
    #[serde(rename = "max_instances")]
    max_instances_env: Option<usize>,
}

impl LookbackConfig {
    fn max_instances(&self) -> Option<usize> {
        self.max_instances_env.or(self.max_instances)
    }
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct CacheConfig {
    ttl: Option<u64>,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct ResolveConfig {
    enabled: Option<bool>,
    timeout: Option<u64>,
}

impl RawConfig {
    fn load(
        file: &Path,
        required: bool,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::new(&file.to_string_lossy(), FileFormat::Toml).required(required))
            .add_source(
                Environment::with_prefix("FANIN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()
    }
}
