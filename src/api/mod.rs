use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::{debug, error};

use crate::{
    cache::CompatibilityCache,
    config::FaninConfig,
    graph::{FanInGraph, GraphError, GraphRegistry, PipelineLookup},
    model::{
        material::MaterialIdentity,
        pipeline::PipelineName,
        resolved::{FailureReason, ResolutionResult},
    },
    provider::{HistorySnapshot, ProviderError, RevisionProvider},
    resolver::Resolver,
};

mod builder;

pub use builder::FanInBuilder;

/// Entry point tying graphs, history and the compatibility cache together.
pub struct FanIn {
    config: FaninConfig,
    graphs: GraphRegistry,
    cache: Arc<CompatibilityCache>,
    resolver: Resolver,
}

impl FanIn {
    pub fn builder() -> FanInBuilder {
        FanInBuilder::default()
    }

    pub(crate) fn new(config: FaninConfig, cache: Arc<CompatibilityCache>) -> Self {
        let resolver = Resolver::new(&config, Arc::clone(&cache));
        FanIn {
            config,
            graphs: GraphRegistry::new(),
            cache,
            resolver,
        }
    }

    pub fn settings(&self) -> &FaninConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CompatibilityCache> {
        &self.cache
    }

    /// Graph of `pipeline` under the current configuration, built on first use.
    pub fn graph<L: PipelineLookup + ?Sized>(
        &self,
        lookup: &L,
        pipeline: &PipelineName,
    ) -> Result<Arc<FanInGraph>, GraphError> {
        self.graphs.get_or_build(lookup, pipeline)
    }

    /// Fetches as much history as the lookback window can reach.
    pub fn snapshot<P: RevisionProvider + ?Sized>(
        &self,
        graph: &FanInGraph,
        provider: &P,
    ) -> Result<HistorySnapshot, ProviderError> {
        HistorySnapshot::fetch(graph, provider, self.config.max_instances)
    }

    pub fn resolve(&self, graph: &FanInGraph, snapshot: &HistorySnapshot) -> ResolutionResult {
        self.resolver.resolve(graph, snapshot)
    }

    /// Fetches a snapshot and resolves over it. Provider failures are reported as internal
    /// failures of this attempt.
    pub fn resolve_with<P: RevisionProvider + ?Sized>(
        &self,
        graph: &FanInGraph,
        provider: &P,
        cancel: &AtomicBool,
    ) -> ResolutionResult {
        let snapshot = match self.snapshot(graph, provider) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error!("Failed to fetch history of {}: {}", graph.pipeline(), err);
                return ResolutionResult::failure(FailureReason::Internal, err.to_string());
            }
        };
        if cancel.load(Ordering::Relaxed) {
            return ResolutionResult::failure(FailureReason::Timeout, "resolution was cancelled");
        }
        self.resolver.resolve_cancellable(graph, &snapshot, cancel)
    }

    /// Builds or reuses the graph of `pipeline`, then resolves it over current history.
    pub fn resolve_pipeline<L, P>(
        &self,
        lookup: &L,
        provider: &P,
        pipeline: &PipelineName,
    ) -> Result<ResolutionResult, GraphError>
    where
        L: PipelineLookup + ?Sized,
        P: RevisionProvider + ?Sized,
    {
        let graph = self.graph(lookup, pipeline)?;
        Ok(self.resolve_with(&graph, provider, &AtomicBool::new(false)))
    }

    /// Forgets every graph and the cache entries of their versions. Returns the number of
    /// dropped cache entries.
    pub fn config_changed(&self) -> usize {
        let dropped = self
            .graphs
            .config_changed()
            .iter()
            .map(|graph| self.cache.invalidate_graph(graph.version()))
            .sum();
        debug!("Configuration reloaded, dropped {} cache entries", dropped);
        dropped
    }

    pub fn modification_recorded(&self, material: &MaterialIdentity) -> usize {
        self.cache.invalidate_material(material)
    }

    pub fn instance_recorded(&self, pipeline: &PipelineName) -> usize {
        self.cache.invalidate_pipeline(pipeline)
    }
}
