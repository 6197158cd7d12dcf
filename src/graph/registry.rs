use std::sync::Arc;

use dashmap::DashMap;
use log::debug;

use crate::model::pipeline::PipelineName;

use super::{builder::GraphBuilder, FanInGraph, GraphError, PipelineLookup};

/// Graphs built for the current configuration, one per pipeline.
#[derive(Default)]
pub struct GraphRegistry {
    graphs: DashMap<PipelineName, Arc<FanInGraph>>,
}

impl GraphRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pipeline: &PipelineName) -> Option<Arc<FanInGraph>> {
        self.graphs.get(pipeline).map(|graph| Arc::clone(&graph))
    }

    /// Returns the cached graph of `pipeline`, building it on first use.
    pub fn get_or_build<L: PipelineLookup + ?Sized>(
        &self,
        lookup: &L,
        pipeline: &PipelineName,
    ) -> Result<Arc<FanInGraph>, GraphError> {
        if let Some(graph) = self.get(pipeline) {
            return Ok(graph);
        }
        let graph = Arc::new(GraphBuilder::new(lookup).build(pipeline)?);
        // Two callers may race to build the same pipeline; whichever lands first wins.
        let graph = self
            .graphs
            .entry(pipeline.clone())
            .or_insert(graph)
            .value()
            .clone();
        Ok(graph)
    }

    /// Forgets every graph, returning the dropped ones so their cache entries can be invalidated.
    pub fn config_changed(&self) -> Vec<Arc<FanInGraph>> {
        let pipelines = self
            .graphs
            .iter()
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();
        let dropped = pipelines
            .iter()
            .filter_map(|pipeline| self.graphs.remove(pipeline).map(|(_, graph)| graph))
            .collect::<Vec<_>>();
        debug!("Configuration changed, dropped {} graph(s)", dropped.len());
        dropped
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }
}
