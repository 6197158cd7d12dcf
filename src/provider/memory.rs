use dashmap::DashMap;
use log::trace;

use crate::model::{
    history::{Modification, PipelineInstance},
    material::MaterialIdentity,
    pipeline::PipelineName,
};

use super::{ProviderError, RevisionProvider};

/// History held in memory, safe to record into while resolutions read from it.
#[derive(Default)]
pub struct MemoryProvider {
    modifications: DashMap<MaterialIdentity, Vec<Modification>>,
    instances: DashMap<PipelineName, Vec<PipelineInstance>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a modification, keeping the material's history ordered newest first.
    pub fn record_modification(&self, material: MaterialIdentity, modification: Modification) {
        trace!("Recording {} for {}", modification, material.short());
        let mut history = self.modifications.entry(material).or_default();
        history.retain(|existing| existing.sequence != modification.sequence);
        history.push(modification);
        history.sort_by(|a, b| b.sequence.cmp(&a.sequence));
    }

    /// Records a pipeline instance, keeping the pipeline's runs ordered newest first.
    pub fn record_instance(&self, instance: PipelineInstance) {
        trace!("Recording instance {}", instance);
        let mut instances = self.instances.entry(instance.pipeline.clone()).or_default();
        instances.retain(|existing| existing.counter != instance.counter);
        instances.push(instance);
        instances.sort_by(|a, b| b.counter.cmp(&a.counter));
    }

    pub fn latest_modification(&self, material: &MaterialIdentity) -> Option<Modification> {
        self.modifications
            .get(material)
            .and_then(|history| history.first().cloned())
    }
}

impl RevisionProvider for MemoryProvider {
    fn root_history(
        &self,
        material: &MaterialIdentity,
        limit: usize,
    ) -> Result<Vec<Modification>, ProviderError> {
        Ok(self
            .modifications
            .get(material)
            .map(|history| history.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    fn upstream_instances(
        &self,
        pipeline: &PipelineName,
        limit: usize,
    ) -> Result<Vec<PipelineInstance>, ProviderError> {
        Ok(self
            .instances
            .get(pipeline)
            .map(|instances| instances.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
