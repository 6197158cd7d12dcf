mod memory;
mod snapshot;

use std::sync::Arc;

use thiserror::Error;

pub use memory::MemoryProvider;
pub use snapshot::{HistorySnapshot, InvariantViolation, SnapshotFingerprint};

use crate::model::{
    history::{Modification, PipelineInstance},
    material::MaterialIdentity,
    pipeline::PipelineName,
};

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("History of {subject} is unavailable: {reason}")]
    Unavailable { subject: String, reason: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Source of recorded history, most recent first.
///
/// Implementations may batch or cache their own storage calls. The resolver never writes through
/// this interface.
pub trait RevisionProvider {
    fn root_history(
        &self,
        material: &MaterialIdentity,
        limit: usize,
    ) -> Result<Vec<Modification>, ProviderError>;

    fn upstream_instances(
        &self,
        pipeline: &PipelineName,
        limit: usize,
    ) -> Result<Vec<PipelineInstance>, ProviderError>;
}

impl<P: RevisionProvider + ?Sized> RevisionProvider for &P {
    fn root_history(
        &self,
        material: &MaterialIdentity,
        limit: usize,
    ) -> Result<Vec<Modification>, ProviderError> {
        (**self).root_history(material, limit)
    }

    fn upstream_instances(
        &self,
        pipeline: &PipelineName,
        limit: usize,
    ) -> Result<Vec<PipelineInstance>, ProviderError> {
        (**self).upstream_instances(pipeline, limit)
    }
}

impl<P: RevisionProvider + ?Sized> RevisionProvider for Arc<P> {
    fn root_history(
        &self,
        material: &MaterialIdentity,
        limit: usize,
    ) -> Result<Vec<Modification>, ProviderError> {
        (**self).root_history(material, limit)
    }

    fn upstream_instances(
        &self,
        pipeline: &PipelineName,
        limit: usize,
    ) -> Result<Vec<PipelineInstance>, ProviderError> {
        (**self).upstream_instances(pipeline, limit)
    }
}
