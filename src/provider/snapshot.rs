use std::{collections::BTreeMap, fmt::Display};

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::{
    graph::{FanInGraph, FanInNode},
    model::{
        history::{Modification, PipelineInstance},
        material::MaterialIdentity,
        pipeline::PipelineName,
    },
};

use super::{ProviderError, RevisionProvider};

/// Content hash of a [`HistorySnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotFingerprint(String);

impl SnapshotFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SnapshotFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("History of material {material} is not ordered newest first: sequence {first} is listed before {second}")]
    UnorderedModifications {
        material: MaterialIdentity,
        first: u64,
        second: u64,
    },
    #[error("Instance {instance} was returned as history of pipeline {pipeline}")]
    ForeignInstance {
        pipeline: PipelineName,
        instance: String,
    },
    #[error("Instances of pipeline {pipeline} are not ordered newest first: counter {first} is listed before {second}")]
    UnorderedInstances {
        pipeline: PipelineName,
        first: u64,
        second: u64,
    },
}

/// Immutable, in-memory history of every top-level path of a graph.
///
/// Everything a resolution needs is fetched up front, so the search itself performs no I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySnapshot {
    roots: BTreeMap<MaterialIdentity, Vec<Modification>>,
    upstreams: BTreeMap<PipelineName, Vec<PipelineInstance>>,
    fingerprint: SnapshotFingerprint,
}

impl HistorySnapshot {
    pub fn new(
        roots: BTreeMap<MaterialIdentity, Vec<Modification>>,
        upstreams: BTreeMap<PipelineName, Vec<PipelineInstance>>,
    ) -> Self {
        let fingerprint = fingerprint(&roots, &upstreams);
        HistorySnapshot {
            roots,
            upstreams,
            fingerprint,
        }
    }

    pub fn empty() -> Self {
        Self::new(BTreeMap::new(), BTreeMap::new())
    }

    /// Pulls at most `limit` entries of history for every top-level path of `graph`.
    pub fn fetch<P: RevisionProvider + ?Sized>(
        graph: &FanInGraph,
        provider: &P,
        limit: usize,
    ) -> Result<Self, ProviderError> {
        let mut roots = BTreeMap::new();
        let mut upstreams = BTreeMap::new();
        for path in graph.paths() {
            match path {
                FanInNode::Root(node) => {
                    let history = provider.root_history(&node.identity, limit)?;
                    roots.insert(node.identity.clone(), history);
                }
                FanInNode::Dependency(node) => {
                    let instances = provider.upstream_instances(&node.pipeline, limit)?;
                    upstreams.insert(node.pipeline.clone(), instances);
                }
            }
        }
        Ok(Self::new(roots, upstreams))
    }

    pub fn with_root_history(
        mut self,
        material: MaterialIdentity,
        history: Vec<Modification>,
    ) -> Self {
        self.roots.insert(material, history);
        Self::new(self.roots, self.upstreams)
    }

    pub fn with_instances(mut self, pipeline: PipelineName, instances: Vec<PipelineInstance>) -> Self {
        self.upstreams.insert(pipeline, instances);
        Self::new(self.roots, self.upstreams)
    }

    pub fn root_history(&self, material: &MaterialIdentity) -> &[Modification] {
        self.roots
            .get(material)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn instances(&self, pipeline: &PipelineName) -> &[PipelineInstance] {
        self.upstreams
            .get(pipeline)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn fingerprint(&self) -> &SnapshotFingerprint {
        &self.fingerprint
    }

    /// Checks the ordering guarantees the search relies on.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        for (material, history) in &self.roots {
            if let Some(pair) = history
                .windows(2)
                .find(|pair| pair[0].sequence <= pair[1].sequence)
            {
                return Err(InvariantViolation::UnorderedModifications {
                    material: material.clone(),
                    first: pair[0].sequence,
                    second: pair[1].sequence,
                });
            }
        }
        for (pipeline, instances) in &self.upstreams {
            if let Some(instance) = instances
                .iter()
                .find(|instance| &instance.pipeline != pipeline)
            {
                return Err(InvariantViolation::ForeignInstance {
                    pipeline: pipeline.clone(),
                    instance: instance.to_string(),
                });
            }
            if let Some(pair) = instances
                .windows(2)
                .find(|pair| pair[0].counter <= pair[1].counter)
            {
                return Err(InvariantViolation::UnorderedInstances {
                    pipeline: pipeline.clone(),
                    first: pair[0].counter,
                    second: pair[1].counter,
                });
            }
        }
        Ok(())
    }
}

fn fingerprint(
    roots: &BTreeMap<MaterialIdentity, Vec<Modification>>,
    upstreams: &BTreeMap<PipelineName, Vec<PipelineInstance>>,
) -> SnapshotFingerprint {
    fn update_modifications(hasher: &mut Sha256, modifications: &[Modification]) {
        for modification in modifications {
            hasher.update(b"\0mod\0");
            hasher.update(modification.revision.as_bytes());
            hasher.update(modification.sequence.to_le_bytes());
            hasher.update(modification.timestamp.to_le_bytes());
        }
    }

    let mut hasher = Sha256::new();
    for (material, history) in roots {
        hasher.update(b"\0root\0");
        hasher.update(material.as_str().as_bytes());
        update_modifications(&mut hasher, history);
    }
    for (pipeline, instances) in upstreams {
        hasher.update(b"\0pipeline\0");
        hasher.update(pipeline.as_str().as_bytes());
        for instance in instances {
            hasher.update(b"\0instance\0");
            hasher.update(instance.pipeline.as_str().as_bytes());
            hasher.update(b"\0");
            hasher.update(instance.counter.to_le_bytes());
            for (material, modifications) in &instance.revisions_used {
                hasher.update(b"\0used\0");
                hasher.update(material.as_str().as_bytes());
                update_modifications(&mut hasher, modifications);
            }
        }
    }
    SnapshotFingerprint(hex::encode(hasher.finalize()))
}
