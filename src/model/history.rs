use std::{cmp::Ordering, collections::BTreeMap, fmt::Display};

use serde::{Deserialize, Serialize};

use super::{material::MaterialIdentity, pipeline::PipelineName};

/// A single recorded revision of a root material.
///
/// `sequence` is the only ordering the resolver trusts; `timestamp` (seconds since the epoch) is
/// carried along for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Modification {
    pub revision: String,
    pub sequence: u64,
    #[serde(default)]
    pub timestamp: u64,
}

impl Modification {
    pub fn new(revision: impl Into<String>, sequence: u64) -> Self {
        Modification {
            revision: revision.into(),
            sequence,
            timestamp: 0,
        }
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Same revision of the same history, regardless of when each side observed it.
    pub fn same_revision(&self, other: &Modification) -> bool {
        self.sequence == other.sequence && self.revision == other.revision
    }
}

impl Ord for Modification {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sequence
            .cmp(&other.sequence)
            .then_with(|| self.revision.cmp(&other.revision))
            .then_with(|| self.timestamp.cmp(&other.timestamp))
    }
}

impl PartialOrd for Modification {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for Modification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.revision, self.sequence)
    }
}

/// One historical run of an upstream pipeline and the root revisions it was built from.
///
/// A material usually maps to a single modification. Several entries mean the run recorded a
/// range, any of which counts as used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineInstance {
    pub pipeline: PipelineName,
    pub counter: u64,
    pub revisions_used: BTreeMap<MaterialIdentity, Vec<Modification>>,
}

impl PipelineInstance {
    pub fn new(pipeline: impl Into<PipelineName>, counter: u64) -> Self {
        PipelineInstance {
            pipeline: pipeline.into(),
            counter,
            revisions_used: BTreeMap::new(),
        }
    }

    pub fn with_revision(mut self, material: MaterialIdentity, modification: Modification) -> Self {
        self.revisions_used
            .entry(material)
            .or_default()
            .push(modification);
        self
    }

    pub fn with_revisions(
        mut self,
        material: MaterialIdentity,
        modifications: impl IntoIterator<Item = Modification>,
    ) -> Self {
        self.revisions_used
            .entry(material)
            .or_default()
            .extend(modifications);
        self
    }

    pub fn revisions_of(&self, material: &MaterialIdentity) -> &[Modification] {
        self.revisions_used
            .get(material)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

impl Display for PipelineInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.pipeline, self.counter)
    }
}
