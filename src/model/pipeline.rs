use std::fmt::Display;

use serde::{Deserialize, Serialize};

use super::material::MaterialConfig;

#[derive(Clone, Hash, Deserialize, Serialize, Debug, PartialEq, Eq, Ord, PartialOrd)]
#[serde(transparent)]
pub struct PipelineName(String);

impl PipelineName {
    pub fn new(s: String) -> Self {
        PipelineName(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PipelineName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PipelineName {
    fn from(s: String) -> Self {
        PipelineName(s)
    }
}

impl From<&str> for PipelineName {
    fn from(s: &str) -> Self {
        PipelineName(s.to_string())
    }
}

/// The part of a pipeline's configuration the fan-in graph is built from: its dependency
/// materials, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub name: PipelineName,
    pub materials: Vec<MaterialConfig>,
}

impl PipelineConfig {
    pub fn new(name: impl Into<PipelineName>, materials: Vec<MaterialConfig>) -> Self {
        PipelineConfig {
            name: name.into(),
            materials,
        }
    }
}
