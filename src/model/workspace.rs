use std::{collections::BTreeMap, path::Path};

use log::debug;
use serde::Deserialize;

use crate::{graph::PipelineLookup, provider::MemoryProvider};

use super::{
    history::{Modification, PipelineInstance},
    material::{MaterialConfig, MaterialIdentity},
    pipeline::{PipelineConfig, PipelineName},
    ParseError,
};

/// Pipeline configurations together with their recorded history, read from a TOML document:
///
/// ```toml
/// [materials.repo]
/// type = "git"
/// url = "https://example.com/repo"
///
/// [pipelines.build]
/// dependencies = [{ material = "repo" }]
///
/// [history.repo]
/// modifications = [{ revision = "a1", sequence = 1 }]
///
/// [[runs.build]]
/// counter = 1
/// revisions = { repo = ["a1"] }
/// ```
pub struct Workspace {
    pipelines: BTreeMap<PipelineName, PipelineConfig>,
    names: BTreeMap<MaterialIdentity, String>,
    provider: MemoryProvider,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawWorkspace {
    #[serde(default)]
    materials: BTreeMap<String, MaterialConfig>,
    #[serde(default)]
    pipelines: BTreeMap<String, RawPipeline>,
    #[serde(default)]
    history: BTreeMap<String, RawHistory>,
    #[serde(default)]
    runs: BTreeMap<String, Vec<RawRun>>,
}

#[derive(Debug, Deserialize)]
struct RawPipeline {
    #[serde(default)]
    dependencies: Vec<RawDependency>,
}

#[derive(Debug, Deserialize)]
struct RawDependency {
    material: Option<String>,
    pipeline: Option<String>,
    stage: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawHistory {
    #[serde(default)]
    modifications: Vec<Modification>,
}

#[derive(Debug, Deserialize)]
struct RawRun {
    counter: u64,
    #[serde(default)]
    revisions: BTreeMap<String, Vec<String>>,
}

impl Workspace {
    pub fn from_file(path: &Path) -> Result<Workspace, ParseError> {
        debug!("Loading workspace from {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Workspace::from_toml_str(&contents)
    }

    pub fn from_toml_str(data: &str) -> Result<Workspace, ParseError> {
        let raw = toml::from_str::<RawWorkspace>(data)?;

        let mut identities = BTreeMap::new();
        let mut names = BTreeMap::new();
        for (name, material) in &raw.materials {
            let identity = material
                .fingerprint()
                .map_err(|source| ParseError::InvalidMaterial {
                    name: name.clone(),
                    source,
                })?;
            names.insert(identity.clone(), name.clone());
            identities.insert(name.as_str(), identity);
        }

        let pipelines = raw
            .pipelines
            .iter()
            .map(|(name, pipeline)| {
                let materials = pipeline
                    .dependencies
                    .iter()
                    .map(|dependency| parse_dependency(name, dependency, &raw.materials))
                    .collect::<Result<Vec<_>, _>>()?;
                let config = PipelineConfig::new(name.as_str(), materials);
                Ok::<_, ParseError>((config.name.clone(), config))
            })
            .collect::<Result<BTreeMap<_, _>, ParseError>>()?;

        let provider = MemoryProvider::new();
        for (name, history) in &raw.history {
            let identity = identities
                .get(name.as_str())
                .ok_or_else(|| ParseError::UnknownHistory(name.clone()))?;
            for modification in &history.modifications {
                provider.record_modification(identity.clone(), modification.clone());
            }
        }

        for (pipeline, runs) in &raw.runs {
            if !raw.pipelines.contains_key(pipeline) {
                return Err(ParseError::UnknownHistory(pipeline.clone()));
            }
            for run in runs {
                let mut instance = PipelineInstance::new(pipeline.as_str(), run.counter);
                for (material, revisions) in &run.revisions {
                    let identity = identities.get(material.as_str()).ok_or_else(|| {
                        ParseError::UnknownMaterial {
                            name: material.clone(),
                            referenced_by: format!("run {}/{}", pipeline, run.counter),
                        }
                    })?;
                    let history = raw
                        .history
                        .get(material)
                        .map(|history| history.modifications.as_slice())
                        .unwrap_or_default();
                    let used = revisions
                        .iter()
                        .map(|revision| {
                            history
                                .iter()
                                .find(|modification| &modification.revision == revision)
                                .cloned()
                                .ok_or_else(|| ParseError::UnknownRevision {
                                    material: material.clone(),
                                    revision: revision.clone(),
                                })
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    instance = instance.with_revisions(identity.clone(), used);
                }
                provider.record_instance(instance);
            }
        }

        Ok(Workspace {
            pipelines,
            names,
            provider,
        })
    }

    pub fn provider(&self) -> &MemoryProvider {
        &self.provider
    }

    pub fn pipelines(&self) -> impl Iterator<Item = &PipelineConfig> {
        self.pipelines.values()
    }

    /// Name the material was declared under, or its abbreviated fingerprint.
    pub fn describe(&self, identity: &MaterialIdentity) -> String {
        self.names
            .get(identity)
            .cloned()
            .unwrap_or_else(|| identity.short().to_owned())
    }
}

impl PipelineLookup for Workspace {
    fn pipeline(&self, name: &PipelineName) -> Option<&PipelineConfig> {
        self.pipelines.get(name)
    }
}

fn parse_dependency(
    pipeline: &str,
    dependency: &RawDependency,
    materials: &BTreeMap<String, MaterialConfig>,
) -> Result<MaterialConfig, ParseError> {
    match (&dependency.material, &dependency.pipeline) {
        (Some(material), None) => {
            materials
                .get(material)
                .cloned()
                .ok_or_else(|| ParseError::UnknownMaterial {
                    name: material.clone(),
                    referenced_by: format!("pipeline {}", pipeline),
                })
        }
        (None, Some(upstream)) => Ok(MaterialConfig::Pipeline {
            pipeline: PipelineName::from(upstream.as_str()),
            stage: dependency.stage.clone(),
        }),
        (Some(material), Some(upstream)) => Err(ParseError::AmbiguousDependency {
            pipeline: pipeline.to_owned(),
            material: material.clone(),
            upstream: upstream.clone(),
        }),
        (None, None) => Err(ParseError::EmptyDependency {
            pipeline: pipeline.to_owned(),
        }),
    }
}
