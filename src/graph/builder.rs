use std::collections::{BTreeMap, BTreeSet};

use log::{debug, trace};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::model::{
    material::{MaterialConfig, MaterialError, MaterialIdentity},
    pipeline::{PipelineConfig, PipelineName},
};

use super::{DependencyNode, FanInGraph, FanInNode, GraphVersion, RootNode};

/// Source of pipeline configurations the builder walks through.
pub trait PipelineLookup {
    fn pipeline(&self, name: &PipelineName) -> Option<&PipelineConfig>;
}

impl<L: PipelineLookup + ?Sized> PipelineLookup for &L {
    fn pipeline(&self, name: &PipelineName) -> Option<&PipelineConfig> {
        (**self).pipeline(name)
    }
}

impl PipelineLookup for BTreeMap<PipelineName, PipelineConfig> {
    fn pipeline(&self, name: &PipelineName) -> Option<&PipelineConfig> {
        self.get(name)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GraphError {
    #[error("Cyclic pipeline dependency: {}", format_cycle(.cycle))]
    ConfigCycle { cycle: Vec<PipelineName> },
    #[error("Unknown pipeline {pipeline}{}", format_referrer(.referenced_by))]
    UnknownMaterial {
        pipeline: PipelineName,
        referenced_by: Option<PipelineName>,
    },
    #[error("Pipeline {pipeline} declares an invalid material: {source}")]
    InvalidMaterial {
        pipeline: PipelineName,
        #[source]
        source: MaterialError,
    },
}

impl GraphError {
    pub fn kind(&self) -> &'static str {
        match self {
            GraphError::ConfigCycle { .. } => "CONFIG_CYCLE",
            GraphError::UnknownMaterial { .. } => "UNKNOWN_MATERIAL",
            GraphError::InvalidMaterial { .. } => "INVALID_MATERIAL",
        }
    }
}

fn format_referrer(referenced_by: &Option<PipelineName>) -> String {
    referenced_by
        .as_ref()
        .map(|pipeline| format!(" referenced by {}", pipeline))
        .unwrap_or_default()
}

fn format_cycle(cycle: &[PipelineName]) -> String {
    cycle
        .iter()
        .map(PipelineName::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Depth-first walk over pipeline configurations producing a [`FanInGraph`].
///
/// Nodes are inserted once their expansion completes, so a pipeline that is still being expanded
/// can only be found on the recursion stack; meeting it there again is a cycle.
pub struct GraphBuilder<'a, L: ?Sized> {
    lookup: &'a L,
    nodes: BTreeMap<MaterialIdentity, FanInNode>,
    stack: Vec<PipelineName>,
}

impl<'a, L> GraphBuilder<'a, L>
where
    L: PipelineLookup + ?Sized,
{
    pub fn new(lookup: &'a L) -> Self {
        GraphBuilder {
            lookup,
            nodes: BTreeMap::new(),
            stack: Vec::new(),
        }
    }

    pub fn build(mut self, pipeline: &PipelineName) -> Result<FanInGraph, GraphError> {
        let lookup = self.lookup;
        let config = lookup
            .pipeline(pipeline)
            .ok_or_else(|| GraphError::UnknownMaterial {
                pipeline: pipeline.clone(),
                referenced_by: None,
            })?;

        self.stack.push(pipeline.clone());
        let top_level = self.expand(config)?;
        self.stack.pop();

        let version = graph_version(pipeline, &top_level, &self.nodes);
        debug!(
            "Built fan-in graph for {} with {} node(s), version {}",
            pipeline,
            self.nodes.len(),
            version
        );
        Ok(FanInGraph::new(
            pipeline.clone(),
            top_level,
            self.nodes,
            version,
        ))
    }

    /// Expands the declared materials of `config`, returning their keys in declaration order
    /// without duplicates.
    fn expand(&mut self, config: &'a PipelineConfig) -> Result<Vec<MaterialIdentity>, GraphError> {
        let mut keys: Vec<MaterialIdentity> = Vec::with_capacity(config.materials.len());
        for material in &config.materials {
            let identity = material
                .fingerprint()
                .map_err(|source| GraphError::InvalidMaterial {
                    pipeline: config.name.clone(),
                    source,
                })?;

            match material.upstream() {
                Some(upstream) => {
                    self.expand_upstream(&config.name, upstream, material, &identity)?
                }
                None => {
                    self.nodes.entry(identity.clone()).or_insert_with(|| {
                        trace!("Adding root {} [{}]", material, identity.short());
                        FanInNode::Root(RootNode {
                            identity: identity.clone(),
                            material: material.clone(),
                        })
                    });
                }
            }

            if !keys.contains(&identity) {
                keys.push(identity);
            }
        }
        Ok(keys)
    }

    fn expand_upstream(
        &mut self,
        downstream: &PipelineName,
        upstream: &PipelineName,
        material: &MaterialConfig,
        identity: &MaterialIdentity,
    ) -> Result<(), GraphError> {
        if let Some(position) = self.stack.iter().position(|name| name == upstream) {
            let mut cycle = self.stack[position..].to_vec();
            cycle.push(upstream.clone());
            return Err(GraphError::ConfigCycle { cycle });
        }
        if self.nodes.contains_key(identity) {
            trace!("Reusing dependency node for {}", upstream);
            return Ok(());
        }

        let lookup = self.lookup;
        let config = lookup
            .pipeline(upstream)
            .ok_or_else(|| GraphError::UnknownMaterial {
                pipeline: upstream.clone(),
                referenced_by: Some(downstream.clone()),
            })?;

        self.stack.push(upstream.clone());
        let children = self.expand(config)?;
        self.stack.pop();

        let roots = children
            .iter()
            .filter_map(|child| self.nodes.get(child))
            .flat_map(|child| child.roots().into_iter().cloned().collect::<Vec<_>>())
            .collect::<BTreeSet<_>>();

        trace!(
            "Adding dependency {} with {} child(ren) and {} root(s)",
            upstream,
            children.len(),
            roots.len()
        );
        self.nodes.insert(
            identity.clone(),
            FanInNode::Dependency(DependencyNode {
                identity: identity.clone(),
                material: material.clone(),
                pipeline: upstream.clone(),
                children,
                roots,
            }),
        );
        Ok(())
    }
}

/// Builds the fan-in graph of `pipeline`.
pub fn build<L: PipelineLookup + ?Sized>(
    lookup: &L,
    pipeline: &PipelineName,
) -> Result<FanInGraph, GraphError> {
    GraphBuilder::new(lookup).build(pipeline)
}

fn graph_version(
    pipeline: &PipelineName,
    top_level: &[MaterialIdentity],
    nodes: &BTreeMap<MaterialIdentity, FanInNode>,
) -> GraphVersion {
    let mut hasher = Sha256::new();
    hasher.update(pipeline.as_str().as_bytes());
    for key in top_level {
        hasher.update(b"\0top\0");
        hasher.update(key.as_str().as_bytes());
    }
    for (key, node) in nodes {
        hasher.update(b"\0node\0");
        hasher.update(key.as_str().as_bytes());
        if let FanInNode::Dependency(dependency) = node {
            for child in &dependency.children {
                hasher.update(b"\0edge\0");
                hasher.update(child.as_str().as_bytes());
            }
        }
    }
    let digest = hex::encode(hasher.finalize());
    GraphVersion::new(digest[..16].to_owned())
}
