mod builder;
mod registry;

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
};

pub use builder::{build, GraphBuilder, GraphError, PipelineLookup};
pub use registry::GraphRegistry;

use crate::{
    model::{
        history::Modification,
        material::{MaterialConfig, MaterialIdentity},
        pipeline::PipelineName,
    },
    provider::HistorySnapshot,
};

/// Content-derived version of a fan-in graph; identical configuration yields an identical version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphVersion(String);

impl GraphVersion {
    pub(crate) fn new(digest: String) -> Self {
        GraphVersion(digest)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for GraphVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A directly polled material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootNode {
    pub identity: MaterialIdentity,
    pub material: MaterialConfig,
}

/// An upstream pipeline together with the keys of the nodes it depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyNode {
    pub identity: MaterialIdentity,
    pub material: MaterialConfig,
    pub pipeline: PipelineName,
    pub children: Vec<MaterialIdentity>,
    /// Every root material reachable through this pipeline.
    pub roots: BTreeSet<MaterialIdentity>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanInNode {
    Root(RootNode),
    Dependency(DependencyNode),
}

impl FanInNode {
    pub fn material(&self) -> &MaterialConfig {
        match self {
            FanInNode::Root(node) => &node.material,
            FanInNode::Dependency(node) => &node.material,
        }
    }

    pub fn roots(&self) -> BTreeSet<&MaterialIdentity> {
        match self {
            FanInNode::Root(node) => BTreeSet::from([&node.identity]),
            FanInNode::Dependency(node) => node.roots.iter().collect(),
        }
    }

    /// Number of history entries this node can be pointed at in `snapshot`.
    pub fn depth(&self, snapshot: &HistorySnapshot) -> usize {
        match self {
            FanInNode::Root(node) => snapshot.root_history(&node.identity).len(),
            FanInNode::Dependency(node) => snapshot.instances(&node.pipeline).len(),
        }
    }

    /// Modifications of `root` visible from this node at history position `pointer`.
    ///
    /// A root node sees its own modification at that position. A dependency node sees whatever its
    /// upstream instance at that position recorded as used.
    pub fn candidates<'s>(
        &self,
        snapshot: &'s HistorySnapshot,
        pointer: usize,
        root: &MaterialIdentity,
    ) -> &'s [Modification] {
        match self {
            FanInNode::Root(node) if &node.identity == root => snapshot
                .root_history(&node.identity)
                .get(pointer)
                .map(std::slice::from_ref)
                .unwrap_or_default(),
            FanInNode::Root(_) => &[],
            FanInNode::Dependency(node) => snapshot
                .instances(&node.pipeline)
                .get(pointer)
                .map(|instance| instance.revisions_of(root))
                .unwrap_or_default(),
        }
    }
}

/// Deduplicated dependency graph of one pipeline, stored as a flat map keyed by fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanInGraph {
    pipeline: PipelineName,
    top_level: Vec<MaterialIdentity>,
    nodes: BTreeMap<MaterialIdentity, FanInNode>,
    version: GraphVersion,
}

impl FanInGraph {
    pub(crate) fn new(
        pipeline: PipelineName,
        top_level: Vec<MaterialIdentity>,
        nodes: BTreeMap<MaterialIdentity, FanInNode>,
        version: GraphVersion,
    ) -> Self {
        FanInGraph {
            pipeline,
            top_level,
            nodes,
            version,
        }
    }

    pub fn pipeline(&self) -> &PipelineName {
        &self.pipeline
    }

    pub fn version(&self) -> &GraphVersion {
        &self.version
    }

    pub fn node(&self, identity: &MaterialIdentity) -> Option<&FanInNode> {
        self.nodes.get(identity)
    }

    /// Top-level dependency paths in declaration order.
    pub fn paths(&self) -> impl Iterator<Item = &FanInNode> {
        self.top_level.iter().filter_map(|key| self.nodes.get(key))
    }

    pub fn roots(&self) -> impl Iterator<Item = &RootNode> {
        self.nodes.values().filter_map(|node| match node {
            FanInNode::Root(root) => Some(root),
            FanInNode::Dependency(_) => None,
        })
    }

    pub fn upstream_pipelines(&self) -> impl Iterator<Item = &PipelineName> {
        self.nodes.values().filter_map(|node| match node {
            FanInNode::Dependency(dependency) => Some(&dependency.pipeline),
            FanInNode::Root(_) => None,
        })
    }

    /// Roots reached by more than one top-level path.
    pub fn shared_roots(&self) -> BTreeSet<&MaterialIdentity> {
        let mut seen = BTreeSet::new();
        let mut shared = BTreeSet::new();
        for path in self.paths() {
            for root in path.roots() {
                if !seen.insert(root) {
                    shared.insert(root);
                }
            }
        }
        shared
    }

    pub fn contains_material(&self, material: &MaterialIdentity) -> bool {
        matches!(self.nodes.get(material), Some(FanInNode::Root(_)))
    }

    pub fn contains_pipeline(&self, pipeline: &PipelineName) -> bool {
        self.upstream_pipelines().any(|upstream| upstream == pipeline)
    }

    /// Display name of a node, falling back to the abbreviated fingerprint.
    pub fn describe(&self, identity: &MaterialIdentity) -> String {
        self.nodes
            .get(identity)
            .map(|node| node.material().to_string())
            .unwrap_or_else(|| identity.short().to_owned())
    }
}

impl Display for FanInGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn write_node(
            graph: &FanInGraph,
            f: &mut std::fmt::Formatter<'_>,
            identity: &MaterialIdentity,
            depth: usize,
        ) -> std::fmt::Result {
            writeln!(
                f,
                "{:indent$}- {} [{}]",
                "",
                graph.describe(identity),
                identity.short(),
                indent = depth * 2
            )?;
            if let Some(FanInNode::Dependency(node)) = graph.nodes.get(identity) {
                for child in &node.children {
                    write_node(graph, f, child, depth + 1)?;
                }
            }
            Ok(())
        }

        writeln!(f, "{} ({})", self.pipeline, self.version)?;
        for identity in &self.top_level {
            write_node(self, f, identity, 1)?;
        }
        Ok(())
    }
}
