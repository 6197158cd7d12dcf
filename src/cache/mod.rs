use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use dashmap::DashMap;
use log::{debug, trace};

use crate::{
    graph::{FanInGraph, GraphVersion},
    model::{material::MaterialIdentity, pipeline::PipelineName, resolved::Resolution},
    provider::SnapshotFingerprint,
};

type ResolutionKey = (GraphVersion, SnapshotFingerprint);

/// Outcome of the convergence test for one pointer assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Converged,
    Blocked {
        /// Top-level paths whose pointer may be advanced, in declaration order.
        paths: Vec<usize>,
        /// Roots without a common revision.
        conflicts: Vec<MaterialIdentity>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub result_hits: u64,
    pub result_misses: u64,
    pub verdict_hits: u64,
    pub verdict_misses: u64,
    pub invalidations: u64,
}

#[derive(Default)]
struct Counters {
    result_hits: AtomicU64,
    result_misses: AtomicU64,
    verdict_hits: AtomicU64,
    verdict_misses: AtomicU64,
    invalidations: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            result_hits: self.result_hits.load(Ordering::Relaxed),
            result_misses: self.result_misses.load(Ordering::Relaxed),
            verdict_hits: self.verdict_hits.load(Ordering::Relaxed),
            verdict_misses: self.verdict_misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

/// Root materials and upstream pipelines a graph version reads history from.
struct GraphInputs {
    materials: BTreeSet<MaterialIdentity>,
    pipelines: BTreeSet<PipelineName>,
}

impl GraphInputs {
    fn of(graph: &FanInGraph) -> Self {
        GraphInputs {
            materials: graph.roots().map(|root| root.identity.clone()).collect(),
            pipelines: graph.upstream_pipelines().cloned().collect(),
        }
    }
}

struct Timed<T> {
    value: T,
    stored: Instant,
}

impl<T> Timed<T> {
    fn new(value: T) -> Self {
        Timed {
            value,
            stored: Instant::now(),
        }
    }

    fn expired(&self, ttl: Duration) -> bool {
        self.stored.elapsed() >= ttl
    }
}

/// Verdicts of a single (graph version, snapshot) pair.
pub struct AssignmentVerdicts<'a> {
    verdicts: Arc<DashMap<Vec<usize>, Verdict>>,
    counters: &'a Counters,
}

impl<'a> AssignmentVerdicts<'a> {
    pub fn get(&self, pointers: &[usize]) -> Option<Verdict> {
        match self.verdicts.get(pointers) {
            Some(verdict) => {
                Counters::bump(&self.counters.verdict_hits);
                Some(verdict.clone())
            }
            None => {
                Counters::bump(&self.counters.verdict_misses);
                None
            }
        }
    }

    pub fn insert(&self, pointers: Vec<usize>, verdict: Verdict) {
        self.verdicts.insert(pointers, verdict);
    }

    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }
}

/// Memoizes convergence verdicts per pointer assignment and successful results per snapshot.
///
/// Every entry is keyed by graph version first, so entries of independent graphs never contend.
/// Failures are never stored.
pub struct CompatibilityCache {
    ttl: Duration,
    results: DashMap<ResolutionKey, Timed<Resolution>>,
    verdicts: DashMap<ResolutionKey, Timed<Arc<DashMap<Vec<usize>, Verdict>>>>,
    graphs: DashMap<GraphVersion, GraphInputs>,
    counters: Counters,
}

impl CompatibilityCache {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

    pub fn new(ttl: Duration) -> Self {
        CompatibilityCache {
            ttl,
            results: DashMap::new(),
            verdicts: DashMap::new(),
            graphs: DashMap::new(),
            counters: Counters::default(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn register(&self, graph: &FanInGraph) {
        if !self.graphs.contains_key(graph.version()) {
            self.graphs
                .entry(graph.version().clone())
                .or_insert_with(|| GraphInputs::of(graph));
        }
    }

    /// Returns the stored success for this graph and snapshot unless it outlived the TTL.
    pub fn result(
        &self,
        graph: &FanInGraph,
        snapshot: &SnapshotFingerprint,
    ) -> Option<Resolution> {
        let key = (graph.version().clone(), snapshot.clone());
        let cached = self
            .results
            .get(&key)
            .filter(|cached| !cached.expired(self.ttl))
            .map(|cached| cached.value.clone());
        match cached {
            Some(resolution) => {
                debug!("Cache hit for {} at {}", graph.pipeline(), snapshot_short(snapshot));
                Counters::bump(&self.counters.result_hits);
                Some(resolution)
            }
            None => {
                debug!("Cache miss for {} at {}", graph.pipeline(), snapshot_short(snapshot));
                Counters::bump(&self.counters.result_misses);
                self.results
                    .remove_if(&key, |_, cached| cached.expired(self.ttl));
                None
            }
        }
    }

    pub fn store_result(
        &self,
        graph: &FanInGraph,
        snapshot: &SnapshotFingerprint,
        resolution: Resolution,
    ) {
        self.register(graph);
        self.purge_expired();
        self.results.insert(
            (graph.version().clone(), snapshot.clone()),
            Timed::new(resolution),
        );
    }

    /// Verdict memo shared by every resolution of this graph over this snapshot.
    pub fn verdicts(
        &self,
        graph: &FanInGraph,
        snapshot: &SnapshotFingerprint,
    ) -> AssignmentVerdicts<'_> {
        self.register(graph);
        self.verdicts.retain(|_, cached| !cached.expired(self.ttl));
        let key = (graph.version().clone(), snapshot.clone());
        let mut entry = self
            .verdicts
            .entry(key)
            .or_insert_with(|| Timed::new(Arc::default()));
        if entry.expired(self.ttl) {
            *entry = Timed::new(Arc::default());
        }
        AssignmentVerdicts {
            verdicts: Arc::clone(&entry.value),
            counters: &self.counters,
        }
    }

    /// Forgets the verdicts of a resolution that ended without a result.
    pub fn discard_verdicts(&self, graph: &FanInGraph, snapshot: &SnapshotFingerprint) {
        let key = (graph.version().clone(), snapshot.clone());
        if let Some((_, cached)) = self.verdicts.remove(&key) {
            trace!(
                "Discarding {} verdict(s) of {} at {}",
                cached.value.len(),
                graph.pipeline(),
                snapshot_short(snapshot)
            );
        }
    }

    /// Drops every entry of graphs that read history from `material`.
    pub fn invalidate_material(&self, material: &MaterialIdentity) -> usize {
        let versions = self
            .graphs
            .iter()
            .filter(|inputs| inputs.materials.contains(material))
            .map(|inputs| inputs.key().clone())
            .collect::<Vec<_>>();
        trace!(
            "Modification of {} invalidates {} graph version(s)",
            material.short(),
            versions.len()
        );
        versions
            .iter()
            .map(|version| self.drop_entries(version))
            .sum()
    }

    /// Drops every entry of graphs that read instances of `pipeline`.
    pub fn invalidate_pipeline(&self, pipeline: &PipelineName) -> usize {
        let versions = self
            .graphs
            .iter()
            .filter(|inputs| inputs.pipelines.contains(pipeline))
            .map(|inputs| inputs.key().clone())
            .collect::<Vec<_>>();
        trace!(
            "Instance of {} invalidates {} graph version(s)",
            pipeline,
            versions.len()
        );
        versions
            .iter()
            .map(|version| self.drop_entries(version))
            .sum()
    }

    /// Forgets a graph version entirely, for when its graph was rebuilt.
    pub fn invalidate_graph(&self, version: &GraphVersion) -> usize {
        let dropped = self.drop_entries(version);
        self.graphs.remove(version);
        dropped
    }

    pub fn clear(&self) {
        self.results.clear();
        self.verdicts.clear();
        self.graphs.clear();
        Counters::bump(&self.counters.invalidations);
    }

    fn drop_entries(&self, version: &GraphVersion) -> usize {
        let before = self.results.len() + self.verdicts.len();
        self.results.retain(|(stored, _), _| stored != version);
        self.verdicts.retain(|(stored, _), _| stored != version);
        let dropped = before.saturating_sub(self.results.len() + self.verdicts.len());
        if dropped > 0 {
            debug!("Invalidated {} cache entries of graph {}", dropped, version);
        }
        Counters::bump(&self.counters.invalidations);
        dropped
    }

    fn purge_expired(&self) {
        self.results.retain(|_, cached| !cached.expired(self.ttl));
        self.verdicts.retain(|_, cached| !cached.expired(self.ttl));
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// Number of stored results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Number of (graph version, snapshot) pairs holding verdicts.
    pub fn verdict_sets(&self) -> usize {
        self.verdicts.len()
    }
}

impl Default for CompatibilityCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}

fn snapshot_short(snapshot: &SnapshotFingerprint) -> &str {
    let fingerprint = snapshot.as_str();
    &fingerprint[..fingerprint.len().min(12)]
}
