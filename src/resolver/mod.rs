mod search;

use std::{
    collections::BTreeMap,
    sync::{atomic::AtomicBool, Arc},
};

use log::{debug, error, trace, warn};

use crate::{
    cache::CompatibilityCache,
    config::FaninConfig,
    graph::{FanInGraph, FanInNode},
    model::{
        material::MaterialIdentity,
        pipeline::PipelineName,
        resolved::{FailureReason, Resolution, ResolutionResult, ResolvedRevisions},
    },
    provider::HistorySnapshot,
};

use self::search::{Outcome, Search};

/// Computes the newest mutually consistent revisions of a fan-in graph over a history snapshot.
///
/// Stateless apart from the shared [`CompatibilityCache`], so one resolver may serve many
/// pipelines concurrently.
#[derive(Clone)]
pub struct Resolver {
    max_instances: usize,
    enabled: bool,
    cache: Arc<CompatibilityCache>,
}

impl Resolver {
    pub fn new(config: &FaninConfig, cache: Arc<CompatibilityCache>) -> Self {
        Resolver {
            max_instances: config.max_instances,
            enabled: config.enabled,
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<CompatibilityCache> {
        &self.cache
    }

    pub fn resolve(&self, graph: &FanInGraph, snapshot: &HistorySnapshot) -> ResolutionResult {
        self.resolve_cancellable(graph, snapshot, &AtomicBool::new(false))
    }

    /// Like [`Resolver::resolve`], giving up as soon as `cancel` is set.
    pub fn resolve_cancellable(
        &self,
        graph: &FanInGraph,
        snapshot: &HistorySnapshot,
        cancel: &AtomicBool,
    ) -> ResolutionResult {
        if let Err(violation) = snapshot.validate() {
            error!(
                "Refusing to resolve {} over inconsistent history: {}",
                graph.pipeline(),
                violation
            );
            return ResolutionResult::failure(FailureReason::Internal, violation.to_string());
        }

        if let Some(resolution) = self.cache.result(graph, snapshot.fingerprint()) {
            return ResolutionResult::Success(resolution);
        }

        if let Some(failure) = preflight(graph, snapshot) {
            debug!("Cannot resolve {} yet: {}", graph.pipeline(), failure);
            return failure;
        }

        let search = Search::new(graph, snapshot, self.max_instances);
        if !self.enabled {
            return self.latest(graph, &search);
        }

        let verdicts = self.cache.verdicts(graph, snapshot.fingerprint());
        match search.run(&verdicts, cancel) {
            Outcome::Converged {
                pointers,
                backtracks,
            } => {
                let resolution = match build_resolution(graph, snapshot, &search, pointers, backtracks) {
                    Ok(resolution) => resolution,
                    Err(failure) => return failure,
                };
                trace!(
                    "Resolved {} at {:?} after {} backtrack(s)",
                    graph.pipeline(),
                    resolution.pointers,
                    backtracks
                );
                self.cache
                    .store_result(graph, snapshot.fingerprint(), resolution.clone());
                ResolutionResult::Success(resolution)
            }
            Outcome::Exhausted {
                conflicts,
                backtracks,
            } => {
                let detail = format!(
                    "no common revision of {} within {} instance(s) after {} backtrack(s)",
                    describe_all(graph, &conflicts),
                    self.max_instances,
                    backtracks
                );
                warn!("Fan-in of {} did not converge: {}", graph.pipeline(), detail);
                self.cache.discard_verdicts(graph, snapshot.fingerprint());
                ResolutionResult::failure(FailureReason::InsufficientHistory, detail)
            }
            Outcome::Cancelled => {
                debug!("Resolution of {} was cancelled", graph.pipeline());
                self.cache.discard_verdicts(graph, snapshot.fingerprint());
                ResolutionResult::failure(FailureReason::Timeout, "resolution was cancelled")
            }
        }
    }

    /// Latest entry of every path, used when fan-in resolution is switched off.
    fn latest(&self, graph: &FanInGraph, search: &Search<'_, '_>) -> ResolutionResult {
        warn!(
            "Fan-in resolution is disabled, {} uses the latest revision of every material",
            graph.pipeline()
        );
        let mut revisions = BTreeMap::new();
        for (root, newest) in search.latest() {
            match newest {
                Some(modification) => {
                    revisions.insert(root, modification);
                }
                None => {
                    return ResolutionResult::failure(
                        FailureReason::InsufficientHistory,
                        format!(
                            "no revision of {} is visible at the latest position",
                            graph.describe(&root)
                        ),
                    )
                }
            }
        }
        let pointers = vec![0; search.paths().len()];
        ResolutionResult::Success(Resolution {
            revisions: ResolvedRevisions::from_iter(revisions),
            upstream: upstream_counters(search.paths(), search.snapshot(), &pointers),
            pointers,
            backtracks: 0,
        })
    }
}

/// Reports the first path, in declaration order, without any history at all.
fn preflight(graph: &FanInGraph, snapshot: &HistorySnapshot) -> Option<ResolutionResult> {
    graph.paths().find_map(|path| match path {
        FanInNode::Dependency(node) if snapshot.instances(&node.pipeline).is_empty() => {
            Some(ResolutionResult::failure(
                FailureReason::UpstreamNotBuilt,
                format!("pipeline {} has no recorded instances", node.pipeline),
            ))
        }
        FanInNode::Root(node) if snapshot.root_history(&node.identity).is_empty() => {
            Some(ResolutionResult::failure(
                FailureReason::NoModifications,
                format!("material {} has no recorded modifications", node.material),
            ))
        }
        _ => None,
    })
}

fn build_resolution(
    graph: &FanInGraph,
    snapshot: &HistorySnapshot,
    search: &Search<'_, '_>,
    pointers: Vec<usize>,
    backtracks: usize,
) -> Result<Resolution, ResolutionResult> {
    let mut revisions = BTreeMap::new();
    for (root, newest) in search.revisions(&pointers) {
        let Some(modification) = newest else {
            let detail = format!(
                "converged assignment {:?} has no agreed revision of {}",
                pointers,
                graph.describe(&root)
            );
            error!("{}", detail);
            return Err(ResolutionResult::failure(FailureReason::Internal, detail));
        };
        revisions.insert(root, modification);
    }
    Ok(Resolution {
        revisions: ResolvedRevisions::from_iter(revisions),
        upstream: upstream_counters(search.paths(), snapshot, &pointers),
        pointers,
        backtracks,
    })
}

fn upstream_counters(
    paths: &[&FanInNode],
    snapshot: &HistorySnapshot,
    pointers: &[usize],
) -> BTreeMap<PipelineName, u64> {
    paths
        .iter()
        .zip(pointers)
        .filter_map(|(path, &pointer)| match path {
            FanInNode::Dependency(node) => snapshot
                .instances(&node.pipeline)
                .get(pointer)
                .map(|instance| (node.pipeline.clone(), instance.counter)),
            FanInNode::Root(_) => None,
        })
        .collect()
}

fn describe_all(graph: &FanInGraph, materials: &[MaterialIdentity]) -> String {
    materials
        .iter()
        .map(|material| graph.describe(material))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::Ordering, time::Duration};

    use crate::{
        graph,
        model::{
            history::{Modification, PipelineInstance},
            material::MaterialConfig,
            pipeline::PipelineConfig,
        },
    };

    use super::*;

    use pretty_assertions::assert_eq;

    fn m() -> MaterialConfig {
        MaterialConfig::git("https://example.com/m", None)
    }

    fn n() -> MaterialConfig {
        MaterialConfig::git("https://example.com/n", None)
    }

    fn lookup(pipelines: Vec<PipelineConfig>) -> BTreeMap<PipelineName, PipelineConfig> {
        pipelines
            .into_iter()
            .map(|config| (config.name.clone(), config))
            .collect()
    }

    /// P depends on A and B, both of which build from M.
    fn diamond() -> FanInGraph {
        let lookup = lookup(vec![
            PipelineConfig::new("a", vec![m()]),
            PipelineConfig::new("b", vec![m()]),
            PipelineConfig::new(
                "p",
                vec![MaterialConfig::pipeline("a"), MaterialConfig::pipeline("b")],
            ),
        ]);
        graph::build(&lookup, &PipelineName::from("p")).unwrap()
    }

    /// Instances newest first, each having used M at the given sequence.
    fn runs(pipeline: &str, sequences: &[u64]) -> Vec<PipelineInstance> {
        sequences
            .iter()
            .enumerate()
            .map(|(index, &sequence)| {
                PipelineInstance::new(pipeline, (sequences.len() - index) as u64)
                    .with_revision(m().fingerprint().unwrap(), rev(sequence))
            })
            .collect()
    }

    fn rev(sequence: u64) -> Modification {
        Modification::new(format!("m{}", sequence), sequence)
    }

    fn diamond_history(a: &[u64], b: &[u64]) -> HistorySnapshot {
        HistorySnapshot::empty()
            .with_instances(PipelineName::from("a"), runs("a", a))
            .with_instances(PipelineName::from("b"), runs("b", b))
    }

    fn resolver(max_instances: usize) -> Resolver {
        Resolver::new(
            &FaninConfig {
                max_instances,
                ..FaninConfig::default()
            },
            Arc::new(CompatibilityCache::default()),
        )
    }

    fn revisions(result: &ResolutionResult) -> Vec<(MaterialIdentity, Modification)> {
        result
            .resolution()
            .unwrap()
            .revisions
            .iter()
            .map(|(material, modification)| (material.clone(), modification.clone()))
            .collect()
    }

    #[test]
    fn no_fan_in_takes_latest_everywhere() {
        let lookup = lookup(vec![
            PipelineConfig::new("a", vec![m()]),
            PipelineConfig::new("p", vec![MaterialConfig::pipeline("a"), n()]),
        ]);
        let graph = graph::build(&lookup, &PipelineName::from("p")).unwrap();
        let snapshot = HistorySnapshot::empty()
            .with_instances(PipelineName::from("a"), runs("a", &[4, 2]))
            .with_root_history(
                n().fingerprint().unwrap(),
                vec![Modification::new("n2", 2), Modification::new("n1", 1)],
            );

        let result = resolver(100).resolve(&graph, &snapshot);
        let resolution = result.resolution().unwrap();
        assert_eq!(resolution.pointers, vec![0, 0]);
        assert_eq!(resolution.backtracks, 0);
        assert_eq!(resolution.upstream, BTreeMap::from([(PipelineName::from("a"), 2)]));
        let mut expected = vec![
            (m().fingerprint().unwrap(), rev(4)),
            (n().fingerprint().unwrap(), Modification::new("n2", 2)),
        ];
        expected.sort();
        assert_eq!(revisions(&result), expected);
    }

    #[test]
    fn diamond_converges_immediately() {
        let result = resolver(100).resolve(&diamond(), &diamond_history(&[5, 4], &[5, 3]));
        let resolution = result.resolution().unwrap();
        assert_eq!(resolution.pointers, vec![0, 0]);
        assert_eq!(resolution.backtracks, 0);
        assert_eq!(revisions(&result), vec![(m().fingerprint().unwrap(), rev(5))]);
    }

    #[test]
    fn diamond_backtracks_once() {
        let result = resolver(100).resolve(&diamond(), &diamond_history(&[5, 3], &[3, 2]));
        let resolution = result.resolution().unwrap();
        assert_eq!(resolution.pointers, vec![1, 0]);
        assert_eq!(resolution.backtracks, 1);
        assert_eq!(
            resolution.upstream,
            BTreeMap::from([(PipelineName::from("a"), 1), (PipelineName::from("b"), 2)])
        );
        assert_eq!(revisions(&result), vec![(m().fingerprint().unwrap(), rev(3))]);
    }

    /// Instance of `pipeline` that used each material at the given sequence.
    fn instance(pipeline: &str, counter: u64, used: &[(&MaterialConfig, u64)]) -> PipelineInstance {
        used.iter()
            .fold(PipelineInstance::new(pipeline, counter), |instance, (material, sequence)| {
                instance.with_revision(material.fingerprint().unwrap(), modification(*sequence))
            })
    }

    fn modification(sequence: u64) -> Modification {
        Modification::new(format!("r{}", sequence), sequence)
    }

    /// P depends on A and B, both of which build from M and N.
    fn double_diamond() -> FanInGraph {
        let lookup = lookup(vec![
            PipelineConfig::new("a", vec![m(), n()]),
            PipelineConfig::new("b", vec![m(), n()]),
            PipelineConfig::new(
                "p",
                vec![MaterialConfig::pipeline("a"), MaterialConfig::pipeline("b")],
            ),
        ]);
        graph::build(&lookup, &PipelineName::from("p")).unwrap()
    }

    #[test]
    fn equally_fresh_assignments_prefer_leftmost_path() {
        // M blocks on A and N blocks on B. Both [1, 0] and [0, 1] converge; the first declared
        // path moves.
        let (m, n) = (m(), n());
        let snapshot = HistorySnapshot::empty()
            .with_instances(
                PipelineName::from("a"),
                vec![
                    instance("a", 2, &[(&m, 6), (&n, 5)]),
                    instance("a", 1, &[(&m, 5), (&n, 6)]),
                ],
            )
            .with_instances(
                PipelineName::from("b"),
                vec![
                    instance("b", 2, &[(&m, 5), (&n, 6)]),
                    instance("b", 1, &[(&m, 6), (&n, 5)]),
                ],
            );
        let result = resolver(100).resolve(&double_diamond(), &snapshot);
        assert_eq!(result.resolution().unwrap().pointers, vec![1, 0]);
        let mut expected = vec![
            (m.fingerprint().unwrap(), modification(5)),
            (n.fingerprint().unwrap(), modification(6)),
        ];
        expected.sort();
        assert_eq!(revisions(&result), expected);
    }

    #[test]
    fn diamonds_on_the_same_pipelines_converge_together() {
        let (m, n) = (m(), n());
        let snapshot = HistorySnapshot::empty()
            .with_instances(
                PipelineName::from("a"),
                vec![
                    instance("a", 3, &[(&m, 4), (&n, 3)]),
                    instance("a", 2, &[(&m, 3), (&n, 3)]),
                    instance("a", 1, &[(&m, 3), (&n, 2)]),
                ],
            )
            .with_instances(
                PipelineName::from("b"),
                vec![
                    instance("b", 2, &[(&m, 3), (&n, 4)]),
                    instance("b", 1, &[(&m, 3), (&n, 3)]),
                ],
            );
        let result = resolver(100).resolve(&double_diamond(), &snapshot);
        let resolution = result.resolution().unwrap();
        assert_eq!(resolution.pointers, vec![1, 1]);
        assert_eq!(resolution.backtracks, 3);
        assert_eq!(
            resolution.upstream,
            BTreeMap::from([(PipelineName::from("a"), 2), (PipelineName::from("b"), 1)])
        );
        let mut expected = vec![
            (m.fingerprint().unwrap(), modification(3)),
            (n.fingerprint().unwrap(), modification(3)),
        ];
        expected.sort();
        assert_eq!(revisions(&result), expected);
    }

    #[test]
    fn three_way_diamond_converges() {
        let lookup = lookup(vec![
            PipelineConfig::new("a", vec![m()]),
            PipelineConfig::new("b", vec![m()]),
            PipelineConfig::new("c", vec![m()]),
            PipelineConfig::new(
                "p",
                vec![
                    MaterialConfig::pipeline("a"),
                    MaterialConfig::pipeline("b"),
                    MaterialConfig::pipeline("c"),
                ],
            ),
        ]);
        let graph = graph::build(&lookup, &PipelineName::from("p")).unwrap();
        let snapshot = HistorySnapshot::empty()
            .with_instances(PipelineName::from("a"), runs("a", &[6, 4, 3]))
            .with_instances(PipelineName::from("b"), runs("b", &[5, 3]))
            .with_instances(PipelineName::from("c"), runs("c", &[4, 3]));

        let result = resolver(100).resolve(&graph, &snapshot);
        let resolution = result.resolution().unwrap();
        assert_eq!(resolution.pointers, vec![2, 1, 1]);
        assert_eq!(resolution.backtracks, 5);
        assert_eq!(revisions(&result), vec![(m().fingerprint().unwrap(), rev(3))]);
    }

    #[test]
    fn diverged_paths_give_up_within_the_window() {
        let lookup = lookup(vec![
            PipelineConfig::new("a", vec![m()]),
            PipelineConfig::new("b", vec![m()]),
            PipelineConfig::new("c", vec![m()]),
            PipelineConfig::new(
                "p",
                vec![
                    MaterialConfig::pipeline("a"),
                    MaterialConfig::pipeline("b"),
                    MaterialConfig::pipeline("c"),
                ],
            ),
        ]);
        let graph = graph::build(&lookup, &PipelineName::from("p")).unwrap();
        // No two pipelines ever built the same revision of M.
        let sequences = |offset: u64| (0..100).rev().map(|k| 3 * k + offset).collect::<Vec<_>>();
        let snapshot = HistorySnapshot::empty()
            .with_instances(PipelineName::from("a"), runs("a", &sequences(3)))
            .with_instances(PipelineName::from("b"), runs("b", &sequences(2)))
            .with_instances(PipelineName::from("c"), runs("c", &sequences(1)));
        let cache = Arc::new(CompatibilityCache::default());
        let resolver = Resolver::new(&FaninConfig::default(), Arc::clone(&cache));

        let result = resolver.resolve(&graph, &snapshot);
        assert_eq!(
            result.failure_reason(),
            Some(FailureReason::InsufficientHistory)
        );
        assert!(cache.stats().verdict_misses <= 300);
        assert_eq!(cache.verdict_sets(), 0);
    }

    #[test]
    fn triangle_with_package_material() {
        let package = MaterialConfig::package("repo", "lib");
        let lookup = lookup(vec![
            PipelineConfig::new("a", vec![package.clone()]),
            PipelineConfig::new("p", vec![MaterialConfig::pipeline("a"), package.clone()]),
        ]);
        let graph = graph::build(&lookup, &PipelineName::from("p")).unwrap();
        let snapshot = HistorySnapshot::empty()
            .with_instances(
                PipelineName::from("a"),
                vec![
                    instance("a", 2, &[(&package, 5)]),
                    instance("a", 1, &[(&package, 4)]),
                ],
            )
            .with_root_history(
                package.fingerprint().unwrap(),
                vec![modification(6), modification(5), modification(4)],
            );

        let result = resolver(100).resolve(&graph, &snapshot);
        let resolution = result.resolution().unwrap();
        assert_eq!(resolution.pointers, vec![0, 1]);
        assert_eq!(resolution.upstream, BTreeMap::from([(PipelineName::from("a"), 2)]));
        assert_eq!(
            revisions(&result),
            vec![(package.fingerprint().unwrap(), modification(5))]
        );
    }

    #[test]
    fn diamond_of_package_material() {
        let package = MaterialConfig::package("repo", "lib");
        let lookup = lookup(vec![
            PipelineConfig::new("a", vec![package.clone()]),
            PipelineConfig::new("b", vec![package.clone()]),
            PipelineConfig::new(
                "p",
                vec![MaterialConfig::pipeline("a"), MaterialConfig::pipeline("b")],
            ),
        ]);
        let graph = graph::build(&lookup, &PipelineName::from("p")).unwrap();
        let snapshot = HistorySnapshot::empty()
            .with_instances(
                PipelineName::from("a"),
                vec![
                    instance("a", 2, &[(&package, 3)]),
                    instance("a", 1, &[(&package, 2)]),
                ],
            )
            .with_instances(PipelineName::from("b"), vec![instance("b", 1, &[(&package, 2)])]);

        let result = resolver(100).resolve(&graph, &snapshot);
        assert_eq!(result.resolution().unwrap().pointers, vec![1, 0]);
        assert_eq!(
            revisions(&result),
            vec![(package.fingerprint().unwrap(), modification(2))]
        );
    }

    #[test]
    fn no_convergence_within_window() {
        let snapshot = diamond_history(&[9, 7, 5, 1], &[8, 6, 4, 1]);
        let result = resolver(3).resolve(&diamond(), &snapshot);
        assert_eq!(
            result.failure_reason(),
            Some(FailureReason::InsufficientHistory)
        );

        // The common revision is only reachable one step past the window.
        let result = resolver(4).resolve(&diamond(), &snapshot);
        assert_eq!(revisions(&result), vec![(m().fingerprint().unwrap(), rev(1))]);
    }

    #[test]
    fn resolution_is_deterministic() {
        let graph = diamond();
        let snapshot = diamond_history(&[9, 5, 4, 3], &[8, 4, 3, 2]);
        let first = resolver(100).resolve(&graph, &snapshot);
        for _ in 0..10 {
            assert_eq!(resolver(100).resolve(&graph, &snapshot), first);
        }
        assert_eq!(revisions(&first), vec![(m().fingerprint().unwrap(), rev(4))]);
    }

    #[test]
    fn single_path_without_recorded_revision_cannot_converge() {
        let lookup = lookup(vec![
            PipelineConfig::new("a", vec![m()]),
            PipelineConfig::new("p", vec![MaterialConfig::pipeline("a")]),
        ]);
        let graph = graph::build(&lookup, &PipelineName::from("p")).unwrap();
        let mut instances = runs("a", &[2]);
        instances.insert(0, PipelineInstance::new("a", 2));
        let snapshot = HistorySnapshot::empty().with_instances(PipelineName::from("a"), instances);

        let result = resolver(100).resolve(&graph, &snapshot);
        assert_eq!(result.resolution().unwrap().pointers, vec![1]);
    }

    #[test]
    fn ranges_resolve_to_newest_common_revision() {
        let mut a = PipelineInstance::new("a", 1);
        a.revisions_used
            .insert(m().fingerprint().unwrap(), vec![rev(4), rev(3), rev(2)]);
        let mut b = PipelineInstance::new("b", 1);
        b.revisions_used
            .insert(m().fingerprint().unwrap(), vec![rev(3), rev(2)]);
        let snapshot = HistorySnapshot::empty()
            .with_instances(PipelineName::from("a"), vec![a])
            .with_instances(PipelineName::from("b"), vec![b]);

        let result = resolver(100).resolve(&diamond(), &snapshot);
        assert_eq!(revisions(&result), vec![(m().fingerprint().unwrap(), rev(3))]);
    }

    #[test]
    fn cached_result_is_replaced_after_new_modification() {
        let cache = Arc::new(CompatibilityCache::default());
        let resolver = Resolver::new(&FaninConfig::default(), Arc::clone(&cache));
        let graph = diamond();
        let snapshot = diamond_history(&[5], &[5]);

        let first = resolver.resolve(&graph, &snapshot);
        assert_eq!(resolver.resolve(&graph, &snapshot), first);
        assert_eq!(cache.stats().result_hits, 1);

        // A new modification of M drops both the result and the verdicts of the old snapshot.
        assert_eq!(cache.invalidate_material(&m().fingerprint().unwrap()), 2);
        assert_eq!(resolver.resolve(&graph, &snapshot), first);
        assert_eq!(cache.stats().result_hits, 1);
        assert_eq!(cache.stats().result_misses, 2);

        let newer = diamond_history(&[6, 5], &[6, 5]);
        let second = resolver.resolve(&graph, &newer);
        assert_eq!(revisions(&second), vec![(m().fingerprint().unwrap(), rev(6))]);
    }

    #[test]
    fn upstream_without_instances_is_not_built() {
        let snapshot = HistorySnapshot::empty()
            .with_instances(PipelineName::from("a"), runs("a", &[1]));
        let result = resolver(100).resolve(&diamond(), &snapshot);
        assert_eq!(result.failure_reason(), Some(FailureReason::UpstreamNotBuilt));
    }

    #[test]
    fn root_without_modifications_is_reported() {
        let lookup = lookup(vec![PipelineConfig::new("p", vec![m(), n()])]);
        let graph = graph::build(&lookup, &PipelineName::from("p")).unwrap();
        let snapshot = HistorySnapshot::empty()
            .with_root_history(m().fingerprint().unwrap(), vec![rev(1)]);
        let result = resolver(100).resolve(&graph, &snapshot);
        assert_eq!(result.failure_reason(), Some(FailureReason::NoModifications));
    }

    #[test]
    fn inconsistent_history_is_internal_and_not_cached() {
        let cache = Arc::new(CompatibilityCache::default());
        let resolver = Resolver::new(&FaninConfig::default(), Arc::clone(&cache));
        let snapshot = diamond_history(&[5], &[5])
            .with_instances(PipelineName::from("b"), runs("a", &[5]));

        let result = resolver.resolve(&diamond(), &snapshot);
        assert_eq!(result.failure_reason(), Some(FailureReason::Internal));
        assert!(cache.is_empty());
    }

    #[test]
    fn cached_result_never_masks_different_history() {
        let cache = Arc::new(CompatibilityCache::default());
        let resolver = Resolver::new(&FaninConfig::default(), Arc::clone(&cache));
        let graph = diamond();
        assert!(resolver
            .resolve(&graph, &diamond_history(&[5], &[5]))
            .is_success());

        let foreign = diamond_history(&[5], &[5])
            .with_instances(PipelineName::from("b"), runs("a", &[5]));
        assert_eq!(
            resolver.resolve(&graph, &foreign).failure_reason(),
            Some(FailureReason::Internal)
        );

        let retimed = HistorySnapshot::empty()
            .with_instances(
                PipelineName::from("a"),
                vec![PipelineInstance::new("a", 1)
                    .with_revision(m().fingerprint().unwrap(), rev(5).with_timestamp(99))],
            )
            .with_instances(
                PipelineName::from("b"),
                vec![PipelineInstance::new("b", 1)
                    .with_revision(m().fingerprint().unwrap(), rev(5).with_timestamp(99))],
            );
        assert_eq!(
            revisions(&resolver.resolve(&graph, &retimed)),
            vec![(m().fingerprint().unwrap(), rev(5).with_timestamp(99))]
        );
    }

    #[test]
    fn disabled_resolution_takes_newest_without_checking() {
        let resolver = Resolver::new(
            &FaninConfig {
                enabled: false,
                ..FaninConfig::default()
            },
            Arc::new(CompatibilityCache::default()),
        );
        let result = resolver.resolve(&diamond(), &diamond_history(&[5, 3], &[3, 2]));
        let resolution = result.resolution().unwrap();
        assert_eq!(resolution.pointers, vec![0, 0]);
        assert_eq!(revisions(&result), vec![(m().fingerprint().unwrap(), rev(5))]);
        assert!(resolver.cache().is_empty());
    }

    #[test]
    fn cancelled_search_times_out() {
        let cancel = AtomicBool::new(false);
        cancel.store(true, Ordering::Relaxed);
        let result = resolver(100).resolve_cancellable(
            &diamond(),
            &diamond_history(&[5], &[5]),
            &cancel,
        );
        assert_eq!(result.failure_reason(), Some(FailureReason::Timeout));
        assert_eq!(
            ResolutionResult::timeout(Duration::from_millis(5)).failure_reason(),
            Some(FailureReason::Timeout)
        );
    }
}
