use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use dashmap::DashMap;
use log::{debug, error, info, warn};
use tokio::sync::RwLock;

use crate::{
    graph::{GraphError, PipelineLookup},
    model::{
        pipeline::PipelineName,
        resolved::{FailureReason, ResolutionResult},
    },
    provider::RevisionProvider,
    FanIn,
};

/// Consumer of resolution results, solely responsible for deciding whether to schedule a build.
pub trait SchedulingGate: Send + Sync {
    fn apply(&self, pipeline: &PipelineName, generation: u64, result: &ResolutionResult);
}

impl<G: SchedulingGate + ?Sized> SchedulingGate for Arc<G> {
    fn apply(&self, pipeline: &PipelineName, generation: u64, result: &ResolutionResult) {
        (**self).apply(pipeline, generation, result)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// The result was handed to the scheduling gate.
    Applied {
        generation: u64,
        result: ResolutionResult,
    },
    /// A newer evaluation was requested while this one ran; its result was discarded.
    Superseded { generation: u64 },
    /// The pipeline is already being evaluated.
    AlreadyRunning,
}

/// Marks a pipeline as being evaluated until dropped.
struct InFlight {
    running: Arc<DashMap<PipelineName, ()>>,
    pipeline: PipelineName,
}

impl InFlight {
    fn acquire(running: &Arc<DashMap<PipelineName, ()>>, pipeline: &PipelineName) -> Option<Self> {
        match running.insert(pipeline.clone(), ()) {
            Some(()) => None,
            None => Some(InFlight {
                running: Arc::clone(running),
                pipeline: pipeline.clone(),
            }),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.running.remove(&self.pipeline);
    }
}

/// Runs scheduling evaluations of many pipelines concurrently, at most one per pipeline.
///
/// Every evaluation is tagged with a per-pipeline generation number and only the latest
/// generation's result reaches the [`SchedulingGate`].
pub struct Coordinator<L, P, G> {
    fanin: Arc<FanIn>,
    lookup: RwLock<Arc<L>>,
    provider: Arc<P>,
    gate: G,
    running: Arc<DashMap<PipelineName, ()>>,
    generations: DashMap<PipelineName, u64>,
}

impl<L, P, G> Coordinator<L, P, G>
where
    L: PipelineLookup + Send + Sync + 'static,
    P: RevisionProvider + Send + Sync + 'static,
    G: SchedulingGate,
{
    pub fn new(fanin: Arc<FanIn>, lookup: L, provider: Arc<P>, gate: G) -> Self {
        Coordinator {
            fanin,
            lookup: RwLock::new(Arc::new(lookup)),
            provider,
            gate,
            running: Arc::new(DashMap::new()),
            generations: DashMap::new(),
        }
    }

    pub fn fanin(&self) -> &Arc<FanIn> {
        &self.fanin
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// Evaluates `pipeline` once. Configuration errors are returned before anything is scheduled.
    pub async fn evaluate(&self, pipeline: &PipelineName) -> Result<Evaluation, GraphError> {
        let Some(in_flight) = InFlight::acquire(&self.running, pipeline) else {
            debug!("Evaluation of {} is already running", pipeline);
            return Ok(Evaluation::AlreadyRunning);
        };
        let generation = self.supersede(pipeline);

        let lookup = Arc::clone(&*self.lookup.read().await);
        let graph = self.fanin.graph(lookup.as_ref(), pipeline)?;

        // A timed out resolution keeps the pipeline marked until its thread has stopped.
        let in_flight = Arc::new(in_flight);
        let cancel = Arc::new(AtomicBool::new(false));
        let task = {
            let fanin = Arc::clone(&self.fanin);
            let provider = Arc::clone(&self.provider);
            let cancel = Arc::clone(&cancel);
            let in_flight = Arc::clone(&in_flight);
            tokio::task::spawn_blocking(move || {
                let _in_flight = in_flight;
                fanin.resolve_with(&graph, provider.as_ref(), &cancel)
            })
        };

        let joined = match self.fanin.settings().timeout {
            Some(budget) => match tokio::time::timeout(budget, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    cancel.store(true, Ordering::Relaxed);
                    warn!("Resolution of {} timed out after {:?}", pipeline, budget);
                    Ok(ResolutionResult::timeout(budget))
                }
            },
            None => task.await,
        };
        let result = joined.unwrap_or_else(|err| {
            error!("Resolution of {} failed: {}", pipeline, err);
            ResolutionResult::failure(FailureReason::Internal, err.to_string())
        });

        if self.generation(pipeline) != generation {
            debug!(
                "Discarding result of {} generation {}, superseded",
                pipeline, generation
            );
            return Ok(Evaluation::Superseded { generation });
        }
        match &result {
            ResolutionResult::Success(resolution) => info!(
                "Resolved {} generation {} to {} revision(s)",
                pipeline,
                generation,
                resolution.revisions.len()
            ),
            ResolutionResult::Failure { reason, .. } if reason.is_retryable() => debug!(
                "Resolution of {} generation {} failed: {}",
                pipeline, generation, result
            ),
            ResolutionResult::Failure { .. } => error!(
                "Resolution of {} generation {} failed: {}",
                pipeline, generation, result
            ),
        }
        self.gate.apply(pipeline, generation, &result);
        Ok(Evaluation::Applied { generation, result })
    }

    /// Starts a new generation of `pipeline`, so any evaluation in flight is discarded.
    pub fn supersede(&self, pipeline: &PipelineName) -> u64 {
        let mut generation = self.generations.entry(pipeline.clone()).or_insert(0);
        *generation += 1;
        *generation
    }

    pub fn generation(&self, pipeline: &PipelineName) -> u64 {
        self.generations
            .get(pipeline)
            .map(|generation| *generation)
            .unwrap_or_default()
    }

    /// Swaps the configuration, rebuilding graphs on next use and discarding evaluations in flight.
    pub async fn reload(&self, lookup: L) {
        let mut current = self.lookup.write().await;
        *current = Arc::new(lookup);
        self.fanin.config_changed();
        for mut generation in self.generations.iter_mut() {
            *generation += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        sync::Mutex,
        thread,
        time::Duration,
    };

    use crate::{
        model::{
            history::{Modification, PipelineInstance},
            material::{MaterialConfig, MaterialIdentity},
            pipeline::PipelineConfig,
        },
        provider::{MemoryProvider, ProviderError},
    };

    use super::*;

    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct RecordingGate {
        applied: Mutex<Vec<(PipelineName, u64, ResolutionResult)>>,
    }

    impl SchedulingGate for RecordingGate {
        fn apply(&self, pipeline: &PipelineName, generation: u64, result: &ResolutionResult) {
            self.applied
                .lock()
                .unwrap()
                .push((pipeline.clone(), generation, result.clone()));
        }
    }

    /// Answers like the wrapped provider, only slower.
    struct SlowProvider {
        inner: MemoryProvider,
        delay: Duration,
    }

    impl RevisionProvider for SlowProvider {
        fn root_history(
            &self,
            material: &MaterialIdentity,
            limit: usize,
        ) -> Result<Vec<Modification>, ProviderError> {
            thread::sleep(self.delay);
            self.inner.root_history(material, limit)
        }

        fn upstream_instances(
            &self,
            pipeline: &PipelineName,
            limit: usize,
        ) -> Result<Vec<PipelineInstance>, ProviderError> {
            thread::sleep(self.delay);
            self.inner.upstream_instances(pipeline, limit)
        }
    }

    fn m() -> MaterialConfig {
        MaterialConfig::git("https://example.com/m", None)
    }

    fn n() -> MaterialConfig {
        MaterialConfig::git("https://example.com/n", None)
    }

    fn lookup(materials: Vec<MaterialConfig>) -> BTreeMap<PipelineName, PipelineConfig> {
        BTreeMap::from([(
            PipelineName::from("p"),
            PipelineConfig::new("p", materials),
        )])
    }

    fn provider(delay: Duration) -> Arc<SlowProvider> {
        let inner = MemoryProvider::new();
        inner.record_modification(m().fingerprint().unwrap(), Modification::new("m1", 1));
        inner.record_modification(n().fingerprint().unwrap(), Modification::new("n1", 1));
        Arc::new(SlowProvider { inner, delay })
    }

    fn coordinator(
        fanin: FanIn,
        delay: Duration,
    ) -> Coordinator<BTreeMap<PipelineName, PipelineConfig>, SlowProvider, Arc<RecordingGate>> {
        Coordinator::new(
            Arc::new(fanin),
            lookup(vec![m()]),
            provider(delay),
            Arc::new(RecordingGate::default()),
        )
    }

    #[tokio::test]
    async fn applies_latest_result() {
        let coordinator = coordinator(FanIn::builder().try_build().unwrap(), Duration::ZERO);
        let p = PipelineName::from("p");

        let evaluation = coordinator.evaluate(&p).await.unwrap();
        let Evaluation::Applied { generation, result } = evaluation else {
            panic!("unexpected evaluation {:?}", evaluation);
        };
        assert_eq!(generation, 1);
        assert!(result.is_success());

        let applied = coordinator.gate.applied.lock().unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].1, 1);
    }

    #[tokio::test]
    async fn overlapping_evaluations_are_deduplicated() {
        let coordinator = coordinator(
            FanIn::builder().try_build().unwrap(),
            Duration::from_millis(300),
        );
        let p = PipelineName::from("p");

        let (first, second) = tokio::join!(coordinator.evaluate(&p), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            coordinator.evaluate(&p).await
        });
        assert!(matches!(first.unwrap(), Evaluation::Applied { .. }));
        assert_eq!(second.unwrap(), Evaluation::AlreadyRunning);
    }

    #[tokio::test]
    async fn superseded_results_are_discarded() {
        let coordinator = coordinator(
            FanIn::builder().try_build().unwrap(),
            Duration::from_millis(300),
        );
        let p = PipelineName::from("p");

        let (first, newer) = tokio::join!(coordinator.evaluate(&p), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            coordinator.supersede(&p)
        });
        assert_eq!(first.unwrap(), Evaluation::Superseded { generation: 1 });
        assert_eq!(newer, 2);
        assert!(coordinator.gate.applied.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn timeout_is_reported_and_not_cached() {
        let fanin = FanIn::builder()
            .timeout(Duration::from_millis(50))
            .try_build()
            .unwrap();
        let coordinator = coordinator(fanin, Duration::from_millis(300));
        let p = PipelineName::from("p");

        let evaluation = coordinator.evaluate(&p).await.unwrap();
        let Evaluation::Applied { result, .. } = evaluation else {
            panic!("unexpected evaluation {:?}", evaluation);
        };
        assert_eq!(result.failure_reason(), Some(FailureReason::Timeout));
        assert!(coordinator.fanin().cache().is_empty());
    }

    #[tokio::test]
    async fn timed_out_resolution_stays_in_flight_until_it_stops() {
        let fanin = FanIn::builder()
            .timeout(Duration::from_millis(50))
            .try_build()
            .unwrap();
        let coordinator = coordinator(fanin, Duration::from_millis(300));
        let p = PipelineName::from("p");

        assert!(matches!(
            coordinator.evaluate(&p).await.unwrap(),
            Evaluation::Applied { .. }
        ));
        assert_eq!(coordinator.evaluate(&p).await.unwrap(), Evaluation::AlreadyRunning);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(matches!(
            coordinator.evaluate(&p).await.unwrap(),
            Evaluation::Applied { .. }
        ));
    }

    #[tokio::test]
    async fn reload_rebuilds_graphs() {
        let coordinator = coordinator(FanIn::builder().try_build().unwrap(), Duration::ZERO);
        let p = PipelineName::from("p");
        coordinator.evaluate(&p).await.unwrap();

        coordinator.reload(lookup(vec![m(), n()])).await;
        assert_eq!(coordinator.generation(&p), 2);

        let Evaluation::Applied { generation, result } = coordinator.evaluate(&p).await.unwrap()
        else {
            panic!("expected an applied evaluation");
        };
        assert_eq!(generation, 3);
        assert_eq!(result.resolution().unwrap().revisions.len(), 2);
    }

    #[tokio::test]
    async fn configuration_errors_surface() {
        let coordinator = coordinator(FanIn::builder().try_build().unwrap(), Duration::ZERO);
        let err = coordinator
            .evaluate(&PipelineName::from("unknown"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "UNKNOWN_MATERIAL");
    }
}
