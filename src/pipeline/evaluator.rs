//! Pipeline evaluation.
//!
//! `Dataset::evaluate(node, time)` walks upstream from `node`:
//!
//! 1. A cache hit resolves immediately.
//! 2. A request overlapping an in-flight computation of the same stage
//!    joins its future instead of starting another task.
//! 3. Otherwise the upstream stage is evaluated first and this stage runs
//!    when its input is ready, inline if the input is already there and on
//!    the node's [`RefTargetExecutor`] otherwise. Asynchronous stages compute
//!    on the worker pool and post their result back to the main context.
//!
//! Results are clamped to the validity of their inputs, merged into the
//! stage's cache and announced to dependents. Failures never escape a stage:
//! they turn into an error state carrying the last good data.

use crate::concurrent::{Promise, Task, TaskOutcome};
use crate::dataset::Dataset;
use crate::error::{CoreError, Result};
use crate::graph::{EventKind, TargetId};
use crate::pipeline::flow_state::PipelineFlowState;
use crate::pipeline::modifier::{ModifierNode, ModifierRequest, DISABLED_STATUS, ENABLED_PROPERTY};
use crate::pipeline::node::{PipelineNode, StageKind, MODIFIER_FIELD};
use crate::pipeline::source::SourceRequest;
use crate::pipeline::FlowFuture;
use crate::types::{PipelineStatus, StatusKind, TimeInterval, TimePoint};
use anyhow::anyhow;
use std::panic::{catch_unwind, AssertUnwindSafe};

type StageFn = Box<dyn FnOnce(TimePoint, Task) -> anyhow::Result<PipelineFlowState> + Send>;

/// Bookkeeping for one scheduled stage computation.
struct StageJob {
    node: TargetId,
    time: TimePoint,
    /// Cache revision when the job was scheduled. A result arriving after
    /// the cache was invalidated is delivered but not cached.
    revision: u64,
    /// Upper bound for the validity of the result.
    bound: TimeInterval,
    cacheable: bool,
    promise: Promise<PipelineFlowState>,
}

/// What a stage will run once its input is known.
enum Computation {
    /// The result is already known.
    Ready(anyhow::Result<PipelineFlowState>),
    Run { asynchronous: bool, run: StageFn },
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run a stage function, turning a panic into an error.
fn run_guarded(run: StageFn, time: TimePoint, task: Task) -> anyhow::Result<PipelineFlowState> {
    match catch_unwind(AssertUnwindSafe(move || run(time, task))) {
        Ok(result) => result,
        Err(payload) => Err(anyhow!("Stage panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn is_cancellation(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<CoreError>()
        .is_some_and(CoreError::is_canceled)
}

impl Dataset {
    /// Request the output of `node` at `time`.
    ///
    /// Fails only if `node` is not a pipeline stage. Computation failures are
    /// reported through the status of the resulting state.
    pub fn evaluate(&mut self, node: TargetId, time: TimePoint) -> Result<FlowFuture> {
        let request = TimeInterval::instant(time);
        let stage = self
            .graph
            .get_mut::<PipelineNode>(node)
            .ok_or(CoreError::InvalidTarget(node))?;

        if let Some(state) = stage.cache().lookup(&request) {
            tracing::debug!("Cache hit for '{}' at t={}", stage.title(), time);
            return Ok(FlowFuture::resolved(state.clone()));
        }
        if let Some(future) = stage.cache_mut().find_pending(&request) {
            tracing::debug!("Joining in-flight evaluation of '{}' at t={}", stage.title(), time);
            return Ok(future);
        }

        let title = stage.title().to_string();
        let upstream_field = stage.upstream_field();
        let revision = stage.cache().revision();
        let promise: Promise<PipelineFlowState> = self
            .task_manager
            .create_promise(format!("Evaluating '{}' at t={}", title, time));
        let Some(future) = promise.future() else {
            return Ok(FlowFuture::finished(TaskOutcome::Canceled));
        };
        if let Some(stage) = self.graph.get_mut::<PipelineNode>(node) {
            stage
                .cache_mut()
                .register_pending(request, future.task().id(), future.downgrade());
        }
        tracing::debug!(
            "Cache miss for '{}' at t={}, started task {}",
            title,
            time,
            future.task().id()
        );

        let job = StageJob {
            node,
            time,
            revision,
            bound: TimeInterval::infinite(),
            cacheable: true,
            promise,
        };

        let Some(field) = upstream_field else {
            self.run_stage(job, None);
            return Ok(future);
        };
        let upstream = match self.graph.reference(node, field) {
            Ok(Some(upstream)) => self.evaluate(upstream, time),
            Ok(None) => Err(CoreError::Computation(format!(
                "'{}' has no {} assigned",
                title, field
            ))),
            Err(e) => Err(e),
        };
        match upstream {
            Ok(upstream) => match upstream.outcome() {
                Some(outcome) => self.run_stage(job, Some(outcome)),
                None => {
                    let executor = self.executor(node);
                    let waiting = upstream.clone();
                    waiting.on_finished(&executor, move |dataset: &mut Dataset, outcome| {
                        // Holding the upstream future keeps its task alive.
                        let _upstream = upstream;
                        dataset.run_stage(job, Some(outcome));
                    });
                }
            },
            Err(e) => self.finish_stage(job, Err(anyhow::Error::new(e))),
        }
        Ok(future)
    }

    /// Start the computation of a stage whose input is known.
    fn run_stage(
        &mut self,
        mut job: StageJob,
        input: Option<TaskOutcome<PipelineFlowState>>,
    ) {
        if job.promise.is_canceled() {
            self.finish_stage(job, Err(CoreError::Canceled.into()));
            return;
        }
        let input = match input {
            None => None,
            Some(TaskOutcome::Done(state)) => Some(state),
            Some(TaskOutcome::Canceled) => {
                self.finish_stage(job, Err(CoreError::Canceled.into()));
                return;
            }
            Some(TaskOutcome::Failed(error)) => {
                self.finish_stage(job, Err(anyhow::Error::new(error).context("Upstream failed")));
                return;
            }
        };

        let computation = self.prepare(&mut job, input);
        match computation {
            Computation::Ready(result) => self.finish_stage(job, result),
            Computation::Run {
                asynchronous: false,
                run,
            } => {
                let task = job.promise.task().cloned().unwrap_or_default();
                let result = run_guarded(run, job.time, task);
                self.finish_stage(job, result);
            }
            Computation::Run {
                asynchronous: true,
                run,
            } => {
                let task = job.promise.task().cloned().unwrap_or_default();
                let executor = self.executor(job.node);
                self.pool.spawn(move || {
                    let result = run_guarded(run, job.time, task);
                    crate::concurrent::Executor::execute(
                        &executor,
                        Box::new(move |dataset: &mut Dataset| dataset.finish_stage(job, result)),
                    );
                });
            }
        }
    }

    /// Decide what a stage computes from its input.
    fn prepare(&mut self, job: &mut StageJob, input: Option<PipelineFlowState>) -> Computation {
        let Some(stage) = self.graph.get::<PipelineNode>(job.node) else {
            return Computation::Ready(Err(CoreError::InvalidTarget(job.node).into()));
        };
        if let Some(input) = &input {
            job.bound = input.validity();
        }

        match stage.kind() {
            StageKind::Source(source) => {
                let source = source.clone();
                Computation::Run {
                    asynchronous: source.is_asynchronous(),
                    run: Box::new(move |time, progress| {
                        source.produce(&SourceRequest { time, progress })
                    }),
                }
            }
            StageKind::Scene => Computation::Ready(
                input.ok_or_else(|| anyhow!("Scene node has no input")),
            ),
            StageKind::ModifierApplication => {
                let Some(input) = input else {
                    return Computation::Ready(Err(anyhow!("Modifier application has no input")));
                };
                let modifier = match self.graph.reference(job.node, MODIFIER_FIELD) {
                    Ok(Some(modifier)) => modifier,
                    Ok(None) => return Computation::Ready(Ok(input)),
                    Err(e) => return Computation::Ready(Err(e.into())),
                };
                let Some(algorithm) = self
                    .graph
                    .get::<ModifierNode>(modifier)
                    .map(ModifierNode::algorithm)
                else {
                    return Computation::Ready(Err(anyhow!("{} is not a modifier", modifier)));
                };
                let params = match self.graph.properties(modifier) {
                    Ok(params) => params,
                    Err(e) => return Computation::Ready(Err(e.into())),
                };

                if !params.bool_or(ENABLED_PROPERTY, true) {
                    if let Some(stage) = self.graph.get_mut::<PipelineNode>(job.node) {
                        stage.cache_mut().reset();
                    }
                    job.cacheable = false;
                    let mut state = input;
                    state.set_status(PipelineStatus::new(StatusKind::Success, DISABLED_STATUS));
                    return Computation::Ready(Ok(state));
                }

                job.bound
                    .intersect(&algorithm.validity_interval(&params, job.time));
                Computation::Run {
                    asynchronous: algorithm.is_asynchronous(),
                    run: Box::new(move |time, progress| {
                        let mut state = input;
                        let request = ModifierRequest {
                            time,
                            params,
                            progress,
                        };
                        let status = algorithm.apply(&request, &mut state)?;
                        let combined = state.status().clone().worst(status);
                        state.set_status(combined);
                        Ok(state)
                    }),
                }
            }
        }
    }

    /// Publish the result of a stage computation.
    fn finish_stage(&mut self, job: StageJob, result: anyhow::Result<PipelineFlowState>) {
        let StageJob {
            node,
            time,
            revision,
            bound,
            cacheable,
            promise,
        } = job;
        let canceled =
            promise.is_canceled() || matches!(&result, Err(error) if is_cancellation(error));

        let Some(stage) = self.graph.get_mut::<PipelineNode>(node) else {
            return;
        };
        if let Some(task) = promise.task() {
            stage.cache_mut().complete_pending(task.id());
        }
        if canceled {
            tracing::debug!("Evaluation of '{}' at t={} canceled", stage.title(), time);
            promise.set_outcome(TaskOutcome::Canceled);
            return;
        }

        let state = match result {
            Ok(mut state) => {
                let mut validity = state.validity().intersection(&bound);
                if !validity.contains_time(time) {
                    validity = TimeInterval::instant(time);
                }
                state.set_validity(validity);
                state
            }
            Err(error) => {
                let message = format!("{:#}", error);
                tracing::warn!("'{}' failed at t={}: {}", stage.title(), time, message);
                PipelineFlowState::error(stage.cache().preliminary().data().cloned(), message, time)
            }
        };

        let cached = if !cacheable {
            stage.cache_mut().set_preliminary(state.clone());
            false
        } else if stage.cache().revision() != revision {
            tracing::debug!(
                "Discarding stale result of '{}' at t={} (cache changed)",
                stage.title(),
                time
            );
            false
        } else {
            stage.cache_mut().insert(state.clone())
        };
        let status_changed = stage.set_status(state.status().clone());

        if status_changed {
            self.graph.notify_dependents(node, EventKind::StatusChanged);
        }
        if cached {
            self.graph
                .notify_dependents(node, EventKind::PipelineCacheUpdated);
        }
        self.graph
            .notify_dependents(node, EventKind::PreliminaryStateAvailable);
        promise.set_result(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::data::{DataBuffer, DataObject, DataRef};
    use crate::graph::PropertyValue;
    use crate::pipeline::modifier::MockModifierAlgorithm;
    use crate::pipeline::source::DataSource;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn dataset() -> Dataset {
        let mut config = EngineConfig::default();
        config.executor.worker_threads = 2;
        Dataset::new(config).unwrap()
    }

    fn positions() -> PipelineFlowState {
        let mut root = DataObject::collection();
        root.add_child(DataRef::new(DataObject::buffer(
            "Position",
            DataBuffer::from_values(1, vec![1.0, 2.0]).unwrap(),
        )))
        .unwrap();
        PipelineFlowState::from_collection(root)
    }

    fn counting_source(calls: Arc<AtomicUsize>) -> DataSource {
        DataSource::generator(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(positions())
        })
    }

    fn mock_pipeline(
        dataset: &mut Dataset,
        algorithm: MockModifierAlgorithm,
    ) -> (TargetId, TargetId, TargetId) {
        let source = dataset.create_source(DataSource::fixed(positions()));
        let modifier = dataset.create_modifier("Mock", "Mock", Arc::new(algorithm));
        let application = dataset.apply_modifier(source, modifier).unwrap();
        (source, modifier, application)
    }

    fn passthrough_mock() -> MockModifierAlgorithm {
        let mut algorithm = MockModifierAlgorithm::new();
        algorithm.expect_parameters().returning(Vec::new);
        algorithm.expect_is_asynchronous().return_const(false);
        algorithm
            .expect_validity_interval()
            .returning(|_, _| TimeInterval::infinite());
        algorithm
    }

    #[test]
    fn test_second_evaluation_hits_cache() {
        let mut dataset = dataset();
        let calls = Arc::new(AtomicUsize::new(0));
        let source = dataset.create_source(counting_source(calls.clone()));

        let first = dataset.evaluate_blocking(source, 5).unwrap();
        let started = dataset.task_manager().tasks_started();
        let second = dataset.evaluate(source, 5).unwrap();

        assert!(second.is_finished());
        assert!(second.outcome().unwrap().value().unwrap().same_content(&first));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dataset.task_manager().tasks_started(), started);
    }

    #[test]
    fn test_modifier_failure_becomes_error_state() {
        let mut dataset = dataset();
        let mut algorithm = passthrough_mock();
        algorithm
            .expect_apply()
            .returning(|_, _| Err(anyhow!("bad input").context("while scaling")));
        let (_, _, application) = mock_pipeline(&mut dataset, algorithm);

        let state = dataset.evaluate_blocking(application, 3).unwrap();
        assert!(state.status().is_error());
        assert_eq!(state.status().message, "while scaling: bad input");
        assert_eq!(state.validity(), TimeInterval::instant(3));
        assert!(dataset.node_status(application).unwrap().is_error());
    }

    #[test]
    fn test_panicking_stage_is_contained() {
        let mut dataset = dataset();
        let source = dataset.create_source(DataSource::generator(|request| {
            if request.time > 0 {
                panic!("reader exploded");
            }
            let mut state = positions();
            state.set_validity(TimeInterval::instant(request.time));
            Ok(state)
        }));

        let good = dataset.evaluate_blocking(source, 0).unwrap();
        let state = dataset.evaluate_blocking(source, 1).unwrap();
        assert!(state.status().is_error());
        assert!(state.status().message.contains("reader exploded"));
        // The error state keeps the last good data.
        assert!(DataRef::ptr_eq(state.data().unwrap(), good.data().unwrap()));
    }

    #[test]
    fn test_validity_is_clamped_by_modifier() {
        let mut dataset = dataset();
        let mut algorithm = MockModifierAlgorithm::new();
        algorithm.expect_parameters().returning(Vec::new);
        algorithm.expect_is_asynchronous().return_const(false);
        algorithm
            .expect_validity_interval()
            .returning(|_, time| TimeInterval::new(time, time + 10));
        algorithm
            .expect_apply()
            .times(1)
            .returning(|_, _| Ok(PipelineStatus::success()));
        let (_, _, application) = mock_pipeline(&mut dataset, algorithm);

        let state = dataset.evaluate_blocking(application, 20).unwrap();
        assert_eq!(state.validity(), TimeInterval::new(20, 30));
        // Served from the cache: apply runs only once.
        assert!(dataset.evaluate(application, 25).unwrap().is_finished());
    }

    #[test]
    fn test_modifier_narrows_partial_invalidation() {
        let mut dataset = dataset();
        let mut algorithm = passthrough_mock();
        algorithm
            .expect_restrict_input_validity()
            .returning(|_, unchanged: &mut TimeInterval| {
                *unchanged = TimeInterval::new(unchanged.start() + 1, unchanged.end() - 1);
            });
        algorithm
            .expect_apply()
            .returning(|_, _| Ok(PipelineStatus::success()));
        let (source, _, application) = mock_pipeline(&mut dataset, algorithm);
        for time in 0..5 {
            dataset.evaluate_blocking(application, time).unwrap();
        }

        dataset
            .invalidate_cache_outside(source, TimeInterval::new(0, 4))
            .unwrap();

        assert!(dataset.cached_state(source, 0).is_some());
        assert!(dataset.cached_state(source, 4).is_none());
        assert!(dataset.cached_state(application, 0).is_none());
        assert!(dataset.cached_state(application, 1).is_some());
        assert!(dataset.cached_state(application, 2).is_some());
        assert!(dataset.cached_state(application, 3).is_none());
    }

    #[test]
    fn test_disabled_modifier_passes_input_through() {
        let mut dataset = dataset();
        let mut algorithm = passthrough_mock();
        algorithm.expect_apply().never();
        let (source, modifier, application) = mock_pipeline(&mut dataset, algorithm);
        dataset
            .set_property(modifier, ENABLED_PROPERTY, PropertyValue::Bool(false))
            .unwrap();

        let input = dataset.evaluate_blocking(source, 0).unwrap();
        let state = dataset.evaluate_blocking(application, 0).unwrap();
        assert_eq!(state.status().message, DISABLED_STATUS);
        assert!(!state.status().is_error());
        assert!(DataRef::ptr_eq(
            state.data().unwrap(),
            input.data().unwrap()
        ));
        let stage = dataset.graph().get::<PipelineNode>(application).unwrap();
        assert!(stage.cache().is_empty());
        assert!(stage.cache().preliminary().same_content(&state));
    }

    #[test]
    fn test_missing_input_reports_error() {
        let mut dataset = dataset();
        let application = dataset.create_object(crate::pipeline::node::APPLICATION_CLASS).unwrap();
        let state = dataset.evaluate_blocking(application, 0).unwrap();
        assert!(state.status().is_error());
        assert!(state.status().message.contains("input"));
    }

    #[test]
    fn test_evaluate_rejects_non_stage() {
        let mut dataset = dataset();
        let modifier = dataset.create_modifier("Mock", "Mock", Arc::new(passthrough_mock()));
        assert!(matches!(
            dataset.evaluate(modifier, 0),
            Err(CoreError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_asynchronous_source_posts_result() {
        let mut dataset = dataset();
        let source = dataset.create_source(DataSource::asynchronous(|request| {
            let mut state = positions();
            state.set_validity(TimeInterval::instant(request.time));
            Ok(state)
        }));
        let future = dataset.evaluate(source, 7).unwrap();
        let outcome = dataset.wait_for(&future);
        let state = outcome.value().unwrap();
        assert_eq!(state.validity(), TimeInterval::instant(7));
        assert!(dataset.cached_state(source, 7).is_some());
    }
}
