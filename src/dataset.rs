//! The dataset: owner of one pipeline graph and the machinery around it.
//!
//! A [`Dataset`] lives on the main context. It owns the [`RefGraph`], the
//! undo stack, the queue that continuations are marshaled through, the task
//! manager and the worker pool. Every graph mutation goes through it; worker
//! threads only ever see immutable data and post their results back as
//! [`MainMessage`]s, which [`Dataset::process_events`] and
//! [`Dataset::wait_for`] drain.

use crate::concurrent::{
    MainContext, MainMessage, RefTargetExecutor, SharedFuture, TaskManager, TaskOutcome,
    WorkerPool,
};
use crate::config::EngineConfig;
use crate::error::{CoreError, Result};
use crate::graph::{
    AsAny, ClassRegistry, EventKind, PropertyValue, RefGraph, RefTargetListener, ReferenceEvent,
    TargetId,
};
use crate::pipeline::cache::CachePolicy;
use crate::pipeline::flow_state::PipelineFlowState;
use crate::pipeline::modifier::{ModifierAlgorithm, ModifierNode};
use crate::pipeline::node::{
    PipelineNode, DATA_PROVIDER_FIELD, INPUT_FIELD, MODIFIER_FIELD,
};
use crate::pipeline::source::DataSource;
use crate::pipeline::{register_builtin_classes, FlowFuture};
use crate::types::{ExecutionContext, PipelineStatus, TimeInterval};
use crate::undo::{UndoRecord, UndoStack};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long [`Dataset::wait_for`] blocks on the queue before re-checking
/// the awaited future.
const PUMP_INTERVAL: Duration = Duration::from_millis(5);

pub struct Dataset {
    pub(crate) graph: RefGraph,
    pub(crate) undo: UndoStack,
    pub(crate) main: MainContext,
    pub(crate) execution_context: ExecutionContext,
    pub(crate) task_manager: TaskManager,
    pub(crate) pool: WorkerPool,
    pub(crate) registry: Arc<ClassRegistry>,
    pub(crate) cache_policy: CachePolicy,
    config: EngineConfig,
}

impl Dataset {
    /// Create a dataset with the built-in classes registered.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let mut registry = ClassRegistry::new();
        register_builtin_classes(&mut registry);
        Self::with_registry(config, Arc::new(registry))
    }

    pub fn with_registry(config: EngineConfig, registry: Arc<ClassRegistry>) -> Result<Self> {
        let pool = WorkerPool::new(config.executor.worker_threads)?;
        let cache_policy = CachePolicy::from_settings(&config.cache);
        tracing::info!(
            "Dataset created ({} classes, cache policy {:?}, context {})",
            registry.len(),
            cache_policy,
            config.executor.initial_context
        );
        Ok(Self {
            graph: RefGraph::new(),
            undo: UndoStack::new(),
            main: MainContext::new(),
            execution_context: config.executor.initial_context,
            task_manager: TaskManager::new(config.executor.task_event_capacity),
            pool,
            registry,
            cache_policy,
            config,
        })
    }

    // ── Accessors ──

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn graph(&self) -> &RefGraph {
        &self.graph
    }

    /// Direct graph access. Edits made here bypass undo recording.
    pub fn graph_mut(&mut self) -> &mut RefGraph {
        &mut self.graph
    }

    pub fn undo_stack(&self) -> &UndoStack {
        &self.undo
    }

    pub fn undo_stack_mut(&mut self) -> &mut UndoStack {
        &mut self.undo
    }

    pub fn task_manager(&self) -> &TaskManager {
        &self.task_manager
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    pub fn cache_policy(&self) -> CachePolicy {
        self.cache_policy
    }

    pub fn execution_context(&self) -> ExecutionContext {
        self.execution_context
    }

    pub fn set_execution_context(&mut self, context: ExecutionContext) {
        self.execution_context = context;
    }

    /// Executor marshaling work for `node` to the main context in the
    /// current execution context.
    pub fn executor(&self, node: TargetId) -> RefTargetExecutor {
        RefTargetExecutor::new(node, self.execution_context, self.main.sender())
    }

    // ── Building pipelines ──

    fn check_stage(&self, id: TargetId) -> Result<()> {
        match self.graph.get::<PipelineNode>(id) {
            Some(_) => Ok(()),
            None => Err(CoreError::InvalidTarget(id).with_context("not a pipeline stage")),
        }
    }

    /// Instantiate a registered class. Pipeline stages get the dataset's
    /// cache policy.
    pub fn create_object(&mut self, class_name: &str) -> Result<TargetId> {
        let mut object = self.registry.create(class_name)?;
        if let Some(node) = object.as_mut().as_any_mut().downcast_mut::<PipelineNode>() {
            node.cache_mut().set_policy(self.cache_policy);
        }
        Ok(self.graph.create(object))
    }

    pub fn create_source(&mut self, source: DataSource) -> TargetId {
        let node = PipelineNode::source(source).with_cache_policy(self.cache_policy);
        self.graph.create(Box::new(node))
    }

    pub fn create_modifier(
        &mut self,
        class_name: &'static str,
        title: impl Into<String>,
        algorithm: Arc<dyn ModifierAlgorithm>,
    ) -> TargetId {
        self.graph
            .create(Box::new(ModifierNode::new(class_name, title, algorithm)))
    }

    /// Insert a modifier application between `input` and whatever consumes
    /// the returned node.
    pub fn apply_modifier(&mut self, input: TargetId, modifier: TargetId) -> Result<TargetId> {
        let title = self
            .graph
            .get::<ModifierNode>(modifier)
            .map(|m| m.title().to_string())
            .ok_or_else(|| CoreError::InvalidTarget(modifier).with_context("not a modifier"))?;
        self.check_stage(input)?;
        let node = PipelineNode::modifier_application()
            .with_title(title.clone())
            .with_cache_policy(self.cache_policy);
        let application = self.graph.create(Box::new(node));
        self.graph
            .set_reference(application, MODIFIER_FIELD, Some(modifier))?;
        self.graph
            .set_reference(application, INPUT_FIELD, Some(input))?;
        tracing::info!("Applied '{}' to {} as {}", title, input, application);
        Ok(application)
    }

    /// Create a pinned scene node displaying the output of `provider`.
    pub fn create_scene_node(&mut self, provider: TargetId) -> Result<TargetId> {
        self.check_stage(provider)?;
        let node = PipelineNode::scene().with_cache_policy(self.cache_policy);
        let scene = self.graph.create(Box::new(node));
        self.graph.pin(scene)?;
        self.graph
            .set_reference(scene, DATA_PROVIDER_FIELD, Some(provider))?;
        tracing::info!("Scene node {} shows {}", scene, provider);
        Ok(scene)
    }

    /// Replace a source's data and tell everything downstream.
    pub fn set_source_data(&mut self, node: TargetId, source: DataSource) -> Result<()> {
        let stage = self
            .graph
            .get_mut::<PipelineNode>(node)
            .ok_or(CoreError::InvalidTarget(node))?;
        if stage.set_data_source(source).is_err() {
            return Err(CoreError::InvalidTarget(node).with_context("not a data source"));
        }
        self.graph.notify_dependents(
            node,
            EventKind::TargetChanged {
                field: None,
                unchanged_interval: TimeInterval::empty(),
            },
        );
        Ok(())
    }

    /// Drop the external owner added by [`create_scene_node`](Self::create_scene_node)
    /// or [`RefGraph::pin`].
    pub fn release(&mut self, node: TargetId) -> Result<()> {
        self.graph.unpin(node)
    }

    pub fn delete(&mut self, node: TargetId) -> Result<()> {
        self.graph.delete_target(node)
    }

    // ── Recorded edits ──

    /// Assign a reference field, recording the change for undo.
    pub fn set_reference(
        &mut self,
        holder: TargetId,
        field: &str,
        target: Option<TargetId>,
    ) -> Result<()> {
        let old = self.graph.reference(holder, field)?;
        self.graph.set_reference(holder, field, target)?;
        if old != target {
            self.undo.push(UndoRecord::ReferenceChanged {
                target: holder,
                field: field.to_string(),
                old,
                new: target,
            });
        }
        Ok(())
    }

    /// Assign a property, recording the change for undo.
    pub fn set_property(&mut self, id: TargetId, name: &str, value: PropertyValue) -> Result<()> {
        if let Some(old) = self.graph.set_property(id, name, value.clone())? {
            self.undo.push(UndoRecord::PropertyChanged {
                target: id,
                property: name.to_string(),
                old,
                new: value,
            });
        }
        Ok(())
    }

    /// Run `f` with undo recording suspended.
    pub fn with_undo_suspended<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.undo.suspend();
        let result = catch_unwind(AssertUnwindSafe(|| f(self)));
        self.undo.resume();
        result.unwrap_or_else(|payload| resume_unwind(payload))
    }

    // ── Listeners ──

    /// Observe events sent by `target`. The listener does not keep the
    /// target alive.
    pub fn subscribe(
        &mut self,
        target: TargetId,
        callback: impl FnMut(&ReferenceEvent) + 'static,
    ) -> Result<TargetId> {
        if !self.graph.contains(target) {
            return Err(CoreError::InvalidTarget(target));
        }
        let listener = self.graph.create(Box::new(RefTargetListener::new(callback)));
        self.graph.pin(listener)?;
        self.graph
            .set_reference(listener, RefTargetListener::TARGET_FIELD, Some(target))?;
        Ok(listener)
    }

    pub fn unsubscribe(&mut self, listener: TargetId) -> Result<()> {
        if self.graph.class_name(listener) != Some(RefTargetListener::CLASS_NAME) {
            return Err(CoreError::InvalidTarget(listener).with_context("not a listener"));
        }
        self.graph.delete_target(listener)
    }

    // ── Cache control ──

    pub fn cached_state(&self, node: TargetId, time: i64) -> Option<PipelineFlowState> {
        self.graph
            .get::<PipelineNode>(node)?
            .cache()
            .lookup_time(time)
            .cloned()
    }

    pub fn node_status(&self, node: TargetId) -> Option<PipelineStatus> {
        self.graph
            .get::<PipelineNode>(node)
            .map(|stage| stage.status().clone())
    }

    /// Most recent state of `node` without triggering a computation.
    pub fn evaluate_preliminary(&self, node: TargetId) -> Option<PipelineFlowState> {
        self.graph
            .get::<PipelineNode>(node)
            .map(|stage| stage.cache().preliminary().clone())
    }

    /// Drop every cached state of `node` and of the stages downstream.
    pub fn invalidate_cache(&mut self, node: TargetId) -> Result<()> {
        self.invalidate_cache_outside(node, TimeInterval::empty())
    }

    /// Announce that the output of `node` changed everywhere except over
    /// `unchanged`. Caches here and downstream keep only that part, narrowed
    /// further by modifiers that read other animation times.
    pub fn invalidate_cache_outside(&mut self, node: TargetId, unchanged: TimeInterval) -> Result<()> {
        if self.graph.get::<PipelineNode>(node).is_none() {
            return Err(CoreError::InvalidTarget(node));
        }
        tracing::debug!("Output of {} changed outside {}", node, unchanged);
        self.graph.notify_dependents(
            node,
            EventKind::TargetChanged {
                field: None,
                unchanged_interval: unchanged,
            },
        );
        Ok(())
    }

    /// Install `state` as the output of `node` over `interval`. Downstream
    /// caches are invalidated; the override itself is kept.
    pub fn override_cache(
        &mut self,
        node: TargetId,
        state: PipelineFlowState,
        interval: TimeInterval,
    ) -> Result<()> {
        let stage = self
            .graph
            .get_mut::<PipelineNode>(node)
            .ok_or(CoreError::InvalidTarget(node))?;
        stage.cache_mut().override_cache(state, interval);
        tracing::debug!("Cache of {} overridden over {}", node, interval);

        for dependent in self.graph.dependents(node) {
            self.graph.notify_dependents(
                dependent,
                EventKind::TargetChanged {
                    field: None,
                    unchanged_interval: TimeInterval::empty(),
                },
            );
        }
        self.graph
            .notify_dependents(node, EventKind::PipelineCacheUpdated);
        Ok(())
    }

    // ── Main context ──

    /// Run one posted message: skip it if its node is gone, otherwise run it
    /// in the execution context it was scheduled in with undo suspended.
    pub(crate) fn dispatch(&mut self, message: MainMessage) {
        let MainMessage {
            target,
            context,
            work,
        } = message;
        if !self.graph.contains(target) {
            tracing::debug!("Dropping work for deleted {}", target);
            return;
        }
        let previous = std::mem::replace(&mut self.execution_context, context);
        self.undo.suspend();
        let outcome = catch_unwind(AssertUnwindSafe(|| work(self)));
        self.undo.resume();
        self.execution_context = previous;
        if let Err(payload) = outcome {
            tracing::error!("Work for {} panicked", target);
            resume_unwind(payload);
        }
    }

    /// Run every message queued so far. Returns how many ran.
    pub fn process_events(&mut self) -> usize {
        let mut processed = 0;
        while let Some(message) = self.main.try_recv() {
            self.dispatch(message);
            processed += 1;
        }
        processed
    }

    /// Pump the main context until `future` finishes.
    ///
    /// Blocks forever if the awaited task never completes; use
    /// [`wait_for_timeout`](Self::wait_for_timeout) when that can happen.
    pub fn wait_for<T: Clone + Send + 'static>(&mut self, future: &SharedFuture<T>) -> TaskOutcome<T> {
        loop {
            if let Some(outcome) = future.outcome() {
                return outcome;
            }
            if let Some(message) = self.main.recv_timeout(PUMP_INTERVAL) {
                self.dispatch(message);
            }
        }
    }

    pub fn wait_for_timeout<T: Clone + Send + 'static>(
        &mut self,
        future: &SharedFuture<T>,
        timeout: Duration,
    ) -> Option<TaskOutcome<T>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(outcome) = future.outcome() {
                return Some(outcome);
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            if let Some(message) = self.main.recv_timeout(remaining.min(PUMP_INTERVAL)) {
                self.dispatch(message);
            }
        }
    }

    /// Evaluate and pump until the result is there.
    pub fn evaluate_blocking(&mut self, node: TargetId, time: i64) -> Result<PipelineFlowState> {
        let future: FlowFuture = self.evaluate(node, time)?;
        self.wait_for(&future).into_result()
    }
}

impl Drop for Dataset {
    fn drop(&mut self) {
        let running = self.task_manager.running_tasks().len();
        if running > 0 {
            tracing::debug!("Canceling {} running tasks", running);
        }
        self.task_manager.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataObject;
    use crate::pipeline::modifiers::{ScaleBufferModifier, SCALE_BUFFER_CLASS};
    use crate::pipeline::node::SOURCE_CLASS;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn dataset() -> Dataset {
        let mut config = EngineConfig::default();
        config.executor.worker_threads = 1;
        Dataset::new(config).unwrap()
    }

    fn scaled_pipeline(dataset: &mut Dataset) -> (TargetId, TargetId, TargetId) {
        let source = dataset.create_source(DataSource::fixed(PipelineFlowState::from_collection(
            DataObject::collection(),
        )));
        let modifier =
            dataset.create_modifier(SCALE_BUFFER_CLASS, "Scale", Arc::new(ScaleBufferModifier));
        let application = dataset.apply_modifier(source, modifier).unwrap();
        (source, modifier, application)
    }

    #[test]
    fn test_create_object_uses_registry() {
        let mut dataset = dataset();
        let id = dataset.create_object(SOURCE_CLASS).unwrap();
        assert_eq!(dataset.graph().class_name(id), Some(SOURCE_CLASS));
        assert!(matches!(
            dataset.create_object("Nope"),
            Err(CoreError::UnknownClass(_))
        ));
    }

    #[test]
    fn test_apply_modifier_rejects_non_modifier() {
        let mut dataset = dataset();
        let source = dataset.create_source(DataSource::default());
        let other = dataset.create_source(DataSource::default());
        let before = dataset.graph().len();
        assert!(dataset.apply_modifier(source, other).is_err());
        assert_eq!(dataset.graph().len(), before);
    }

    #[test]
    fn test_property_edits_are_recorded_unless_suspended() {
        let mut dataset = dataset();
        let (_, modifier, _) = scaled_pipeline(&mut dataset);

        dataset
            .set_property(modifier, "factor", PropertyValue::Float(2.0))
            .unwrap();
        assert_eq!(dataset.undo_stack().len(), 1);

        dataset.with_undo_suspended(|dataset| {
            dataset
                .set_property(modifier, "factor", PropertyValue::Float(3.0))
                .unwrap();
        });
        assert_eq!(dataset.undo_stack().len(), 1);
        assert!(dataset.undo_stack().is_recording());
    }

    #[test]
    fn test_dispatch_restores_context_and_suspends_undo() {
        let mut dataset = dataset();
        let (_, modifier, application) = scaled_pipeline(&mut dataset);
        dataset.set_execution_context(ExecutionContext::Scripting);
        let executor = dataset.executor(application);
        dataset.set_execution_context(ExecutionContext::Interactive);

        let seen = Arc::new(std::sync::Mutex::new(None));
        let observed = seen.clone();
        crate::concurrent::Executor::execute(
            &executor,
            Box::new(move |dataset: &mut Dataset| {
                dataset
                    .set_property(modifier, "factor", PropertyValue::Float(5.0))
                    .unwrap();
                *observed.lock().unwrap() = Some(dataset.execution_context());
            }),
        );
        assert_eq!(dataset.process_events(), 1);

        assert_eq!(*seen.lock().unwrap(), Some(ExecutionContext::Scripting));
        assert_eq!(dataset.execution_context(), ExecutionContext::Interactive);
        assert!(dataset.undo_stack().is_empty());
    }

    #[test]
    fn test_work_for_deleted_node_is_dropped() {
        let mut dataset = dataset();
        let source = dataset.create_source(DataSource::default());
        let executor = dataset.executor(source);
        dataset.delete(source).unwrap();

        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = ran.clone();
        crate::concurrent::Executor::execute(
            &executor,
            Box::new(move |_: &mut Dataset| flag.store(true, std::sync::atomic::Ordering::SeqCst)),
        );
        dataset.process_events();
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let mut dataset = dataset();
        let (_, modifier, _) = scaled_pipeline(&mut dataset);
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        let listener = dataset
            .subscribe(modifier, move |event| sink.borrow_mut().push(event.kind().name()))
            .unwrap();

        dataset
            .set_property(modifier, "factor", PropertyValue::Float(4.0))
            .unwrap();
        assert_eq!(*events.borrow(), vec!["TargetChanged"]);

        dataset.unsubscribe(listener).unwrap();
        assert!(!dataset.graph().contains(listener));
        assert!(dataset.graph().contains(modifier));
        assert!(dataset.unsubscribe(modifier).is_err());
    }
}
