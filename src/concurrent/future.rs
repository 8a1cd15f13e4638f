//! Promise / future pair on top of [`Task`].
//!
//! One [`Promise`] fulfils a task; any number of [`SharedFuture`]s observe it.
//! Every future holds one share of the task. When the last share goes away
//! before the task finished, the task is canceled. A [`WeakFuture`] finds an
//! in-flight task without holding a share.

use crate::concurrent::executor::Executor;
use crate::concurrent::task::{Task, TaskError, TaskOutcome};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

type Continuation = Box<dyn FnOnce() + Send>;

struct Slot<T> {
    outcome: Option<TaskOutcome<T>>,
    continuations: Vec<Continuation>,
}

struct TaskState<T> {
    task: Task,
    slot: Mutex<Slot<T>>,
    done: Condvar,
}

impl<T: Clone + Send + 'static> TaskState<T> {
    fn new(task: Task) -> Arc<Self> {
        Arc::new(Self {
            task,
            slot: Mutex::new(Slot {
                outcome: None,
                continuations: Vec::new(),
            }),
            done: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn outcome(&self) -> Option<TaskOutcome<T>> {
        self.lock().outcome.clone()
    }

    fn complete(&self, outcome: TaskOutcome<T>) {
        let continuations = {
            let mut slot = self.lock();
            if slot.outcome.is_some() {
                return;
            }
            // A canceled task discards late results.
            let outcome = if self.task.is_canceled() {
                TaskOutcome::Canceled
            } else {
                outcome
            };
            slot.outcome = Some(outcome);
            std::mem::take(&mut slot.continuations)
        };
        self.task.mark_finished();
        self.done.notify_all();
        for continuation in continuations {
            continuation();
        }
    }

    fn add_continuation(&self, continuation: Continuation) {
        {
            let mut slot = self.lock();
            if slot.outcome.is_none() {
                slot.continuations.push(continuation);
                return;
            }
        }
        continuation();
    }
}

/// Producer side of a task.
///
/// Dropping a promise without fulfilling it finishes the task as canceled.
pub struct Promise<T: Clone + Send + 'static> {
    state: Option<Arc<TaskState<T>>>,
}

impl<T: Clone + Send + 'static> Promise<T> {
    pub fn new(task: Task) -> Self {
        Self {
            state: Some(TaskState::new(task)),
        }
    }

    /// A promise for an unobserved task.
    pub fn detached() -> Self {
        Self::new(Task::new())
    }

    pub fn task(&self) -> Option<&Task> {
        self.state.as_ref().map(|state| &state.task)
    }

    pub fn is_canceled(&self) -> bool {
        self.task().map(Task::is_canceled).unwrap_or(true)
    }

    /// A new future attached to this promise's task.
    pub fn future(&self) -> Option<SharedFuture<T>> {
        let state = self.state.as_ref()?.clone();
        state.task.acquire_share();
        Some(SharedFuture { state })
    }

    pub fn set_result(mut self, value: T) {
        self.finish(TaskOutcome::Done(value));
    }

    pub fn set_error(mut self, error: TaskError) {
        self.finish(TaskOutcome::Failed(error));
    }

    pub fn set_outcome(mut self, outcome: TaskOutcome<T>) {
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: TaskOutcome<T>) {
        if let Some(state) = self.state.take() {
            state.complete(outcome);
        }
    }
}

impl<T: Clone + Send + 'static> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            tracing::trace!("Promise for task {} dropped unfulfilled", state.task.id());
            state.complete(TaskOutcome::Canceled);
        }
    }
}

/// Consumer side of a task. Clones share the same result.
pub struct SharedFuture<T: Clone + Send + 'static> {
    state: Arc<TaskState<T>>,
}

impl<T: Clone + Send + 'static> SharedFuture<T> {
    /// An already finished future holding `value`.
    pub fn resolved(value: T) -> Self {
        Self::finished(TaskOutcome::Done(value))
    }

    /// An already finished future holding `outcome`.
    pub fn finished(outcome: TaskOutcome<T>) -> Self {
        let state = TaskState::new(Task::new());
        state.task.acquire_share();
        state.complete(outcome);
        Self { state }
    }

    pub fn task(&self) -> &Task {
        &self.state.task
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().outcome.is_some()
    }

    /// The outcome, if the task has finished.
    pub fn outcome(&self) -> Option<TaskOutcome<T>> {
        self.state.outcome()
    }

    /// Whether both futures observe the same task.
    pub fn ptr_eq(a: &SharedFuture<T>, b: &SharedFuture<T>) -> bool {
        Arc::ptr_eq(&a.state, &b.state)
    }

    /// Block the calling thread until the task finishes.
    ///
    /// Do not call this on the main context while the task needs the main
    /// context to make progress; use [`Dataset::wait_for`](crate::dataset::Dataset::wait_for).
    pub fn wait(&self) -> TaskOutcome<T> {
        let mut slot = self.state.lock();
        loop {
            if let Some(outcome) = &slot.outcome {
                return outcome.clone();
            }
            slot = self
                .state
                .done
                .wait(slot)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskOutcome<T>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.state.lock();
        loop {
            if let Some(outcome) = &slot.outcome {
                return Some(outcome.clone());
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let (guard, _) = self
                .state
                .done
                .wait_timeout(slot, remaining)
                .unwrap_or_else(|e| e.into_inner());
            slot = guard;
        }
    }

    /// Give up interest in the result. The task itself is canceled only when
    /// this was the last attached future.
    pub fn cancel(self) {
        drop(self);
    }

    pub fn downgrade(&self) -> WeakFuture<T> {
        WeakFuture {
            state: Arc::downgrade(&self.state),
        }
    }

    /// Run `f` with the outcome on `executor` once the task finishes.
    /// Registering does not count as a share.
    pub fn on_finished<E, F>(&self, executor: &E, f: F)
    where
        E: Executor,
        F: FnOnce(&mut E::Env, TaskOutcome<T>) + Send + 'static,
    {
        let state = self.state.clone();
        let executor = executor.clone();
        self.state.add_continuation(Box::new(move || {
            executor.execute(Box::new(move |env: &mut E::Env| {
                let outcome = state.outcome().unwrap_or(TaskOutcome::Canceled);
                f(env, outcome);
            }));
        }));
    }

    /// Chain a computation. `f` runs on `executor` after this task finishes;
    /// it is skipped if the returned future was abandoned in the meantime.
    pub fn then<E, U, F>(&self, executor: &E, f: F) -> SharedFuture<U>
    where
        E: Executor,
        U: Clone + Send + 'static,
        F: FnOnce(&mut E::Env, TaskOutcome<T>) -> TaskOutcome<U> + Send + 'static,
    {
        let promise = Promise::detached();
        let state = match &promise.state {
            Some(state) => state.clone(),
            None => return SharedFuture::finished(TaskOutcome::Canceled),
        };
        state.task.acquire_share();
        let future = SharedFuture { state };
        self.on_finished(executor, move |env, outcome| {
            if promise.is_canceled() {
                return;
            }
            let result = f(env, outcome);
            promise.set_outcome(result);
        });
        future
    }
}

impl<T: Clone + Send + 'static> Clone for SharedFuture<T> {
    fn clone(&self) -> Self {
        self.state.task.acquire_share();
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Drop for SharedFuture<T> {
    fn drop(&mut self) {
        self.state.task.release_share();
    }
}

impl<T: Clone + Send + 'static> fmt::Debug for SharedFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedFuture")
            .field("task", &self.state.task)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Non-owning handle to an in-flight task.
pub struct WeakFuture<T: Clone + Send + 'static> {
    state: Weak<TaskState<T>>,
}

impl<T: Clone + Send + 'static> WeakFuture<T> {
    /// Attach a new future, unless the task is gone or was abandoned.
    pub fn upgrade(&self) -> Option<SharedFuture<T>> {
        let state = self.state.upgrade()?;
        if state.task.try_acquire_share() {
            Some(SharedFuture { state })
        } else {
            None
        }
    }

    pub fn is_alive(&self) -> bool {
        self.state
            .upgrade()
            .is_some_and(|state| state.task.share_count() > 0 && !state.task.is_canceled())
    }
}

impl<T: Clone + Send + 'static> Clone for WeakFuture<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrent::executor::InlineExecutor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_resolved_future() {
        let future = SharedFuture::resolved(7);
        assert!(future.is_finished());
        assert_eq!(future.wait(), TaskOutcome::Done(7));
    }

    #[test]
    fn test_dropped_promise_cancels() {
        let promise: Promise<i32> = Promise::detached();
        let future = promise.future().unwrap();
        drop(promise);
        assert_eq!(future.outcome(), Some(TaskOutcome::Canceled));
    }

    #[test]
    fn test_task_runs_until_last_future_released() {
        let promise: Promise<i32> = Promise::detached();
        let first = promise.future().unwrap();
        let second = first.downgrade().upgrade().unwrap();
        let task = first.task().clone();

        first.cancel();
        assert!(!task.is_canceled());
        drop(second);
        assert!(task.is_canceled());

        promise.set_result(1);
        assert!(task.is_finished());
    }

    #[test]
    fn test_weak_future_does_not_revive() {
        let promise: Promise<i32> = Promise::detached();
        let future = promise.future().unwrap();
        let weak = future.downgrade();
        assert!(weak.is_alive());
        drop(future);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_then_inline_runs_after_completion() {
        let promise: Promise<i32> = Promise::detached();
        let source = promise.future().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let doubled = source.then(&InlineExecutor, move |_, outcome| {
            counter.fetch_add(1, Ordering::SeqCst);
            outcome.map(|v| v * 2)
        });
        assert!(!doubled.is_finished());

        promise.set_result(21);
        assert_eq!(doubled.outcome(), Some(TaskOutcome::Done(42)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_then_on_finished_future_runs_immediately() {
        let source = SharedFuture::resolved(String::from("a"));
        let chained = source.then(&InlineExecutor, |_, outcome| outcome.map(|s| s + "b"));
        assert_eq!(chained.outcome(), Some(TaskOutcome::Done("ab".to_string())));
    }

    #[test]
    fn test_wait_across_threads() {
        let promise: Promise<u32> = Promise::detached();
        let future = promise.future().unwrap();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            promise.set_result(5);
        });
        assert_eq!(future.wait(), TaskOutcome::Done(5));
        handle.join().unwrap();
        assert_eq!(
            future.wait_timeout(Duration::from_millis(1)),
            Some(TaskOutcome::Done(5))
        );
    }

    #[test]
    fn test_late_result_after_cancel_is_discarded() {
        let promise: Promise<i32> = Promise::detached();
        let future = promise.future().unwrap();
        future.task().cancel();
        promise.set_result(3);
        assert_eq!(future.outcome(), Some(TaskOutcome::Canceled));
    }
}
