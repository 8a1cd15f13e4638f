//! Shared task state: cancellation, completion and progress.
//!
//! A [`Task`] is the non-generic half of an asynchronous operation. It is
//! cheap to clone and is what running algorithms poll for cancellation and
//! report progress through. The typed result lives in the promise/future pair
//! built on top of it (see [`future`](crate::concurrent::future)).

use crate::concurrent::task_manager::TaskEvent;
use crate::error::CoreError;
use chrono::Utc;
use crossbeam_channel::Sender;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

pub type TaskId = u64;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Failure carried by a finished task. Cloneable so every attached future
/// can observe it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TaskError {
    message: String,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Flatten an error chain into one message.
    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        Self::new(format!("{:#}", error))
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<CoreError> for TaskError {
    fn from(error: CoreError) -> Self {
        Self::new(error.to_string())
    }
}

/// How a task ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome<T> {
    Done(T),
    Failed(TaskError),
    Canceled,
}

impl<T> TaskOutcome<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, TaskOutcome::Done(_))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, TaskOutcome::Canceled)
    }

    pub fn value(self) -> Option<T> {
        match self {
            TaskOutcome::Done(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TaskOutcome<U> {
        match self {
            TaskOutcome::Done(value) => TaskOutcome::Done(f(value)),
            TaskOutcome::Failed(error) => TaskOutcome::Failed(error),
            TaskOutcome::Canceled => TaskOutcome::Canceled,
        }
    }

    /// Convert to a `Result`, mapping cancellation to [`CoreError::Canceled`].
    pub fn into_result(self) -> crate::error::Result<T> {
        match self {
            TaskOutcome::Done(value) => Ok(value),
            TaskOutcome::Failed(error) => Err(CoreError::Computation(error.message)),
            TaskOutcome::Canceled => Err(CoreError::Canceled),
        }
    }
}

#[derive(Debug)]
struct SubStepFrame {
    weights: Vec<u64>,
    current: usize,
}

#[derive(Debug, Default)]
struct ProgressState {
    value: u64,
    maximum: u64,
    text: String,
    sub_steps: Vec<SubStepFrame>,
}

impl ProgressState {
    fn fraction(&self) -> f64 {
        let mut fraction = if self.maximum > 0 {
            (self.value as f64 / self.maximum as f64).min(1.0)
        } else {
            0.0
        };
        for frame in self.sub_steps.iter().rev() {
            let total: u64 = frame.weights.iter().sum();
            if total == 0 {
                continue;
            }
            let done: u64 = frame.weights[..frame.current.min(frame.weights.len())]
                .iter()
                .sum();
            let current = frame.weights.get(frame.current).copied().unwrap_or(0);
            fraction = (done as f64 + current as f64 * fraction) / total as f64;
        }
        fraction
    }

    /// Overall progress as (value, maximum) for observers.
    fn total(&self) -> (u64, u64) {
        if self.sub_steps.is_empty() {
            (self.value, self.maximum)
        } else {
            ((self.fraction() * 1000.0).round() as u64, 1000)
        }
    }
}

struct TaskCore {
    id: TaskId,
    canceled: AtomicBool,
    finished: AtomicBool,
    shares: AtomicUsize,
    progress: Mutex<ProgressState>,
    observer: Option<Sender<TaskEvent>>,
}

/// Handle to the shared state of one asynchronous operation.
#[derive(Clone)]
pub struct Task {
    core: Arc<TaskCore>,
}

impl Task {
    /// A task nobody observes.
    pub fn new() -> Self {
        Self::with_observer(None)
    }

    pub(crate) fn with_observer(observer: Option<Sender<TaskEvent>>) -> Self {
        Self {
            core: Arc::new(TaskCore {
                id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
                canceled: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                shares: AtomicUsize::new(0),
                progress: Mutex::new(ProgressState::default()),
                observer,
            }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.core.id
    }

    pub fn ptr_eq(a: &Task, b: &Task) -> bool {
        Arc::ptr_eq(&a.core, &b.core)
    }

    fn emit(&self, event: TaskEvent) {
        if let Some(observer) = &self.core.observer {
            // Observers are informational; a full channel drops the event.
            let _ = observer.try_send(event);
        }
    }

    fn lock_progress(&self) -> MutexGuard<'_, ProgressState> {
        self.core.progress.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Lifecycle ──

    pub fn is_canceled(&self) -> bool {
        self.core.canceled.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.core.finished.load(Ordering::Acquire)
    }

    /// Request cancellation. Idempotent; has no effect on a finished task.
    /// Running work stops only when it next polls [`Task::is_canceled`].
    pub fn cancel(&self) {
        if self.is_finished() {
            return;
        }
        if !self.core.canceled.swap(true, Ordering::AcqRel) {
            tracing::debug!("Task {} canceled", self.id());
        }
    }

    pub(crate) fn mark_finished(&self) {
        if !self.core.finished.swap(true, Ordering::AcqRel) {
            self.emit(TaskEvent::Finished {
                task: self.id(),
                canceled: self.is_canceled(),
                at: Utc::now(),
            });
        }
    }

    pub(crate) fn mark_started(&self) {
        self.emit(TaskEvent::Started {
            task: self.id(),
            text: self.progress_text(),
            at: Utc::now(),
        });
    }

    /// Number of live futures attached to this task.
    pub fn share_count(&self) -> usize {
        self.core.shares.load(Ordering::Acquire)
    }

    pub(crate) fn acquire_share(&self) {
        self.core.shares.fetch_add(1, Ordering::AcqRel);
    }

    /// Attach a new future unless the task is already abandoned.
    pub(crate) fn try_acquire_share(&self) -> bool {
        let mut current = self.core.shares.load(Ordering::Acquire);
        loop {
            if current == 0 || self.is_canceled() {
                return false;
            }
            match self.core.shares.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Detach a future. The last detach of an unfinished task cancels it.
    pub(crate) fn release_share(&self) {
        if self.core.shares.fetch_sub(1, Ordering::AcqRel) == 1 && !self.is_finished() {
            tracing::trace!("Task {} lost its last future", self.id());
            self.cancel();
        }
    }

    // ── Progress ──

    /// Each setter returns `false` once the task has been canceled, so loops
    /// can report and poll in one call.
    pub fn set_progress_maximum(&self, maximum: u64) -> bool {
        let total = {
            let mut progress = self.lock_progress();
            progress.maximum = maximum;
            progress.value = progress.value.min(maximum);
            progress.total()
        };
        self.emit_progress(total);
        !self.is_canceled()
    }

    pub fn set_progress_value(&self, value: u64) -> bool {
        let total = {
            let mut progress = self.lock_progress();
            if progress.value == value {
                None
            } else {
                progress.value = value;
                Some(progress.total())
            }
        };
        if let Some(total) = total {
            self.emit_progress(total);
        }
        !self.is_canceled()
    }

    /// Update the value but notify observers only every `every` steps.
    pub fn set_progress_value_intermittent(&self, value: u64, every: u64) -> bool {
        if every <= 1 || value % every == 0 {
            return self.set_progress_value(value);
        }
        self.lock_progress().value = value;
        !self.is_canceled()
    }

    pub fn increment_progress_value(&self, increment: u64) -> bool {
        let value = self.progress_value().saturating_add(increment);
        self.set_progress_value(value)
    }

    pub fn progress_value(&self) -> u64 {
        self.lock_progress().value
    }

    pub fn progress_maximum(&self) -> u64 {
        self.lock_progress().maximum
    }

    pub fn set_progress_text(&self, text: impl Into<String>) {
        let text = text.into();
        {
            let mut progress = self.lock_progress();
            if progress.text == text {
                return;
            }
            progress.text = text.clone();
        }
        self.emit(TaskEvent::ProgressTextChanged {
            task: self.id(),
            text,
        });
    }

    /// Set the description before anyone observes the task.
    pub(crate) fn init_progress_text(&self, text: String) {
        self.lock_progress().text = text;
    }

    pub fn progress_text(&self) -> String {
        self.lock_progress().text.clone()
    }

    /// Split the current step into sub-steps with relative weights.
    pub fn begin_progress_sub_steps_with_weights(&self, weights: Vec<u64>) {
        let mut progress = self.lock_progress();
        progress.sub_steps.push(SubStepFrame { weights, current: 0 });
        progress.value = 0;
        progress.maximum = 0;
    }

    /// Split the current step into `steps` equally weighted sub-steps.
    pub fn begin_progress_sub_steps(&self, steps: usize) {
        self.begin_progress_sub_steps_with_weights(vec![1; steps]);
    }

    pub fn next_progress_sub_step(&self) {
        let total = {
            let mut progress = self.lock_progress();
            let Some(frame) = progress.sub_steps.last_mut() else {
                return;
            };
            if frame.current + 1 < frame.weights.len() {
                frame.current += 1;
            }
            progress.value = 0;
            progress.maximum = 0;
            progress.total()
        };
        self.emit_progress(total);
    }

    pub fn end_progress_sub_steps(&self) {
        let total = {
            let mut progress = self.lock_progress();
            progress.sub_steps.pop();
            progress.value = 0;
            progress.maximum = 0;
            progress.total()
        };
        self.emit_progress(total);
    }

    /// Overall completion in `[0, 1]`, accounting for nested sub-steps.
    pub fn total_progress(&self) -> f64 {
        self.lock_progress().fraction()
    }

    fn emit_progress(&self, (value, maximum): (u64, u64)) {
        self.emit(TaskEvent::ProgressChanged {
            task: self.id(),
            value,
            maximum,
        });
    }
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id())
            .field("canceled", &self.is_canceled())
            .field("finished", &self.is_finished())
            .field("shares", &self.share_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_idempotent_and_ignored_after_finish() {
        let task = Task::new();
        task.cancel();
        task.cancel();
        assert!(task.is_canceled());

        let done = Task::new();
        done.mark_finished();
        done.cancel();
        assert!(!done.is_canceled());
    }

    #[test]
    fn test_share_counting() {
        let task = Task::new();
        assert!(!task.try_acquire_share());
        task.acquire_share();
        assert!(task.try_acquire_share());
        assert_eq!(task.share_count(), 2);
        task.release_share();
        assert!(!task.is_canceled());
        task.release_share();
        assert!(task.is_canceled());
        assert!(!task.try_acquire_share());
    }

    #[test]
    fn test_weighted_sub_steps() {
        let task = Task::new();
        task.begin_progress_sub_steps_with_weights(vec![1, 3]);
        task.set_progress_maximum(10);
        task.set_progress_value(5);
        assert!((task.total_progress() - 0.125).abs() < 1e-9);

        task.next_progress_sub_step();
        assert!((task.total_progress() - 0.25).abs() < 1e-9);
        task.set_progress_maximum(2);
        task.set_progress_value(2);
        assert!((task.total_progress() - 1.0).abs() < 1e-9);

        task.end_progress_sub_steps();
        assert_eq!(task.progress_maximum(), 0);
    }

    #[test]
    fn test_progress_reports_cancellation() {
        let task = Task::new();
        assert!(task.set_progress_value(1));
        task.cancel();
        assert!(!task.set_progress_value(2));
        assert!(!task.increment_progress_value(1));
        assert_eq!(task.progress_value(), 3);
    }

    #[test]
    fn test_outcome_conversions() {
        let done: TaskOutcome<i32> = TaskOutcome::Done(2);
        assert_eq!(done.clone().map(|v| v * 2), TaskOutcome::Done(4));
        assert_eq!(done.into_result().unwrap(), 2);
        let canceled: TaskOutcome<i32> = TaskOutcome::Canceled;
        assert!(canceled.into_result().unwrap_err().is_canceled());
        let err = TaskError::from_anyhow(&anyhow::anyhow!("inner").context("outer"));
        assert_eq!(err.message(), "outer: inner");
    }
}
