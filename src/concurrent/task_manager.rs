//! Registry of running tasks and their progress notifications.
//!
//! Everything the task manager reports is observational: events that do not
//! fit into the bounded channel are dropped and computation never depends on
//! anyone reading them.

use crate::concurrent::future::Promise;
use crate::concurrent::task::{Task, TaskId};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Progress notification for UIs and logs.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Started {
        task: TaskId,
        text: String,
        at: DateTime<Utc>,
    },
    Finished {
        task: TaskId,
        canceled: bool,
        at: DateTime<Utc>,
    },
    ProgressChanged {
        task: TaskId,
        value: u64,
        maximum: u64,
    },
    ProgressTextChanged {
        task: TaskId,
        text: String,
    },
}

impl TaskEvent {
    pub fn task(&self) -> TaskId {
        match self {
            TaskEvent::Started { task, .. }
            | TaskEvent::Finished { task, .. }
            | TaskEvent::ProgressChanged { task, .. }
            | TaskEvent::ProgressTextChanged { task, .. } => *task,
        }
    }
}

pub struct TaskManager {
    events_tx: Sender<TaskEvent>,
    events_rx: Receiver<TaskEvent>,
    running: Mutex<Vec<Task>>,
    started: AtomicU64,
}

impl TaskManager {
    pub fn new(event_capacity: usize) -> Self {
        let (events_tx, events_rx) = bounded(event_capacity.max(1));
        Self {
            events_tx,
            events_rx,
            running: Mutex::new(Vec::new()),
            started: AtomicU64::new(0),
        }
    }

    fn lock_running(&self) -> MutexGuard<'_, Vec<Task>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a task reporting to this manager and the promise that fulfils it.
    pub fn create_promise<T: Clone + Send + 'static>(&self, text: impl Into<String>) -> Promise<T> {
        let task = Task::with_observer(Some(self.events_tx.clone()));
        task.init_progress_text(text.into());
        task.mark_started();
        self.started.fetch_add(1, Ordering::Relaxed);
        {
            let mut running = self.lock_running();
            running.retain(|t| !t.is_finished());
            running.push(task.clone());
        }
        tracing::trace!("Task {} started: {}", task.id(), task.progress_text());
        Promise::new(task)
    }

    /// Number of tasks created through this manager so far.
    pub fn tasks_started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Tasks that have not finished yet.
    pub fn running_tasks(&self) -> Vec<Task> {
        let mut running = self.lock_running();
        running.retain(|t| !t.is_finished());
        running.clone()
    }

    /// Request cancellation of every running task.
    pub fn cancel_all(&self) {
        for task in self.running_tasks() {
            task.cancel();
        }
    }

    /// Receiver for progress events. All clones share one queue.
    pub fn events(&self) -> Receiver<TaskEvent> {
        self.events_rx.clone()
    }

    /// Take every event queued so far.
    pub fn drain_events(&self) -> Vec<TaskEvent> {
        self.events_rx.try_iter().collect()
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new(1024)
    }
}
