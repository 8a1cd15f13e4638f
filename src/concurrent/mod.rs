//! Asynchronous task runtime.
//!
//! # Main Types
//!
//! - [`Task`] - Cancel flag, completion flag and progress of one operation
//! - [`Promise`] / [`SharedFuture`] / [`WeakFuture`] - Producer and observers of a task result
//! - [`Executor`] - Where continuations run ([`InlineExecutor`], [`RefTargetExecutor`])
//! - [`MainContext`] - Ordered queue of work for the thread owning the graph
//! - [`WorkerPool`] - Threads running asynchronous stage computations
//! - [`TaskManager`] - Registry of running tasks and progress events
//!
//! # Cancellation
//!
//! Cancellation is cooperative. Every future holds a share of its task; the
//! task is canceled when its last future is dropped before completion, and
//! the running computation notices the next time it polls
//! [`Task::is_canceled`] or reports progress.

pub mod executor;
pub mod future;
pub mod pool;
pub mod task;
pub mod task_manager;

pub use executor::{Executor, InlineExecutor, MainContext, MainMessage, RefTargetExecutor, Work};
pub use future::{Promise, SharedFuture, WeakFuture};
pub use pool::WorkerPool;
pub use task::{Task, TaskError, TaskId, TaskOutcome};
pub use task_manager::{TaskEvent, TaskManager};
