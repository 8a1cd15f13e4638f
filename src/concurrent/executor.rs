//! Executors decide where continuations run.
//!
//! [`InlineExecutor`] runs work immediately on the completing thread.
//! [`RefTargetExecutor`] marshals work to the main context as a
//! [`MainMessage`]; the message carries the node the work belongs to and the
//! execution context that was active when the work was scheduled. The
//! [`Dataset`] drains the queue in submission order.

use crate::dataset::Dataset;
use crate::graph::TargetId;
use crate::types::ExecutionContext;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

/// A unit of deferred work operating on an environment.
pub type Work<Env> = Box<dyn FnOnce(&mut Env) + Send>;

pub trait Executor: Clone + Send + 'static {
    /// What the work gets mutable access to when it runs.
    type Env;

    fn execute(&self, work: Work<Self::Env>);
}

/// Runs work right away on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    type Env = ();

    fn execute(&self, work: Work<()>) {
        work(&mut ());
    }
}

/// Work posted to the main context.
pub struct MainMessage {
    pub target: TargetId,
    pub context: ExecutionContext,
    pub work: Work<Dataset>,
}

/// The queue feeding the thread that owns the graph.
pub struct MainContext {
    sender: Sender<MainMessage>,
    receiver: Receiver<MainMessage>,
}

impl MainContext {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    pub fn sender(&self) -> Sender<MainMessage> {
        self.sender.clone()
    }

    pub fn try_recv(&self) -> Option<MainMessage> {
        match self.receiver.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<MainMessage> {
        match self.receiver.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Messages waiting to be processed.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

impl Default for MainContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Executor bound to one graph node.
///
/// Work always goes through the main context queue, so continuations
/// scheduled on the same executor run in submission order, with undo
/// recording suspended and the captured execution context restored.
#[derive(Clone)]
pub struct RefTargetExecutor {
    target: TargetId,
    context: ExecutionContext,
    sender: Sender<MainMessage>,
}

impl RefTargetExecutor {
    pub fn new(target: TargetId, context: ExecutionContext, sender: Sender<MainMessage>) -> Self {
        Self {
            target,
            context,
            sender,
        }
    }

    pub fn target(&self) -> TargetId {
        self.target
    }

    pub fn context(&self) -> ExecutionContext {
        self.context
    }
}

impl Executor for RefTargetExecutor {
    type Env = Dataset;

    fn execute(&self, work: Work<Dataset>) {
        let message = MainMessage {
            target: self.target,
            context: self.context,
            work,
        };
        if self.sender.send(message).is_err() {
            tracing::debug!(
                "Main context closed, dropping work for {}",
                self.target
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_executor_runs_immediately() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        InlineExecutor.execute(Box::new(move |_| {
            let _ = tx.send(());
        }));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_ref_target_executor_posts_in_order() {
        let main = MainContext::new();
        let executor = RefTargetExecutor::new(
            TargetId::new(3, 0),
            ExecutionContext::Scripting,
            main.sender(),
        );
        executor.execute(Box::new(|_| {}));
        executor.execute(Box::new(|_| {}));
        assert_eq!(main.pending(), 2);

        let first = main.try_recv().unwrap();
        assert_eq!(first.target, TargetId::new(3, 0));
        assert_eq!(first.context, ExecutionContext::Scripting);
        assert!(main.try_recv().is_some());
        assert!(main.try_recv().is_none());
    }
}
