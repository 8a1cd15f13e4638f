//! Fixed-size worker pool for asynchronous stage computations.

use crate::error::Result;
use crossbeam_channel::{unbounded, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send>;

pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `threads` workers; zero means one per available core.
    pub fn new(threads: usize) -> Result<Self> {
        let threads = if threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            threads
        };

        let (sender, receiver) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let receiver = receiver.clone();
            let handle = std::thread::Builder::new()
                .name(format!("vizflow-worker-{}", index))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        if catch_unwind(AssertUnwindSafe(job)).is_err() {
                            tracing::error!("Worker job panicked");
                        }
                    }
                })?;
            workers.push(handle);
        }
        tracing::info!("Worker pool started with {} threads", threads);
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job. Panics inside the job are caught and logged.
    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        let Some(sender) = &self.sender else {
            return;
        };
        if let Err(err) = sender.send(Box::new(job)) {
            tracing::warn!("Worker pool closed, running job inline");
            let job = err.into_inner();
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                tracing::error!("Inline job panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::warn!("Worker thread exited abnormally");
            }
        }
    }
}
