//! Background execution of accepted rounds.
//!
//! The gateway hands requests to a [`Dispatcher`] and returns immediately.
//! The matching [`Worker`] spawns one job per request. Jobs for different
//! tasks run concurrently; jobs for the same task run one at a time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::error::{PagewrightError, Result};
use crate::round::RoundRunner;
use crate::task::TaskRequest;

/// Creates a connected dispatcher and worker.
pub fn channel(runner: RoundRunner) -> (Dispatcher, Worker) {
    let (dispatcher, receiver) = queue();
    let worker = Worker {
        runner: Arc::new(runner),
        receiver,
        locks: TaskLocks::default(),
    };
    (dispatcher, worker)
}

/// A dispatcher and the raw receiving end of its queue.
pub(crate) fn queue() -> (Dispatcher, mpsc::UnboundedReceiver<TaskRequest>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Dispatcher { sender }, receiver)
}

/// Sending half of the work queue.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    sender: mpsc::UnboundedSender<TaskRequest>,
}

impl Dispatcher {
    /// Queues a request for background execution.
    ///
    /// # Errors
    ///
    /// Returns `WorkerUnavailable` once the worker has stopped.
    pub fn dispatch(&self, request: TaskRequest) -> Result<()> {
        self.sender
            .send(request)
            .map_err(|_| PagewrightError::WorkerUnavailable)
    }

    /// Whether the worker has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Receiving half of the work queue.
pub struct Worker {
    runner: Arc<RoundRunner>,
    receiver: mpsc::UnboundedReceiver<TaskRequest>,
    locks: TaskLocks,
}

impl Worker {
    /// Processes requests until every dispatcher is dropped and all
    /// in-flight jobs have finished.
    pub async fn run(mut self) {
        let mut jobs = JoinSet::new();
        loop {
            tokio::select! {
                Some(request) = self.receiver.recv() => {
                    debug!(task = %request.task, round = request.round, "Job received");
                    jobs.spawn(run_job(
                        Arc::clone(&self.runner),
                        self.locks.clone(),
                        request,
                    ));
                }
                Some(joined) = jobs.join_next(), if !jobs.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Round job panicked");
                    }
                }
                else => break,
            }
        }
        info!("Worker stopped");
    }
}

async fn run_job(runner: Arc<RoundRunner>, locks: TaskLocks, request: TaskRequest) {
    let lock = locks.acquire(&request.task);
    {
        let _serialized = lock.lock().await;
        match runner.run(&request).await {
            Ok(record) => {
                debug!(task = %record.task, round = record.round, "Job finished");
            }
            Err(e) if e.is_fatal() => {
                error!(
                    task = %request.task,
                    round = request.round,
                    error = %e,
                    "Job failed on configuration or credentials; later rounds will fail too"
                );
            }
            Err(_) => {}
        }
    }
    locks.release(&request.task, &lock);
}

/// One async mutex per task id, removed once nobody holds or awaits it.
#[derive(Debug, Clone, Default)]
struct TaskLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl TaskLocks {
    fn acquire(&self, task: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(map.entry(task.to_string()).or_default())
    }

    fn release(&self, task: &str, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and the caller hold the only references.
        if Arc::strong_count(lock) == 2 {
            map.remove(task);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
