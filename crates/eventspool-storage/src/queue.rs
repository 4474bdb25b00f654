//! Single-worker FIFO task queue.
//!
//! Each feature owns one queue; every storage operation of that feature runs
//! on it, one at a time, in submission order. Jobs run on the blocking pool
//! because they do file I/O.

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::{StorageError, StorageResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum QueueTask {
    Run(Job),
    Shutdown(oneshot::Sender<()>),
}

/// Serializes jobs onto one worker.
pub struct FeatureQueue {
    name: String,
    sender: mpsc::UnboundedSender<QueueTask>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FeatureQueue {
    /// Starts the worker. Must be called inside a tokio runtime.
    pub fn start(name: impl Into<String>) -> Self {
        let name = name.into();
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(Self::run(name.clone(), receiver));
        debug!(queue = %name, "feature queue started");
        Self {
            name,
            sender,
            worker: Mutex::new(Some(worker)),
        }
    }

    async fn run(name: String, mut receiver: mpsc::UnboundedReceiver<QueueTask>) {
        while let Some(task) = receiver.recv().await {
            match task {
                QueueTask::Run(job) => {
                    if let Err(e) = tokio::task::spawn_blocking(job).await {
                        error!(queue = %name, error = %e, "queued job panicked");
                    }
                }
                QueueTask::Shutdown(done) => {
                    receiver.close();
                    let _ = done.send(());
                    break;
                }
            }
        }
        debug!(queue = %name, "feature queue stopped");
    }

    /// Queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the queue still accepts jobs.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Enqueues `job` without waiting for it.
    pub fn submit<F>(&self, job: F) -> StorageResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender
            .send(QueueTask::Run(Box::new(job)))
            .map_err(|_| self.closed())
    }

    /// Enqueues `job` and waits for its result.
    pub async fn run_job<F, R>(&self, job: F) -> StorageResult<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(move || {
            let _ = tx.send(job());
        })?;
        rx.await.map_err(|_| self.closed())
    }

    /// Runs every job queued so far, then stops the worker.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(QueueTask::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(queue = %self.name, error = %e, "feature queue worker failed");
            }
        }
    }

    fn closed(&self) -> StorageError {
        StorageError::QueueClosed {
            queue: self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_jobs_run_in_submission_order() {
        let queue = FeatureQueue::start("logs");
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..20 {
            let seen = seen.clone();
            queue.submit(move || seen.lock().push(i)).unwrap();
        }
        let count = queue.run_job({
            let seen = seen.clone();
            move || seen.lock().len()
        });
        assert_eq!(count.await.unwrap(), 20);
        assert_eq!(*seen.lock(), (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_run_job_returns_value() {
        let queue = FeatureQueue::start("rum");
        assert_eq!(queue.run_job(|| 41 + 1).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_rejects() {
        let queue = FeatureQueue::start("traces");
        let seen = Arc::new(Mutex::new(0));
        for _ in 0..5 {
            let seen = seen.clone();
            queue.submit(move || *seen.lock() += 1).unwrap();
        }
        queue.shutdown().await;
        assert_eq!(*seen.lock(), 5);
        assert!(!queue.is_running());

        let err = queue.run_job(|| ()).await.unwrap_err();
        assert!(matches!(err, StorageError::QueueClosed { ref queue } if queue == "traces"));
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_stop_queue() {
        let queue = FeatureQueue::start("crash");
        let failed = queue.run_job(|| -> u8 { panic!("boom") }).await;
        assert!(failed.is_err());
        assert_eq!(queue.run_job(|| 7).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_shutdown_twice_is_harmless() {
        let queue = FeatureQueue::start("twice");
        queue.shutdown().await;
        queue.shutdown().await;
    }
}
