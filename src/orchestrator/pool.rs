//! Bounded worker pool executing capture jobs.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinError, JoinHandle};

/// Default number of workers.
pub const DEFAULT_WORKERS: usize = 8;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Errors from the worker pool.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// The pool no longer accepts work.
    #[error("worker pool is closed")]
    Closed,
}

type BoxedJob = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Deferred unit of work, consumed once.
pub struct Job {
    label: String,
    task: BoxedJob,
}

impl Job {
    pub fn new<F>(label: impl Into<String>, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            label: label.into(),
            task: Box::pin(task),
        }
    }

    /// Label used when the job fails (the instance address).
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Cloneable submit handle.
#[derive(Debug, Clone)]
pub struct PoolSubmitter {
    tx: mpsc::Sender<Job>,
}

impl PoolSubmitter {
    /// Enqueue a job, waiting while the queue is full.
    ///
    /// # Errors
    /// `PoolError::Closed` once the workers are gone.
    pub async fn submit(&self, job: Job) -> Result<(), PoolError> {
        self.tx.send(job).await.map_err(|_| PoolError::Closed)
    }
}

/// Fixed number of workers pulling from one bounded queue.
///
/// Lifecycle: `start` -> `submit`* -> `close` -> `join`.
pub struct WorkerPool {
    worker_count: usize,
    tx: Option<mpsc::Sender<Job>>,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Create a pool; zero values are clamped to 1.
    pub fn new(worker_count: usize, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        Self {
            worker_count: worker_count.max(1),
            tx: Some(tx),
            rx: Arc::new(Mutex::new(rx)),
            workers: Vec::new(),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Spawn the workers. Calling it again is a no-op.
    pub fn start(&mut self) {
        if !self.workers.is_empty() {
            return;
        }
        for id in 0..self.worker_count {
            let rx = Arc::clone(&self.rx);
            self.workers.push(tokio::spawn(worker_loop(id, rx)));
        }
        tracing::info!(workers = self.worker_count, "Worker pool started");
    }

    /// Submit handle for producers.
    ///
    /// # Errors
    /// `PoolError::Closed` after [`close`](Self::close).
    pub fn submitter(&self) -> Result<PoolSubmitter, PoolError> {
        self.tx
            .clone()
            .map(|tx| PoolSubmitter { tx })
            .ok_or(PoolError::Closed)
    }

    /// Enqueue a job, waiting while the queue is full.
    ///
    /// # Errors
    /// `PoolError::Closed` after [`close`](Self::close).
    pub async fn submit(&self, job: Job) -> Result<(), PoolError> {
        match &self.tx {
            Some(tx) => tx.send(job).await.map_err(|_| PoolError::Closed),
            None => Err(PoolError::Closed),
        }
    }

    /// Stop accepting work. The queue closes once every submitter is dropped.
    pub fn close(&mut self) {
        self.tx = None;
    }

    /// Wait until the workers drained the queue and exited.
    pub async fn join(mut self) {
        self.close();
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Worker task ended abnormally");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("worker_count", &self.worker_count)
            .field("started", &!self.workers.is_empty())
            .field("closed", &self.tx.is_none())
            .finish()
    }
}

async fn worker_loop(id: usize, rx: Arc<Mutex<mpsc::Receiver<Job>>>) {
    loop {
        // Lock only while waiting so other workers can pick up jobs while this
        // one runs.
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else { break };

        let Job { label, task } = job;
        if let Err(e) = tokio::spawn(task).await {
            report_job_failure(id, &label, e);
        }
    }
    tracing::debug!(worker = id, "Worker exited");
}

fn report_job_failure(worker: usize, label: &str, err: JoinError) {
    if err.is_panic() {
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        tracing::error!(worker, instance = %label, panic = %message, "Capture job panicked");
    } else {
        tracing::error!(worker, instance = %label, error = %err, "Capture job cancelled");
    }
}
