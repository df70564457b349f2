// Worker pool - bounded background execution of task continuations
//
// Each submitted job gets a CancellationToken keyed by its local task id.
// A semaphore bounds how many jobs run at once; jobs waiting for a permit
// still observe cancellation. The job owns its task's terminal write, the
// pool only tracks liveness.

pub mod poll;

pub use poll::PollSchedule;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};

use crate::metrics::Metrics;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error("Worker pool is shutting down")]
    ShuttingDown,

    #[error("A continuation is already running for task {0}")]
    AlreadyRunning(String),

    #[error("Invalid worker pool size: {0}")]
    InvalidSize(usize),
}

/// One-shot cancellation signal shared between the pool and a job
#[derive(Debug, Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            sender: Arc::new(tx),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once `cancel` has been called (immediately if it already was)
    pub async fn cancelled(&self) {
        let mut rx = self.sender.subscribe();
        // The sender lives in self, so the channel cannot close under us
        let _ = rx.wait_for(|&cancelled| cancelled).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

struct PoolInner {
    semaphore: Arc<Semaphore>,
    tokens: Mutex<HashMap<String, CancellationToken>>,
    in_flight: watch::Sender<usize>,
    closed: AtomicBool,
    metrics: Arc<Metrics>,
}

/// Removes the job's token and decrements the in-flight count, also on panic
struct JobGuard {
    task_id: String,
    inner: Arc<PoolInner>,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.inner.tokens.lock().remove(&self.task_id);
        self.inner.metrics.decrement_active_tasks();
        // Last, so `wait_idle` observers see everything else settled
        self.inner
            .in_flight
            .send_modify(|n| *n = n.saturating_sub(1));
    }
}

#[derive(Clone)]
pub struct TaskWorkerPool {
    inner: Arc<PoolInner>,
    max_concurrent: usize,
}

impl TaskWorkerPool {
    pub fn new(max_concurrent: usize) -> Result<Self, WorkerError> {
        Self::with_metrics(max_concurrent, Arc::new(Metrics::new()))
    }

    pub fn with_metrics(max_concurrent: usize, metrics: Arc<Metrics>) -> Result<Self, WorkerError> {
        if max_concurrent == 0 {
            return Err(WorkerError::InvalidSize(max_concurrent));
        }

        let (in_flight, _rx) = watch::channel(0usize);
        Ok(Self {
            inner: Arc::new(PoolInner {
                semaphore: Arc::new(Semaphore::new(max_concurrent)),
                tokens: Mutex::new(HashMap::new()),
                in_flight,
                closed: AtomicBool::new(false),
                metrics,
            }),
            max_concurrent,
        })
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of jobs submitted and not yet finished (running or queued)
    pub fn in_flight(&self) -> usize {
        *self.inner.in_flight.borrow()
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.inner.tokens.lock().contains_key(task_id)
    }

    /// Spawn the job built by `job` for `task_id`
    ///
    /// The job is started even if it is cancelled while queued, so it can
    /// record its own cancellation.
    pub fn submit<F, Fut>(&self, task_id: &str, job: F) -> Result<CancellationToken, WorkerError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(WorkerError::ShuttingDown);
        }

        let token = CancellationToken::new();
        {
            let mut tokens = self.inner.tokens.lock();
            if tokens.contains_key(task_id) {
                return Err(WorkerError::AlreadyRunning(task_id.to_string()));
            }
            tokens.insert(task_id.to_string(), token.clone());
        }
        self.inner.in_flight.send_modify(|n| *n += 1);
        self.inner.metrics.increment_active_tasks();

        let guard = JobGuard {
            task_id: task_id.to_string(),
            inner: self.inner.clone(),
        };
        let semaphore = self.inner.semaphore.clone();
        let job_token = token.clone();

        tokio::spawn(async move {
            let _permit = tokio::select! {
                biased;
                _ = job_token.cancelled() => None,
                permit = semaphore.acquire_owned() => permit.ok(),
            };

            tracing::debug!(task_id = %guard.task_id, "Continuation started");
            job(job_token).await;
            drop(guard);
        });

        Ok(token)
    }

    /// Trip the cancellation token of a running job
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.inner.tokens.lock().get(task_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(task_id = task_id, "Cancellation requested");
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let tokens = self.inner.tokens.lock();
        for token in tokens.values() {
            token.cancel();
        }
        tokens.len()
    }

    /// Wait until no job is in flight
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.in_flight.subscribe();
        let _ = rx.wait_for(|&n| n == 0).await;
    }

    /// Refuse new jobs, cancel running ones and wait up to `grace` for them to finish
    ///
    /// Returns false if jobs were still running when the grace period ran out.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.inner.closed.store(true, Ordering::SeqCst);
        let cancelled = self.cancel_all();
        tracing::info!(cancelled, "Worker pool shutting down");

        let drained = tokio::time::timeout(grace, self.wait_idle()).await.is_ok();
        if !drained {
            tracing::warn!(
                remaining = self.in_flight(),
                "Worker pool shutdown grace period elapsed"
            );
        }
        drained
    }
}
