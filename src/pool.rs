//! Long-lived worker pool with idempotent graceful shutdown.
//!
//! A [`WorkerPool`] owns a fixed set of workers consuming a bounded FIFO job
//! queue. Jobs submitted while the pool is running are guaranteed to execute;
//! once shutdown begins, further submissions are silently dropped — an
//! explicit at-most-once-shutdown contract. [`WorkerPool::shutdown`] closes
//! the intake, waits for every worker to finish its current and already
//! queued jobs, then transitions to the terminal `Stopped` state. The drain
//! sequence runs exactly once no matter how many callers invoke shutdown
//! concurrently; late callers simply wait for the stopped state.
//!
//! The pool never propagates individual job errors to the submitter: its
//! contract is "drain", not "report". A job that cares about its outcome
//! attaches a completion channel via [`PoolJob::with_completion`].

use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::bail;
use crate::error::{ErrorKind, TaskResult};
use crate::guard::PanicGuard;
use crate::token::CancellationToken;

/// Lifecycle states of a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Accepting and executing jobs.
    Running,
    /// Intake closed; workers are finishing queued jobs.
    Draining,
    /// All workers have exited. Terminal.
    Stopped,
}

type BoxedJob = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, TaskResult<()>> + Send>;

/// A queued unit of work plus an optional completion notification.
///
/// Ownership transfers from the submitter to whichever worker dequeues it.
pub struct PoolJob {
    task: BoxedJob,
    completion: Option<oneshot::Sender<TaskResult<()>>>,
}

impl PoolJob {
    /// Wraps a task future factory into a job.
    pub fn new<F, Fut>(task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult<()>> + Send + 'static,
    {
        Self {
            task: Box::new(move |token| task(token).boxed()),
            completion: None,
        }
    }

    /// Attaches a channel the executing worker reports the job result on.
    pub fn with_completion(mut self, completion: oneshot::Sender<TaskResult<()>>) -> Self {
        self.completion = Some(completion);
        self
    }
}

impl std::fmt::Debug for PoolJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolJob")
            .field("completion", &self.completion.is_some())
            .finish()
    }
}

/// Fixed-size pool of workers consuming a bounded job queue.
#[derive(Debug)]
pub struct WorkerPool {
    /// Intake side of the queue; taken (and dropped) when shutdown begins.
    job_tx: Mutex<Option<mpsc::Sender<PoolJob>>>,
    state: watch::Sender<PoolState>,
    workers: tokio::sync::Mutex<JoinSet<()>>,
    token: CancellationToken,
}

impl WorkerPool {
    /// Starts `workers` workers consuming a queue of at most `queue_capacity`
    /// jobs (minimum 1). Jobs receive a child of `token`.
    pub fn new(
        workers: usize,
        queue_capacity: usize,
        token: &CancellationToken,
    ) -> TaskResult<Self> {
        Self::with_guard(workers, queue_capacity, token, PanicGuard::new())
    }

    /// Like [`WorkerPool::new`], with a caller-provided [`PanicGuard`] so
    /// faults inside jobs can be observed through its hooks.
    pub fn with_guard(
        workers: usize,
        queue_capacity: usize,
        token: &CancellationToken,
        guard: PanicGuard,
    ) -> TaskResult<Self> {
        if workers == 0 {
            bail!(
                ErrorKind::ConfigError,
                "invalid worker pool",
                "workers must be >= 1"
            );
        }

        let (job_tx, job_rx) = mpsc::channel(queue_capacity.max(1));
        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));
        let pool_token = token.child();
        let (state, _) = watch::channel(PoolState::Running);

        let mut join_set = JoinSet::new();
        for worker_id in 0..workers {
            join_set.spawn(worker_loop(
                worker_id,
                job_rx.clone(),
                pool_token.clone(),
                guard.clone(),
            ));
        }

        info!(workers, "worker pool started");

        Ok(Self {
            job_tx: Mutex::new(Some(job_tx)),
            state,
            workers: tokio::sync::Mutex::new(join_set),
            token: pool_token,
        })
    }

    /// Returns the pool's current lifecycle state.
    pub fn state(&self) -> PoolState {
        *self.state.borrow()
    }

    /// Enqueues `job` while the pool is running, blocking when the queue is
    /// full. Once shutdown has begun the job is silently dropped.
    pub async fn submit(&self, job: PoolJob) {
        let intake = {
            self.job_tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        };

        let Some(intake) = intake else {
            debug!("pool is shutting down, dropping submitted job");
            return;
        };

        if intake.send(job).await.is_err() {
            debug!("pool intake closed, dropping submitted job");
        }
    }

    /// Drains and stops the pool. Idempotent: the drain sequence runs exactly
    /// once; every caller returns only after the pool reached `Stopped`, with
    /// all jobs submitted before the first call completed.
    pub async fn shutdown(&self) {
        let is_first = self.state.send_if_modified(|state| {
            if *state == PoolState::Running {
                *state = PoolState::Draining;
                true
            } else {
                false
            }
        });

        if !is_first {
            let mut state_rx = self.state.subscribe();
            let _ = state_rx.wait_for(|state| *state == PoolState::Stopped).await;
            return;
        }

        info!("worker pool draining");

        // Dropping the sender closes the intake; workers drain the remaining
        // queue and then observe the closed channel.
        self.job_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let mut workers = self.workers.lock().await;
        while let Some(joined) = workers.join_next().await {
            if let Err(join_err) = joined {
                error!(error = %join_err, "pool worker terminated abnormally");
            }
        }

        self.state.send_replace(PoolState::Stopped);
        info!("worker pool stopped");
    }

    /// Token handed to executing jobs; cancelling it asks in-flight jobs to
    /// stop cooperatively but does not bypass the drain contract.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Worker loop: dequeue, guard, execute, report.
async fn worker_loop(
    worker_id: usize,
    jobs: Arc<tokio::sync::Mutex<mpsc::Receiver<PoolJob>>>,
    token: CancellationToken,
    guard: PanicGuard,
) {
    loop {
        // The receive lock is only held while waiting for one job, so the
        // queue is torn down only after every dequeued job has finished.
        let job = { jobs.lock().await.recv().await };
        let Some(job) = job else {
            break;
        };

        let result = guard.run((job.task)(token.clone())).await;
        if let Err(err) = &result {
            error!(worker_id, error = %err, "pool job failed");
        }

        if let Some(completion) = job.completion {
            // The submitter may have stopped listening; that is its choice.
            let _ = completion.send(result);
        }
    }

    debug!(worker_id, "worker exited");
}
