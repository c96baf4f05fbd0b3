//! Bounded-parallelism execution over a sequence of tasks.
//!
//! [`BoundedExecutor`] admits at most `limit` concurrently running tasks by
//! acquiring a counting semaphore permit before each task is spawned. The
//! acquisition itself races cancellation, so a cancelled token unblocks a
//! submitter waiting for a permit; the pending task is then abandoned and its
//! absence is not reported as a failure distinct from the cancellation error.
//! Permits move into the spawned tasks and are released by drop on every exit
//! path. Aggregation follows [`TaskGroup`] semantics: first error wins.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, TaskResult};
use crate::group::TaskGroup;
use crate::metrics::Gauge;
use crate::token::CancellationToken;

/// Runs batches of tasks with a fixed concurrency ceiling.
#[derive(Debug)]
pub struct BoundedExecutor {
    limit: usize,
    running: Arc<Gauge>,
}

impl BoundedExecutor {
    /// Creates an executor admitting at most `limit` tasks at once.
    pub fn new(limit: usize) -> TaskResult<Self> {
        if limit == 0 {
            bail!(
                ErrorKind::ConfigError,
                "invalid concurrency limit",
                "limit must be >= 1"
            );
        }

        Ok(Self {
            limit,
            running: Arc::new(Gauge::new()),
        })
    }

    /// Returns the configured concurrency limit.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Gauge of currently running tasks, with a high-watermark across all
    /// [`BoundedExecutor::run_all`] calls on this executor.
    pub fn running(&self) -> &Gauge {
        &self.running
    }

    /// Runs every task in `tasks` under `token`, never letting more than the
    /// configured limit run concurrently. Returns the first task error, the
    /// cancellation error if the token cancelled while waiting for a permit,
    /// or `Ok(())` once all tasks completed.
    pub async fn run_all<I, F, Fut>(
        &self,
        token: &CancellationToken,
        tasks: I,
    ) -> TaskResult<()>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = TaskResult<()>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let mut group = TaskGroup::new(token);
        let mut admission_cancelled = false;

        for task in tasks {
            let permit = tokio::select! {
                acquired = semaphore.clone().acquire_owned() => match acquired {
                    Ok(permit) => permit,
                    // The semaphore is never closed while we hold it.
                    Err(_) => bail!(ErrorKind::InvalidState, "executor semaphore closed"),
                },
                _ = group.token().cancelled() => {
                    debug!("cancelled while waiting for a permit, abandoning remaining tasks");
                    admission_cancelled = true;
                    break;
                }
            };

            let running = self.running.clone();
            group.spawn(move |task_token| {
                let future = task(task_token);
                async move {
                    let _permit = permit;
                    running.increment();
                    let result = future.await;
                    running.decrement();
                    result
                }
            });
        }

        group.wait().await?;
        if admission_cancelled {
            token.check()?;
        }

        Ok(())
    }
}
