//! Structured task groups with first-error-wins aggregation.
//!
//! A [`TaskGroup`] runs a set of tasks under one derived cancellation token
//! and joins them as a unit. The first task to fail writes the group's
//! write-once error slot and cancels the group's token; sibling tasks observe
//! the cancellation at their next suspension point and are expected to stop
//! promptly, but they are never force-killed. Errors after the first are
//! logged and discarded, a deliberate simplicity tradeoff — callers that need
//! every error must collect them inside their own tasks before reporting to
//! the group.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::{ErrorKind, TaskError, TaskResult};
use crate::task_error;
use crate::token::CancellationToken;

/// A set of concurrently running tasks sharing one lifetime, one token and
/// one error outcome.
///
/// [`TaskGroup::wait`] consumes the group, which makes spawning after the
/// join unrepresentable.
#[derive(Debug)]
pub struct TaskGroup {
    token: CancellationToken,
    /// First recorded error, written once at completion time by whichever
    /// member fails first.
    first_error: Arc<Mutex<Option<TaskError>>>,
    join_set: JoinSet<()>,
}

/// Writes `err` into the slot if it is still empty and cancels `token`;
/// otherwise the error is discarded.
fn record_first_error(
    slot: &Mutex<Option<TaskError>>,
    token: &CancellationToken,
    err: TaskError,
) {
    let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.is_none() {
        *slot = Some(err);
        token.cancel();
    } else {
        warn!(error = %err, "discarding task error after the first");
    }
}

impl TaskGroup {
    /// Creates an empty group whose token is a child of `parent`.
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child(),
            first_error: Arc::new(Mutex::new(None)),
            join_set: JoinSet::new(),
        }
    }

    /// Returns the group's token. Members receive a clone of it, and external
    /// code may use it to cancel the whole group.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns the number of tasks still owned by the group.
    pub fn len(&self) -> usize {
        self.join_set.len()
    }

    /// Returns `true` when no tasks have been spawned or all have been joined.
    pub fn is_empty(&self) -> bool {
        self.join_set.is_empty()
    }

    /// Registers a task to run concurrently under the group's token.
    ///
    /// A failing member records its error and cancels the group token the
    /// moment it completes, so siblings blocked at suspension points unblock
    /// without waiting for [`TaskGroup::wait`] to run.
    pub fn spawn<F, Fut>(&mut self, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = TaskResult<()>> + Send + 'static,
    {
        let token = self.token.clone();
        let slot = self.first_error.clone();
        let future = task(token.clone());

        self.join_set.spawn(async move {
            if let Err(err) = future.await {
                record_first_error(&slot, &token, err);
            }
        });
    }

    /// Waits for every spawned task to finish and returns the first error
    /// recorded in completion order, or `Ok(())` if none failed.
    ///
    /// A task that panics is observed at the join boundary, recorded as
    /// [`ErrorKind::TaskPanic`] and competes for the first-error slot like
    /// any other failure.
    pub async fn wait(mut self) -> TaskResult<()> {
        while let Some(joined) = self.join_set.join_next().await {
            if let Err(join_err) = joined {
                if join_err.is_cancelled() {
                    debug!("group task was cancelled before completion");
                } else {
                    record_first_error(
                        &self.first_error,
                        &self.token,
                        task_error!(ErrorKind::TaskPanic, "group task panicked", join_err),
                    );
                }
            }
        }

        let first_error = self
            .first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
