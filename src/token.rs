//! Propagatable cancellation tokens with optional deadlines.
//!
//! A [`CancellationToken`] is an explicit value passed to every suspension
//! point in the toolkit: permit acquisition, bounded send/receive, backoff
//! sleeps and group joins all race against [`CancellationToken::cancelled`]
//! so no suspension point can block forever once its token is cancelled.
//!
//! Tokens form a tree. Cancelling a parent cancels every derived child;
//! cancelling a child never affects the parent. The transition to the
//! cancelled state is monotonic: the first recorded [`CancelCause`] is never
//! overwritten.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Either, pending};
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::watch;
use tokio::time::{Instant, Sleep, sleep_until};
use tracing::debug;

use crate::error::{ErrorKind, TaskResult};
use crate::task_error;

/// Reason a token transitioned to the cancelled state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// A caller explicitly requested cancellation.
    Cancelled,
    /// The token's deadline elapsed.
    DeadlineExceeded,
}

impl CancelCause {
    /// Converts this cause into the matching [`crate::error::TaskError`].
    pub(crate) fn into_error(self) -> crate::error::TaskError {
        match self {
            CancelCause::Cancelled => task_error!(ErrorKind::Cancelled, "operation cancelled"),
            CancelCause::DeadlineExceeded => {
                task_error!(ErrorKind::DeadlineExceeded, "deadline exceeded")
            }
        }
    }
}

#[derive(Debug)]
struct TokenInner {
    /// Cancellation state. Once `Some`, never rewritten.
    state: watch::Sender<Option<CancelCause>>,
    /// Absolute deadline after which the token observes itself as cancelled.
    deadline: Option<Instant>,
    /// Link to the parent token, if this token was derived via [`CancellationToken::child`].
    parent: Option<CancellationToken>,
}

/// Cooperative cancellation signal with an optional deadline.
///
/// Cloning a token is cheap and produces a handle to the same underlying
/// state; use [`CancellationToken::child`] to derive an independently
/// cancellable token that still observes ancestor cancellation.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl CancellationToken {
    /// Creates a new root token with no deadline.
    pub fn new() -> Self {
        Self::build(None, None)
    }

    /// Creates a new root token that cancels itself once `timeout` elapses.
    pub fn with_deadline(timeout: Duration) -> Self {
        Self::build(Some(Instant::now() + timeout), None)
    }

    /// Creates a new root token with an absolute deadline.
    pub fn with_deadline_at(deadline: Instant) -> Self {
        Self::build(Some(deadline), None)
    }

    /// Derives a child token. The child observes cancellation of this token
    /// and of every ancestor, but cancelling the child leaves them untouched.
    pub fn child(&self) -> Self {
        Self::build(None, Some(self.clone()))
    }

    /// Derives a child token with its own deadline. The effective deadline is
    /// the earliest among the child's and every ancestor's.
    pub fn child_with_deadline(&self, timeout: Duration) -> Self {
        Self::build(Some(Instant::now() + timeout), Some(self.clone()))
    }

    fn build(deadline: Option<Instant>, parent: Option<CancellationToken>) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            inner: Arc::new(TokenInner {
                state,
                deadline,
                parent,
            }),
        }
    }

    /// Requests cancellation. Idempotent; the first cause wins.
    pub fn cancel(&self) {
        if self.cancel_with(CancelCause::Cancelled) {
            debug!("cancellation requested");
        }
    }

    /// Records `cause` if the token is still live. Returns whether the state changed.
    fn cancel_with(&self, cause: CancelCause) -> bool {
        self.inner.state.send_if_modified(|state| {
            if state.is_none() {
                *state = Some(cause);
                true
            } else {
                false
            }
        })
    }

    /// Returns the configured deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Returns the cancellation cause, observing an elapsed deadline and
    /// ancestor cancellation lazily.
    pub fn cancel_cause(&self) -> Option<CancelCause> {
        if let Some(cause) = *self.inner.state.borrow() {
            return Some(cause);
        }

        if let Some(deadline) = self.inner.deadline
            && Instant::now() >= deadline
        {
            self.cancel_with(CancelCause::DeadlineExceeded);
            return *self.inner.state.borrow();
        }

        if let Some(parent) = &self.inner.parent
            && let Some(cause) = parent.cancel_cause()
        {
            self.cancel_with(cause);
            return *self.inner.state.borrow();
        }

        None
    }

    /// Returns `true` once the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_cause().is_some()
    }

    /// Cheap suspension-point check: `Ok(())` while live, the cancellation
    /// error once cancelled.
    pub fn check(&self) -> TaskResult<()> {
        match self.cancel_cause() {
            Some(cause) => Err(cause.into_error()),
            None => Ok(()),
        }
    }

    /// Resolves once the token is cancelled, returning the cause.
    ///
    /// Ancestor cancellation and deadline expiry both resolve this future;
    /// the observed cause is recorded on this token so subsequent calls are
    /// immediate.
    pub async fn cancelled(&self) -> CancelCause {
        self.cancelled_boxed().await
    }

    /// Boxed recursive implementation of [`CancellationToken::cancelled`];
    /// the parent link makes the future type self-referential otherwise.
    fn cancelled_boxed(&self) -> BoxFuture<'_, CancelCause> {
        async move {
            loop {
                if let Some(cause) = self.cancel_cause() {
                    return cause;
                }

                let mut rx = self.inner.state.subscribe();
                if let Some(cause) = *rx.borrow_and_update() {
                    return cause;
                }

                let parent = match &self.inner.parent {
                    Some(parent) => Either::Left(parent.cancelled_boxed()),
                    None => Either::Right(pending()),
                };
                let deadline = DeadlineFuture::new(self.inner.deadline);

                tokio::select! {
                    _ = rx.changed() => {}
                    cause = parent => {
                        self.cancel_with(cause);
                    }
                    _ = deadline => {
                        self.cancel_with(CancelCause::DeadlineExceeded);
                    }
                }
            }
        }
        .boxed()
    }

    /// Runs `future` to completion unless the token cancels first, in which
    /// case the cancellation error is returned and the future is dropped.
    pub async fn run_until_cancelled<F>(&self, future: F) -> TaskResult<F::Output>
    where
        F: Future,
    {
        tokio::select! {
            output = future => Ok(output),
            cause = self.cancelled() => Err(cause.into_error()),
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

pin_project! {
    /// Future that resolves once an optional deadline elapses.
    ///
    /// Stays pending forever when no deadline is configured, which makes it a
    /// convenient always-armed branch inside `tokio::select!`.
    #[derive(Debug)]
    struct DeadlineFuture {
        #[pin]
        sleep: Option<Sleep>,
    }
}

impl DeadlineFuture {
    fn new(deadline: Option<Instant>) -> Self {
        Self {
            sleep: deadline.map(sleep_until),
        }
    }
}

impl Future for DeadlineFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project().sleep.as_pin_mut() {
            Some(sleep) => sleep.poll(cx),
            None => Poll::Pending,
        }
    }
}
