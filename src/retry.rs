//! Retry with exponential backoff and jitter, plus a restart supervisor.
//!
//! [`RetryPolicy::retry`] repeats a fallible operation until success, attempt
//! exhaustion or cancellation. The backoff sleep itself races the token, so
//! cancellation during backoff aborts the loop with the cancellation error
//! rather than the last task error. Exhausting attempts returns the last task
//! error unchanged — there is no dedicated "retries exhausted" kind, which
//! keeps retryable failure distinguishable from cancellation.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::bail;
use crate::error::{ErrorKind, TaskError, TaskResult};
use crate::token::CancellationToken;

/// Backoff schedule for retrying a fallible operation.
///
/// Built directly or deserialized through [`crate::config::RetryConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: f64,
}

impl RetryPolicy {
    /// Ceiling applied to the doubling delay.
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);

    /// Fraction of the delay added as random jitter.
    pub const DEFAULT_JITTER: f64 = 0.1;

    /// Creates a policy performing at most `max_attempts` invocations with an
    /// initial backoff of `base_delay`, doubling after each failure.
    pub fn new(max_attempts: u32, base_delay: Duration) -> TaskResult<Self> {
        if max_attempts == 0 {
            bail!(
                ErrorKind::ConfigError,
                "invalid retry policy",
                "max_attempts must be >= 1"
            );
        }
        if base_delay.is_zero() {
            bail!(
                ErrorKind::ConfigError,
                "invalid retry policy",
                "base_delay must be positive"
            );
        }

        Ok(Self {
            max_attempts,
            base_delay,
            max_delay: Self::DEFAULT_MAX_DELAY,
            jitter: Self::DEFAULT_JITTER,
        })
    }

    /// Overrides the delay ceiling.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Overrides the jitter fraction, clamped to `[0, 1]`.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Returns the configured maximum number of invocations.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Invokes `op` until it succeeds, attempts are exhausted or `token`
    /// cancels. `op` receives the 1-based attempt number.
    pub async fn retry<T, F, Fut>(&self, token: &CancellationToken, mut op: F) -> TaskResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = TaskResult<T>>,
    {
        let mut delay = self.base_delay;

        for attempt in 1..=self.max_attempts {
            token.check()?;

            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt == self.max_attempts => return Err(err),
                Err(err) => err,
            };

            let jitter = delay.mul_f64(self.jitter * rand::thread_rng().r#gen::<f64>());
            let backoff = delay + jitter;
            debug!(
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "attempt failed, backing off before retry"
            );

            tokio::select! {
                _ = sleep(backoff) => {}
                cause = token.cancelled() => return Err(cause.into_error()),
            }

            delay = delay.saturating_mul(2).min(self.max_delay);
        }

        // max_attempts >= 1 is enforced in `new`, so the loop always returns.
        bail!(ErrorKind::InvalidState, "retry policy permitted no attempts")
    }
}

/// Restarts `task` under a fresh child token after each failure, waiting
/// `attempt * base_delay` between restarts. Returns the first success, the
/// last failure after `max_restarts` runs, or the cancellation error if
/// `token` cancels during a pause.
pub async fn supervise<F, Fut>(
    token: &CancellationToken,
    max_restarts: u32,
    base_delay: Duration,
    mut task: F,
) -> TaskResult<()>
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = TaskResult<()>>,
{
    if max_restarts == 0 {
        bail!(
            ErrorKind::ConfigError,
            "invalid supervisor configuration",
            "max_restarts must be >= 1"
        );
    }

    let mut last_error: Option<TaskError> = None;

    for attempt in 1..=max_restarts {
        token.check()?;

        let run_token = token.child();
        match task(run_token).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                warn!(attempt, error = %err, "supervised task failed");
                last_error = Some(err);
            }
        }

        if attempt < max_restarts {
            tokio::select! {
                _ = sleep(base_delay * attempt) => {}
                cause = token.cancelled() => return Err(cause.into_error()),
            }
        }
    }

    match last_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
