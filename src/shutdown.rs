//! Signal-driven graceful shutdown with a bounded drain window.
//!
//! [`run_until_shutdown`] waits for an external termination signal or
//! cancellation of the governing token, then runs the caller's stop routine
//! under a fresh token with a fixed deadline. The deadline bounds the
//! graceful phase: once it elapses, every cooperative suspension point inside
//! the stop routine observes cancellation and the shutdown proceeds
//! regardless of pending work.

use std::time::Duration;

use async_trait::async_trait;
use std::future::Future;
use tracing::{error, info};

use crate::error::TaskResult;
use crate::token::CancellationToken;

/// Upper bound on the graceful drain phase.
pub const GRACEFUL_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

/// One-shot source of an external termination signal.
#[async_trait]
pub trait SignalSource: Send {
    /// Resolves when the termination signal is delivered.
    async fn recv(&mut self);
}

/// [`SignalSource`] backed by the process interrupt signal.
#[derive(Debug, Default)]
pub struct OsSignal;

#[async_trait]
impl SignalSource for OsSignal {
    async fn recv(&mut self) {
        if let Err(err) = tokio::signal::ctrl_c().await {
            // Failing to register the handler would otherwise leave shutdown
            // unreachable; surfacing it loudly is the best we can do here.
            error!(error = %err, "failed to listen for termination signal");
        }
    }
}

/// Waits for `signal` or cancellation of `token`, then runs `stop` under a
/// token that expires after [`GRACEFUL_SHUTDOWN_DEADLINE`].
pub async fn run_until_shutdown<S, F, Fut>(
    token: &CancellationToken,
    mut signal: S,
    stop: F,
) -> TaskResult<()>
where
    S: SignalSource,
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = TaskResult<()>>,
{
    tokio::select! {
        _ = signal.recv() => {
            info!("termination signal received, starting graceful shutdown");
        }
        cause = token.cancelled() => {
            info!(cause = ?cause, "token cancelled, starting graceful shutdown");
        }
    }

    // The stop token is a fresh root on purpose: shutdown work must proceed
    // even though the triggering token may already be cancelled.
    let stop_token = CancellationToken::with_deadline(GRACEFUL_SHUTDOWN_DEADLINE);
    stop(stop_token).await
}
