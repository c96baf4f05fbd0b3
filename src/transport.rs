//! Outbound transport boundary and parallel fetch helper.
//!
//! The toolkit consumes an HTTP-like transport only at this seam: a
//! [`Transport`] issues one request given a target and a token, and must
//! honor cancellation by aborting in-flight requests promptly. [`fetch_all`]
//! fans a set of targets out as [`TaskGroup`] members under a deadline token,
//! fails fast on the first bad response, and returns statuses in input order.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use crate::error::{ErrorKind, TaskResult};
use crate::group::TaskGroup;
use crate::task_error;
use crate::token::CancellationToken;

/// Response produced by a [`Transport`] request.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// Protocol status code.
    pub status: u16,
    /// Response payload.
    pub body: Bytes,
}

/// Transport-level failures, attached to [`crate::error::TaskError`] as a source.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection to the target could not be established.
    #[error("connection to {0} failed: {1}")]
    ConnectionFailed(String, String),
    /// The request did not complete in time.
    #[error("request to {0} timed out")]
    Timeout(String),
    /// The request was aborted before completion.
    #[error("request to {0} aborted")]
    Aborted(String),
}

/// Issues a single outbound request.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one request to `target`. Implementations must abort promptly
    /// once `token` cancels.
    async fn send(&self, target: &str, token: &CancellationToken)
    -> TaskResult<TransportResponse>;
}

/// Fetches every target in parallel under a deadline, returning the statuses
/// in input order. The first failing request — transport error or status
/// >= 400 — cancels the remaining ones.
pub async fn fetch_all<T>(
    transport: Arc<T>,
    targets: Vec<String>,
    timeout: Duration,
) -> TaskResult<Vec<u16>>
where
    T: Transport + 'static,
{
    let deadline_token = CancellationToken::with_deadline(timeout);
    let mut group = TaskGroup::new(&deadline_token);

    let statuses: Arc<Mutex<Vec<Option<u16>>>> = Arc::new(Mutex::new(vec![None; targets.len()]));

    for (index, target) in targets.into_iter().enumerate() {
        let transport = transport.clone();
        let statuses = statuses.clone();

        group.spawn(move |token| async move {
            let response = transport.send(&target, &token).await?;

            if response.status >= 400 {
                return Err(task_error!(
                    ErrorKind::TransportFailed,
                    "unexpected response status",
                    format!("status {} from {target}", response.status)
                ));
            }

            debug!(target = %target, status = response.status, "request completed");
            statuses
                .lock()
                .unwrap_or_else(PoisonError::into_inner)[index] = Some(response.status);
            Ok(())
        });
    }

    group.wait().await?;

    let statuses = statuses.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(statuses.iter().map(|status| status.unwrap_or(0)).collect())
}
