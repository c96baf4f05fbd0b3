//! Panic isolation for task invocations.
//!
//! [`PanicGuard`] wraps a task future so an unwinding panic inside it is
//! captured at the invocation boundary and converted into a reported
//! [`ErrorKind::InternalFault`] error instead of terminating the process or
//! tearing down sibling tasks. Ordinary task errors pass through unchanged,
//! with an optional observation hook.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use std::future::Future;
use tracing::error;

use crate::error::{ErrorKind, TaskError, TaskResult};
use crate::task_error;

type FaultHook = Arc<dyn Fn(&str) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&TaskError) + Send + Sync>;

/// Converts a panic into a reported error rather than an unwind.
///
/// Both hooks are optional; a guard with no hooks still captures panics and
/// converts them. The guard is cheaply cloneable so a pool can share one
/// across its workers.
#[derive(Clone, Default)]
pub struct PanicGuard {
    on_fault: Option<FaultHook>,
    on_error: Option<ErrorHook>,
}

impl PanicGuard {
    /// Creates a guard with no hooks installed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a hook invoked with the panic message whenever a guarded task
    /// panics.
    pub fn on_fault<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_fault = Some(Arc::new(hook));
        self
    }

    /// Installs a hook invoked whenever a guarded task returns an error.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&TaskError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Runs `future`, converting a panic into an [`ErrorKind::InternalFault`]
    /// error and routing it through the configured hooks.
    pub async fn run<T, Fut>(&self, future: Fut) -> TaskResult<T>
    where
        Fut: Future<Output = TaskResult<T>>,
    {
        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                if let Some(hook) = &self.on_error {
                    hook(&err);
                }
                Err(err)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(panic = %message, "guarded task panicked");

                if let Some(hook) = &self.on_fault {
                    hook(&message);
                }

                Err(task_error!(
                    ErrorKind::InternalFault,
                    "task panicked and was converted to an error",
                    message
                ))
            }
        }
    }
}

impl std::fmt::Debug for PanicGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanicGuard")
            .field("on_fault", &self.on_fault.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unrecoverable fault of unknown type".to_string()
    }
}
