//! Error types and result definitions for the task toolkit.
//!
//! Provides a structured error system with classification and captured callsite
//! metadata. [`TaskError`] is the single error type flowing through task groups,
//! executors, pipelines and pools; component-local error enums attach to it as
//! sources via [`TaskError::with_source`].

use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for toolkit operations using [`TaskError`] as the error type.
pub type TaskResult<T> = Result<T, TaskError>;

/// Specific categories of failures that can occur while running tasks.
///
/// The taxonomy is deliberately small: cancellation and deadline expiry are
/// distinguished from ordinary task failures so that retry and group logic can
/// treat them differently. Retries exhausting their attempts surface the last
/// task error unchanged rather than a dedicated kind.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The governing [`crate::token::CancellationToken`] was cancelled by a caller.
    Cancelled,
    /// The governing token's deadline elapsed.
    DeadlineExceeded,
    /// An opaque error returned by a task body.
    TaskFailed,
    /// A task panicked and the panic was observed at the join boundary.
    TaskPanic,
    /// A panic inside a guarded task was converted to a reported error.
    InternalFault,
    /// Admission was denied by a rate limiter under try semantics.
    RateLimited,
    /// A configuration value failed validation.
    ConfigError,
    /// An operation was attempted in a state that does not permit it.
    InvalidState,
    /// An outbound transport request failed.
    TransportFailed,
    /// Uncategorized failure.
    Unknown,
}

/// Main error type for toolkit operations.
///
/// Carries an [`ErrorKind`], a static description, optional dynamic detail,
/// an optional source error and the callsite that created it. The type is
/// cheap to clone so results can be fanned out to multiple waiters, as the
/// single-flight cache does.
#[derive(Debug, Clone)]
pub struct TaskError {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
}

impl TaskError {
    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns `true` when this error represents cooperative cancellation,
    /// either explicit or caused by an elapsed deadline.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Cancelled | ErrorKind::DeadlineExceeded
        )
    }

    /// Returns the detailed error information if available.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Attaches an originating [`error::Error`] to this error and returns the
    /// modified instance. The stored source is preserved across clones and
    /// exposed via [`error::Error::source`].
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    /// Creates a [`TaskError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        TaskError {
            kind,
            description,
            detail,
            source,
            location: Location::caller(),
        }
    }
}

impl PartialEq for TaskError {
    fn eq(&self, other: &TaskError) -> bool {
        self.kind == other.kind
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(
            f,
            "[{:?}] {} @ {}:{}:{}",
            self.kind,
            self.description,
            self.location.file(),
            self.location.line(),
            self.location.column()
        )?;

        if let Some(detail) = self.detail.as_deref() {
            write!(f, " ({detail})")?;
        }

        Ok(())
    }
}

impl error::Error for TaskError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| source as &(dyn error::Error + 'static))
    }
}

/// Creates a [`TaskError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for TaskError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> TaskError {
        TaskError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`TaskError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for TaskError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> TaskError {
        TaskError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}
