//! Macros for toolkit error handling.
//!
//! Provides convenience macros for creating and returning [`crate::error::TaskError`]
//! instances with reduced boilerplate for common error handling patterns.

/// Creates a [`crate::error::TaskError`] from an error kind and description.
///
/// Accepts an optional dynamic detail and an optional source error:
///
/// ```ignore
/// task_error!(ErrorKind::ConfigError, "invalid rate");
/// task_error!(ErrorKind::ConfigError, "invalid rate", format!("got {rate}"));
/// task_error!(ErrorKind::TransportFailed, "request failed", source: err);
/// ```
#[macro_export]
macro_rules! task_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::TaskError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        $crate::error::TaskError::from(($kind, $desc)).with_source($source)
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::TaskError::from(($kind, $desc, $detail.to_string()))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        $crate::error::TaskError::from(($kind, $desc, $detail.to_string())).with_source($source)
    };
}

/// Creates and returns a [`crate::error::TaskError`] from the current function.
///
/// Combines error creation with early return, reducing boilerplate when an
/// error condition should immediately terminate execution. Supports the same
/// optional detail and source arguments as [`task_error!`].
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return ::core::result::Result::Err($crate::task_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::task_error!($kind, $desc, source: $source))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return ::core::result::Result::Err($crate::task_error!($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::task_error!(
            $kind,
            $desc,
            $detail,
            source: $source
        ))
    };
}
