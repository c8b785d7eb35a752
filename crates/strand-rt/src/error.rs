// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime errors.
//!
//! Two classes share one type. Precondition failures are returned
//! synchronously at the call site. Everything else is captured inside an
//! `Outcome` and only surfaces when that outcome is waited on.

use std::any::Any;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Error stored in an `Outcome` or returned by a precondition check.
///
/// Cheap to clone so that repeated `wait()` calls can replay it.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Programmer error: bad argument, misuse of a lock, bad config value.
    #[error("precondition failed: {0}")]
    Precondition(String),
    /// The runner was disposed before the work was submitted.
    #[error("runner is disposed")]
    Disposed,
    /// Every producer of a pending outcome was dropped without completing it.
    #[error("outcome was abandoned by its producer")]
    Abandoned,
    /// Gave up waiting once the deadline passed.
    #[error("timed out waiting until {deadline}")]
    Timeout { deadline: DateTime<Utc> },
    /// The wrapped function, continuation, or clock action panicked.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// A fallible function returned an error.
    #[error(transparent)]
    Failed(Arc<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub(crate) fn precondition(msg: impl Into<String>) -> Self {
        Error::Precondition(msg.into())
    }

    /// Wrap an arbitrary error returned by user code. A runtime `Error`
    /// propagated with `?` is passed through unchanged.
    pub fn failed<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        if let Some(own) = (&err as &dyn Any).downcast_ref::<Error>() {
            return own.clone();
        }
        Error::Failed(Arc::new(err))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Turn a panic payload into `Error::Panicked`, keeping the message
    /// when it is a string.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Error::Panicked(msg)
    }
}

/// Run `f`, converting a panic into `Error::Panicked`.
pub(crate) fn catch<T>(f: impl FnOnce() -> T) -> Result<T, Error> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).map_err(Error::from_panic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("disk full")]
    struct DiskFull;

    #[test]
    fn panic_message_is_kept() {
        let err = catch(|| -> i32 { panic!("boom") }).unwrap_err();
        match err {
            Error::Panicked(msg) => assert_eq!(msg, "boom"),
            other => panic!("expected Panicked, got {:?}", other),
        }
    }

    #[test]
    fn formatted_panic_message_is_kept() {
        let n = 7;
        let err = catch(|| -> i32 { panic!("bad value {}", n) }).unwrap_err();
        assert_eq!(err.to_string(), "task panicked: bad value 7");
    }

    #[test]
    fn failed_is_transparent() {
        let err = Error::failed(DiskFull);
        assert_eq!(err.to_string(), "disk full");
        assert!(!err.is_timeout());
    }

    #[test]
    fn failed_passes_runtime_errors_through() {
        let err = Error::failed(Error::Timeout {
            deadline: DateTime::<Utc>::UNIX_EPOCH,
        });
        assert!(err.is_timeout());
    }
}
