//! Error types for weave.
//!
//! This module provides the single flat error type used throughout the
//! crate: promise rejection reasons, coroutine failures, and stream state
//! violations all share it, matching the error semantics described for
//! the promise/coroutine/stream core.

use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur in weave operations.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Default reason used by `Promise::cancel(None)`.
    #[error("cancelled")]
    Cancelled,

    /// A `timeout` deadline elapsed before the parent settled.
    #[error("timeout")]
    Timeout,

    /// `get_result` (or equivalent synchronous peek) was called on a
    /// promise that has not yet settled.
    #[error("promise is unresolved")]
    Unresolved,

    /// A promise resolved to itself, directly or through a chain of
    /// `following` links.
    #[error("circular reference: promise resolved to itself")]
    CircularReference,

    /// Misuse at the API boundary: an empty collection where one is
    /// required, a missing callback-index argument to `promisify`, and
    /// similar programmer errors.
    #[error("logic error: {0}")]
    LogicError(String),

    /// Aggregate failure from a combinator (`any`, `some`), carrying
    /// every rejection reason keyed by the combinator's input key,
    /// rendered with `Display`.
    #[error("multiple reasons: {0:?}")]
    MultiReason(Vec<(String, Box<Error>)>),

    /// A second `read` was attempted while one was already pending.
    #[error("stream busy: a read is already pending")]
    Busy,

    /// `read`/`poll` was called on a stream that is no longer open.
    #[error("stream is not readable")]
    Unreadable,

    /// `write` was called on a stream that is no longer writable.
    #[error("stream is not writable")]
    Unwritable,

    /// The stream (or its pending read) was closed, with no more
    /// specific reason available.
    #[error("stream closed")]
    Closed,

    /// An underlying syscall/transport failure. Held behind an `Arc`
    /// (rather than a bare `std::io::Error`) purely so that `Error`
    /// itself can be `Clone` — observer lists invoke every registered
    /// callback with its own owned copy of the settlement value.
    /// Construct with `Error::from_io`; `std::io::Error` does not
    /// implement `Clone` so it cannot carry `#[from]`.
    #[error("io failure: {0}")]
    IoFailure(Arc<std::io::Error>),
}

impl Error {
    /// Returns true if this error indicates a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Returns true if this error indicates a deadline elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }

    /// Returns true if this error indicates the stream/promise is closed
    /// and no further operations will succeed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed | Error::Cancelled)
    }

    /// Returns true if this error indicates a second read was rejected
    /// because one was already pending.
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::Busy)
    }

    /// Builds a `LogicError` from a message.
    pub fn logic(msg: impl Into<String>) -> Self {
        Error::LogicError(msg.into())
    }

    /// Wraps an underlying IO failure.
    pub fn from_io(err: std::io::Error) -> Self {
        Error::IoFailure(Arc::new(err))
    }

    /// Builds a `MultiReason` from a keyed collection of failures.
    ///
    /// Keys are rendered via `Display` since `Error` cannot itself be
    /// generic over the caller's key type without infecting every
    /// `Result<T>` in the crate.
    pub fn multi<K: std::fmt::Display>(reasons: Vec<(K, Error)>) -> Self {
        Error::MultiReason(
            reasons
                .into_iter()
                .map(|(k, e)| (k.to_string(), Box::new(e)))
                .collect(),
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::from_io(err)
    }
}

impl std::cmp::PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

/// Result type alias using weave's `Error` type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(Error::Cancelled.to_string(), "cancelled");
        assert_eq!(Error::Timeout.to_string(), "timeout");
        assert_eq!(Error::Busy.to_string(), "stream busy: a read is already pending");
    }

    #[test]
    fn error_predicates() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(Error::Timeout.is_timeout());
        assert!(Error::Closed.is_closed());
        assert!(Error::Cancelled.is_closed());
        assert!(!Error::Busy.is_closed());
        assert!(Error::Busy.is_busy());
    }

    #[test]
    fn multi_reason_renders_keys() {
        let err = Error::multi(vec![("a", Error::Timeout), ("b", Error::Cancelled)]);
        match err {
            Error::MultiReason(reasons) => {
                assert_eq!(reasons.len(), 2);
                assert_eq!(reasons[0].0, "a");
                assert_eq!(*reasons[0].1, Error::Timeout);
            }
            _ => panic!("expected MultiReason"),
        }
    }
}
