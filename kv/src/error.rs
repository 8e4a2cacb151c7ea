//! Crate-wide error type.
//!
//! Kept deliberately hand-rolled (no `thiserror`/`anyhow`) to match the
//! rest of this library: it is a leaf dependency, and a library this
//! small gains little from a derive macro over a dozen variants.

use std::fmt;

/// The result type used throughout this crate.
pub type CResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Any I/O or internal bookkeeping failure that isn't one of the
    /// more specific variants below.
    Internal(String),

    /// A malformed or out-of-range value, e.g. an empty log entry or a
    /// tuple header that doesn't decode.
    Value(String),

    /// A value failed to parse (JSON payload a caller handed us, etc.)
    Parse(String),

    /// Commit validation failed: `abort-conflict` / `abort-locked` from
    /// spec.md §7. The caller's transaction should be retried.
    Conflict(String),

    /// `resource-exhaustion` from spec.md §7: the read/write set bound
    /// was exceeded, or the timestamp cache is full with nothing
    /// evictable.
    ResourceExhausted(String),

    /// `usage-error` from spec.md §7: an operation on a closed handle,
    /// an unregistered thread, a transaction used after abort/commit,
    /// etc. These are defensive checks and indicate a caller bug.
    UsageError(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
            Error::Value(msg) => write!(f, "invalid value: {msg}"),
            Error::Parse(msg) => write!(f, "parse error: {msg}"),
            Error::Conflict(msg) => write!(f, "transaction conflict: {msg}"),
            Error::ResourceExhausted(msg) => write!(f, "resource exhausted: {msg}"),
            Error::UsageError(msg) => write!(f, "usage error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}
