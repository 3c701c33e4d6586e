//! Diff Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A diff error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for diff operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// One of the inputs could not be read, or scratch files not written.
    Io,
    /// Input bytes were not valid in the requested encoding.
    #[display("input is not valid {_0}")]
    Encoding(#[error(not(source))] &'static str),
    /// The diff executable could not be started.
    #[display("could not run diff command: {_0}")]
    Spawn(#[error(not(source))] String),
    /// The diff executable exited with something other than 0 (same) or 1 (different).
    #[display("diff exited with code: {_0}")]
    CommandFailed(#[error(not(source))] i32),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io)
    }
}
