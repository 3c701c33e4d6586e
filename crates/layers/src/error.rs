//! Layers Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Failures in the storage, diff and
//! compression crates are raised into one of the dependency kinds below so
//! the full tree is kept.

use derive_more::{Display, Error};

/// A layers error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for layer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the origin of a layer failure.
///
/// ### Operational Errors
/// - [`ErrorKind::Metadata`]
/// - [`ErrorKind::NotFound`]
/// - [`ErrorKind::Kernel`]
/// - [`ErrorKind::Prefix`]
///
/// ### Dependency Errors
/// - [`ErrorKind::Storage`]
/// - [`ErrorKind::Diff`]
/// - [`ErrorKind::Compression`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A storage backend operation (read, write, copy, rename) failed.
    Storage,
    /// Computing a change set between two snapshots failed.
    Diff,
    /// Packing or unpacking a layer archive failed.
    Compression,
    /// `layer.json` could not be parsed or serialized.
    #[display("invalid layer metadata: {_0}")]
    Metadata(#[error(not(source))] String),
    /// No committed layer has the requested id.
    #[display("layer not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The runtime (registry export/import) failed.
    #[display("runtime command failed: {_0}")]
    Kernel(#[error(not(source))] String),
    /// The prefix layout can't be used (drive root outside of the prefix, ...).
    #[display("unusable prefix: {_0}")]
    Prefix(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage | Self::Kernel(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::NotFound("layer-17".to_string()).to_string(), "layer not found: layer-17");
        assert!(ErrorKind::Storage.is_retryable());
        assert!(!ErrorKind::Metadata("eof".to_string()).is_retryable());
    }
}
