//! Path validation and security utilities.
//!
//! This module provides functions to validate storage paths and prevent
//! security issues like path traversal attacks.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a storage path for security and correctness.
/// Ensures that paths don't escape the storage root (no `..` traversal).
/// Manifest lines and archive entries are untrusted input, so every path
/// crossing into a backend goes through here.
///
/// > **Note:** This does **not** normalize backslashes, non-UTF8 bytes, or
/// >           platform-specific weirdness. Null bytes are explicitly rejected.
///
/// # Returns
/// Returns the normalized path if valid, or [`InvalidPath`](crate::error::ErrorKind::InvalidPath)
/// if invalid.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use cellar_storage::validate_path;
/// // Valid paths
/// assert!(validate_path("windows/system32/d3d9.dll").is_ok());
/// assert!(validate_path("Program Files/Steam/steam.exe").is_ok());
/// assert!(validate_path("users/../windows").is_ok()); // (never leaves the root)
/// // Invalid paths
/// assert!(validate_path("../system.reg").is_err());
/// assert!(validate_path("users/../../dosdevices").is_err()); // (leaves the root)
/// assert!(validate_path("a\0b").is_err());
/// // Paths get resolved
/// assert_eq!(
///     validate_path("users/../users/./default//Desktop/").unwrap(),
///     Path::new("users/default/Desktop")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let mut components = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but
                // truncate in C syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            // Drive letters belong to the emulated side, never the host.
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("windows/system32/d3d9.dll", "windows/system32/d3d9.dll")]
    #[case("Program Files (x86)/Common Files", "Program Files (x86)/Common Files")]
    #[case("users//default/./Desktop", "users/default/Desktop")]
    #[case("/windows/Fonts", "windows/Fonts")]
    #[case("users/default/..", "users")]
    #[case("layer-3/", "layer-3")]
    fn test_valid_paths(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(validate(Path::new(input)).unwrap(), Path::new(expected));
    }

    #[rstest]
    #[case("../system.reg")]
    #[case("users/../../b")]
    #[case("..")]
    #[case("a\0b")]
    #[case("")]
    #[case(".")]
    #[case("./.")]
    #[case("//")]
    fn test_invalid_paths(#[case] input: &str) {
        let err = validate(Path::new(input)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
    }
}
