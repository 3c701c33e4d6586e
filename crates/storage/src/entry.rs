//! Filesystem objects returned by storage backends.

use std::path::PathBuf;

/// What kind of filesystem object an [`Entry`] describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryKind {
    File,
    Dir,
    /// Symlinks are reported but never followed.
    Symlink,
}

/// Metadata about one object below a backend's root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Relative path from storage root
    pub path: PathBuf,
    pub kind: EntryKind,
    /// Size in bytes (zero for directories and symlinks)
    pub size: u64,
}
impl Entry {
    pub fn new(path: impl Into<PathBuf>, kind: EntryKind, size: u64) -> Self {
        Self { path: path.into(), kind, size }
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }
}
