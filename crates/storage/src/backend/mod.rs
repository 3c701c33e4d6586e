//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait: the filesystem provider
//! the snapshot, layer and database code is written against.

mod local;

pub use self::local::LocalBackend;
use crate::entry::{Entry, EntryKind};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;

pub(crate) type EntryStream<'a> = Pin<Box<dyn Stream<Item = Result<Entry>> + Send + 'a>>;
pub type BoxSyncRead = Box<dyn Read + Send + 'static>;
pub type BoxSyncWrite = Box<dyn Write + Send + 'static>;

/// Unified interface for filesystem access below a root.
///
/// All operations are asynchronous. Tree walks are streamed and processed
/// sequentially, so large prefixes are bound by I/O latency rather than
/// memory.
///
/// # Path Handling
/// All paths are relative to the storage root and must be validated using
/// [`validate_path`](crate::validate_path) before use. Implementations
/// enforce this validation.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use cellar_storage::{StorageBackend, error::Result};
///
/// async fn manifest_size(backend: &dyn StorageBackend) -> Result<u64> {
///     let path = Path::new("snapshots/before.manifest");
///     if backend.exists(path).await? {
///         Ok(backend.stat(path).await?.size)
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the backend, used for logging only.
    fn name(&self) -> &str;

    /// Absolute host path for a relative storage path. An empty path is the
    /// root itself.
    ///
    /// External tools (the diff executable, the registry exporter, the tar
    /// packer) need real paths to work with.
    fn local_path(&self, path: &Path) -> Result<PathBuf>;

    /// Collect every object below `prefix` into a [`Vec`].
    ///
    /// Default implementation collects [`list_stream()`](Self::list_stream).
    async fn list(&self, prefix: Option<&Path>, exclude: &[PathBuf]) -> Result<Vec<Entry>> {
        self.list_stream(prefix, exclude).try_collect().await
    }

    /// Stream every file, directory and symlink below `prefix` (the whole
    /// root when `None`).
    ///
    /// Objects whose relative path starts with any of `exclude` are neither
    /// yielded nor descended into. Symlinks are yielded, never followed. A
    /// prefix that doesn't exist yields nothing rather than an error.
    ///
    /// ```
    /// use futures::TryStreamExt;
    /// use std::path::Path;
    /// # use cellar_storage::{StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let mut stream = backend.list_stream(Some(Path::new("windows")), &[]);
    /// while let Some(entry) = stream.try_next().await? {
    ///     println!("{}: {:?} {} bytes", entry.path.display(), entry.kind, entry.size);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>, exclude: &'a [PathBuf]) -> EntryStream<'a>;

    /// Immediate children of a directory, unordered. Pass an empty path for
    /// the root. A directory that doesn't exist lists as empty.
    async fn list_dir(&self, path: &Path) -> Result<Vec<Entry>>;

    /// Check if a file, directory or symlink exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Metadata without following a final symlink.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if nothing
    /// exists at `path`.
    async fn stat(&self, path: &Path) -> Result<Entry>;

    /// Read file contents.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write file contents, creating parent directories as needed.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Blocking reader over a file's contents, for use off the async runtime
    /// (inside `spawn_blocking`).
    async fn reader(&self, path: &Path) -> Result<BoxSyncRead>;

    /// Blocking writer truncating or creating a file, parents included.
    ///
    /// The writer is buffered: callers must `flush()` it before dropping,
    /// otherwise write errors are lost.
    async fn writer(&self, path: &Path) -> Result<BoxSyncWrite>;

    /// Hex-encoded BLAKE3 hash of a file's contents.
    async fn hash(&self, path: &Path) -> Result<String>;

    /// Create a directory and all of its parents.
    async fn create_dir(&self, path: &Path) -> Result<()>;

    /// Remove a file, symlink or whole directory tree.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if nothing
    /// exists at `path`.
    async fn remove(&self, path: &Path) -> Result<()>;

    /// Rename/move within the same backend.
    ///
    /// Parent directories of the destination are created. An existing file
    /// at the destination is overwritten; an existing directory must be
    /// removed first by the caller.
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Copy a file, or a whole directory tree, within this backend.
    /// Returns the number of bytes copied.
    async fn copy(&self, from: &Path, to: &Path) -> Result<u64> {
        copy_between(self, from, self, to).await
    }
}

/// Copy a file or directory tree from one backend into another.
///
/// File contents are streamed through a blocking task, never held in memory
/// whole; symlinks are skipped with a warning since their
/// targets rarely make sense outside the tree they came from. Returns the
/// number of bytes copied.
pub async fn copy_between<S, T>(source: &S, from: &Path, target: &T, to: &Path) -> Result<u64>
where
    S: StorageBackend + ?Sized,
    T: StorageBackend + ?Sized,
{
    let root = source.stat(from).await?;
    if root.is_file() {
        return copy_file(source, from, target, to).await;
    }
    if root.is_symlink() {
        tracing::warn!(path = %from.display(), "Skipping symlink during copy");
        return Ok(0);
    }
    target.create_dir(to).await?;
    let mut copied = 0;
    let mut stream = source.list_stream(Some(from), &[]);
    while let Some(entry) = stream.try_next().await? {
        let Ok(relative) = entry.path.strip_prefix(from) else {
            continue;
        };
        let destination = to.join(relative);
        match entry.kind {
            EntryKind::Dir => target.create_dir(&destination).await?,
            EntryKind::File => copied += copy_file(source, &entry.path, target, &destination).await?,
            EntryKind::Symlink => {
                tracing::warn!(path = %entry.path.display(), "Skipping symlink during copy");
            },
        }
    }
    Ok(copied)
}

async fn copy_file<S, T>(source: &S, from: &Path, target: &T, to: &Path) -> Result<u64>
where
    S: StorageBackend + ?Sized,
    T: StorageBackend + ?Sized,
{
    let mut reader = source.reader(from).await?;
    let mut writer = target.writer(to).await?;
    let copied = tokio::task::spawn_blocking(move || -> std::io::Result<u64> {
        let copied = std::io::copy(&mut reader, &mut writer)?;
        writer.flush()?;
        Ok(copied)
    })
    .await
    .map_err(|e| ErrorKind::BackendError(format!("copy task failed: {e}")))?;
    Ok(copied.map_err(ErrorKind::Io)?)
}
