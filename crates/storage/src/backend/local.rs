//! Local filesystem storage backend.
//!
//! Objects live in a configured directory on the local filesystem and are
//! accessed via `tokio::fs` for async I/O.

use crate::backend::{BoxSyncRead, BoxSyncWrite, EntryStream};
use crate::error::ErrorKind;
use crate::{Entry, EntryKind, StorageBackend, error::Result, path::validate as validate_path};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use std::fs::{Metadata, create_dir_all as sync_create_dir};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tokio::fs::{self, DirEntry};

enum WalkEntry {
    Yield(Entry),
    Descend(Entry, PathBuf),
    Skip,
}

/// Local filesystem storage backend.
///
/// All paths are relative to the configured root directory.
///
/// # Examples
///
/// ```no_run
/// use cellar_storage::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let drive = LocalBackend::new("drive_c", "/home/me/.wine/drive_c")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalBackend {
    name: String,
    root: PathBuf,
}
impl LocalBackend {
    /// Create a new local filesystem backend, creating the root if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute or is not a directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Non-async on purpose; happens once per backend and keeps the
            // constructor simple.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }
        Ok(Self { name: name.into(), root })
    }

    /// Absolute root directory of this backend.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn absolute_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let validated = validate_path(path.as_ref())?;
        Ok(self.root.join(validated))
    }

    fn relative_path(&self, absolute: impl AsRef<Path>) -> Result<PathBuf> {
        let absolute = absolute.as_ref();
        if !absolute.is_absolute() {
            exn::bail!(ErrorKind::BackendError(format!(
                "attempting to get relative path of non-absolute path `{:?}`",
                absolute
            )))
        }
        let relative = absolute.strip_prefix(&self.root).or_raise(|| {
            ErrorKind::BackendError(format!("path `{:?}` is not within root `{:?}`", absolute, self.root))
        })?;
        Ok(validate_path(relative)?)
    }

    fn entry(path: &Path, metadata: &Metadata) -> Result<Entry> {
        let file_type = metadata.file_type();
        let (kind, size) = if file_type.is_symlink() {
            (EntryKind::Symlink, 0)
        } else if file_type.is_dir() {
            (EntryKind::Dir, 0)
        } else {
            (EntryKind::File, metadata.len())
        };
        Ok(Entry::new(path, kind, size))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            std::io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    /// Classify one directory entry so the walk loop only has to match.
    async fn process_entry(&self, entry: DirEntry, prefix: Option<&Path>, exclude: &[PathBuf]) -> Result<WalkEntry> {
        let path = entry.path();
        // DirEntry::metadata does not traverse symlinks.
        let metadata = entry.metadata().await.map_err(|e| Self::map_io_error(e, &path))?;
        let relative = self.relative_path(&path)?;
        if let Some(pfx) = prefix
            && !relative.starts_with(pfx)
        {
            return Ok(WalkEntry::Skip);
        }
        if exclude.iter().any(|excluded| relative.starts_with(excluded)) {
            tracing::trace!(path = %relative.display(), "Excluded from walk");
            return Ok(WalkEntry::Skip);
        }
        let entry = Self::entry(&relative, &metadata)?;
        Ok(match entry.kind {
            EntryKind::Dir => WalkEntry::Descend(entry, path),
            _ => WalkEntry::Yield(entry),
        })
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn local_path(&self, path: &Path) -> Result<PathBuf> {
        if path.as_os_str().is_empty() {
            return Ok(self.root.clone());
        }
        self.absolute_path(path)
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>, exclude: &'a [PathBuf]) -> EntryStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Result::Err(e) })),
        };

        // Walk from the parent of the prefix so a prefix that is a file, or
        // doesn't exist yet, doesn't error. Path::starts_with is
        // component-based, so "users/Sub" won't match "users/Subdir".
        let start_dir = validated_prefix
            .as_ref()
            .map(|prefix| self.root.join(prefix).parent().unwrap_or(&self.root).to_path_buf())
            .unwrap_or_else(|| self.root.clone());
        let mut stack = vec![start_dir];

        Box::pin(stream! {
            'dirs: while let Some(current) = stack.pop() {
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    // A missing directory lists as empty.
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(err) => {
                        yield Err(exn::Exn::from(Self::map_io_error(err, &current)));
                        continue 'dirs;
                    }
                };

                'entries: loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break 'entries,
                        Err(e) => { yield Err(exn::Exn::from(Self::map_io_error(e, &current))); continue 'entries; },
                    };
                    match self.process_entry(entry, validated_prefix.as_deref(), exclude).await {
                        Ok(WalkEntry::Yield(e)) => yield Ok(e),
                        Ok(WalkEntry::Descend(e, d)) => {
                            stack.push(d);
                            yield Ok(e);
                        },
                        Ok(WalkEntry::Skip) => {},
                        Err(e) => yield Err(e),
                    };
                }
            }
        })
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<Entry>> {
        let abs_path = self.local_path(path)?;
        let mut entries = match fs::read_dir(&abs_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::map_io_error(e, path).into()),
        };
        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| Self::map_io_error(e, path))? {
            let metadata = entry.metadata().await.map_err(|e| Self::map_io_error(e, path))?;
            children.push(Self::entry(&self.relative_path(entry.path())?, &metadata)?);
        }
        Ok(children)
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let abs_path = self.absolute_path(path)?;
        // symlink_metadata so dangling links still count as present.
        match fs::symlink_metadata(&abs_path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::map_io_error(e, path).into()),
        }
    }

    async fn stat(&self, path: &Path) -> Result<Entry> {
        let abs_path = self.absolute_path(path)?;
        let metadata = fs::symlink_metadata(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        Self::entry(path, &metadata)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::read(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        if let Some(parent) = abs_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, path))?;
        }
        Ok(fs::write(&abs_path, data).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn reader(&self, path: &Path) -> Result<BoxSyncRead> {
        let abs_path = self.absolute_path(path)?;
        let file = fs::File::open(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        Ok(Box::new(BufReader::new(file.into_std().await)))
    }

    async fn writer(&self, path: &Path) -> Result<BoxSyncWrite> {
        let abs_path = self.absolute_path(path)?;
        if let Some(parent) = abs_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, path))?;
        }
        let file = fs::File::create(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        Ok(Box::new(BufWriter::new(file.into_std().await)))
    }

    async fn hash(&self, path: &Path) -> Result<String> {
        let abs_path = self.absolute_path(path)?;
        let relative = path.to_path_buf();
        // Hashing can chew through hundreds of megabytes of DLLs; keep it
        // off the async worker.
        let hashed = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
            let mut hasher = blake3::Hasher::new();
            hasher.update_reader(std::fs::File::open(&abs_path)?)?;
            Ok(hasher.finalize().to_hex().to_string())
        })
        .await
        .map_err(|e| ErrorKind::BackendError(format!("hashing task failed: {e}")))?;
        Ok(hashed.map_err(|e| Self::map_io_error(e, &relative))?)
    }

    async fn create_dir(&self, path: &Path) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::create_dir_all(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        let metadata = fs::symlink_metadata(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        let result = if metadata.is_dir() {
            fs::remove_dir_all(&abs_path).await
        } else {
            fs::remove_file(&abs_path).await
        };
        Ok(result.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from_path = self.absolute_path(from)?;
        let to_path = self.absolute_path(to)?;
        if let Some(parent) = to_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, to))?;
        }
        Ok(fs::rename(&from_path, &to_path).await.map_err(|e| Self::map_io_error(e, to))?)
    }
}
