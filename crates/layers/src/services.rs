use crate::error::{ErrorKind, Result};
use crate::{Identity, Kernel};
use cellar_compress::Compression;
use cellar_diff::Differ;
use cellar_storage::{BackendHandle, LocalBackend};
use exn::ResultExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything the snapshot, layer store, database and apply code share.
///
/// Built once and handed around by reference.
pub struct Services {
    pub kernel: Arc<dyn Kernel>,
    /// Rooted at the prefix (the folder holding the drive and `.cellar`).
    pub prefix: BackendHandle,
    /// Rooted at the layers directory of this prefix.
    pub layers: BackendHandle,
    /// Rooted at the shared per-user layer database.
    pub database: BackendHandle,
    pub differ: Differ,
    pub identity: Identity,
    pub compression: Compression,
    /// Drive root, relative to the prefix.
    drive: PathBuf,
    /// Prefix-relative paths never snapshotted.
    exclude: Vec<PathBuf>,
}

impl Services {
    /// Wire up local backends for `prefix`, `layers_dir` and `database_dir`.
    ///
    /// The kernel's drive root has to live inside `prefix`. The games mount
    /// and the layers directory are excluded from snapshots when they are
    /// inside the prefix too.
    pub fn new(
        kernel: Arc<dyn Kernel>,
        prefix: impl AsRef<Path>,
        layers_dir: impl AsRef<Path>,
        database_dir: impl AsRef<Path>,
    ) -> Result<Self> {
        let prefix = prefix.as_ref();
        let drive = kernel.drive_root().strip_prefix(prefix).map(Path::to_path_buf).or_raise(|| {
            ErrorKind::Prefix(format!("drive root {} is outside of the prefix", kernel.drive_root().display()))
        })?;
        let exclude = [kernel.games_dir(), Some(layers_dir.as_ref().to_path_buf())]
            .into_iter()
            .flatten()
            .filter_map(|path| path.strip_prefix(prefix).ok().map(Path::to_path_buf))
            .filter(|path| !path.as_os_str().is_empty())
            .collect();
        let identity = Identity::detect(kernel.user_name(), prefix.display().to_string());

        Ok(Self {
            prefix: backend("prefix", prefix)?,
            layers: backend("layers", layers_dir)?,
            database: backend("database", database_dir)?,
            differ: Differ::default(),
            compression: Compression::default(),
            identity,
            drive,
            exclude,
            kernel,
        })
    }

    pub fn with_differ(mut self, differ: Differ) -> Self {
        self.differ = differ;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    /// Drive root, relative to the prefix (`drive_c` for Wine).
    pub fn drive(&self) -> &Path {
        &self.drive
    }

    pub fn exclude(&self) -> &[PathBuf] {
        &self.exclude
    }

    /// Prefix-relative profile folder of `user`.
    pub fn profile(&self, user: &str) -> PathBuf {
        self.drive.join("users").join(user)
    }
}

fn backend(name: &str, root: impl AsRef<Path>) -> Result<BackendHandle> {
    Ok(Arc::new(LocalBackend::new(name, root).or_raise(|| ErrorKind::Storage)?))
}
