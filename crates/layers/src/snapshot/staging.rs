use crate::Services;
use crate::error::{ErrorKind, Result};
use crate::snapshot::registry::{DLL_OVERRIDES_KEY, render_patch};
use cellar_compress::archive;
use cellar_diff::Encoding;
use cellar_storage::backend::copy_between;
use exn::ResultExt;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::instrument;

pub const CHANGES_FILE: &str = "changes.reg";
pub const OVERRIDES_FILE: &str = "override-dll.reg";
pub const FILES_DIR: &str = "files";
/// Stand-in profile name used inside layers.
pub const DEFAULT_PROFILE: &str = "default";

const SYSTEM_DIRS: &[&str] = &["system32", "syswow64"];
const NATIVE_EXTENSIONS: &[&str] = &["dll", "ocx", "exe"];

/// What ended up in a staging directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Staged {
    /// Relative to the layers root.
    pub path: PathBuf,
    pub files: usize,
    pub bytes: u64,
    pub registry: bool,
    pub overrides: usize,
}

impl Staged {
    pub fn is_empty(&self) -> bool {
        self.files == 0 && !self.registry
    }
}

/// Fill `staging` (relative to the layers root) with the captured changes.
///
/// Any previous content of `staging` is discarded first.
#[instrument(skip_all, fields(staging = %staging.display(), files = files.len()))]
pub(crate) async fn stage(services: &Services, staging: &Path, registry: &str, files: &[PathBuf]) -> Result<Staged> {
    let layers = &services.layers;
    if layers.exists(staging).await.or_raise(|| ErrorKind::Storage)? {
        layers.remove(staging).await.or_raise(|| ErrorKind::Storage)?;
    }
    layers.create_dir(staging).await.or_raise(|| ErrorKind::Storage)?;

    if !registry.is_empty() {
        let data = Encoding::Utf16Le.encode(registry);
        layers.write(&staging.join(CHANGES_FILE), &data).await.or_raise(|| ErrorKind::Storage)?;
    }

    let own_profile = services.profile(services.identity.user());
    let portable_profile = services.profile(DEFAULT_PROFILE);
    let mut overrides = BTreeSet::new();
    let mut bytes = 0;
    for path in files {
        let target = staging.join(FILES_DIR).join(rebase(path, &own_profile, &portable_profile));
        tracing::trace!(path = %path.display(), target = %target.display(), "Staging file");
        bytes += copy_between(&*services.prefix, path, &**layers, &target).await.or_raise(|| ErrorKind::Storage)?;
        if let Some(name) = dll_override(services.drive(), path) {
            overrides.insert(name);
        }
    }

    if !overrides.is_empty() {
        let header = format!("[{DLL_OVERRIDES_KEY}]");
        let values = overrides.iter().map(|name| format!("\"{name}\"=\"native\""));
        let patch = render_patch([(header.as_str(), values)]);
        let data = Encoding::Utf16Le.encode(&patch);
        layers.write(&staging.join(OVERRIDES_FILE), &data).await.or_raise(|| ErrorKind::Storage)?;
    }

    if !files.is_empty() {
        let loose = staging.join(FILES_DIR);
        let source = layers.local_path(&loose).or_raise(|| ErrorKind::Storage)?;
        let destination =
            layers.local_path(&staging.join(services.compression.archive_name())).or_raise(|| ErrorKind::Storage)?;
        let compression = services.compression;
        tokio::task::spawn_blocking(move || archive::pack(source, destination, compression))
            .await
            .or_raise(|| ErrorKind::Compression)?
            .or_raise(|| ErrorKind::Compression)?;
        layers.remove(&loose).await.or_raise(|| ErrorKind::Storage)?;
    }

    let staged = Staged {
        path: staging.to_path_buf(),
        files: files.len(),
        bytes,
        registry: !registry.is_empty(),
        overrides: overrides.len(),
    };
    tracing::debug!(?staged, "Layer staged");
    Ok(staged)
}

/// Move `path` from below `from` to below `to`; anything else is unchanged.
pub(crate) fn rebase(path: &Path, from: &Path, to: &Path) -> PathBuf {
    match path.strip_prefix(from) {
        Ok(rest) => to.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// Override name for a native library dropped into a system directory.
///
/// Libraries are registered by stem (`d3dx9_43`), executables and controls
/// by full file name (`vcredist.exe`), the way Wine looks them up.
pub(crate) fn dll_override(drive: &Path, path: &Path) -> Option<String> {
    let mut components = path.strip_prefix(drive).ok()?.iter().map(|c| c.to_string_lossy());
    if !components.next()?.eq_ignore_ascii_case("windows") {
        return None;
    }
    let system = components.next()?;
    if !SYSTEM_DIRS.iter().any(|dir| system.eq_ignore_ascii_case(dir)) {
        return None;
    }
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    if !NATIVE_EXTENSIONS.contains(&extension.as_str()) {
        return None;
    }
    let name = match extension.as_str() {
        "dll" => path.file_stem()?,
        _ => path.file_name()?,
    };
    Some(name.to_string_lossy().to_lowercase())
}
