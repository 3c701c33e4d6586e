//! Replaying committed layers onto a prefix.
//!
//! Active layers are applied in `(sort, created_at)` order. Files are
//! unpacked over the prefix first, with the portable `users/default`
//! profile mapped back onto the current user. The registry patches of all
//! layers are then merged into a single `.reg` file, placeholders are filled
//! in, and the result is imported. Later layers win on conflicting paths and
//! values.

use crate::Services;
use crate::error::{ErrorKind, Result};
use crate::layer::Layer;
use crate::layers::Layers;
use crate::snapshot::SCRATCH_DIR;
use crate::snapshot::registry::merge_patches;
use crate::snapshot::staging::{CHANGES_FILE, DEFAULT_PROFILE, FILES_DIR, OVERRIDES_FILE, rebase};
use cellar_compress::{Compression, archive};
use cellar_diff::Encoding;
use cellar_storage::EntryKind;
use cellar_storage::backend::copy_between;
use exn::ResultExt;
use std::path::{Path, PathBuf};
use tracing::instrument;

const IMPORT_FILE: &str = "import.reg";

/// What [`install`] did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Applied {
    /// Ids of the layers applied, in order.
    pub layers: Vec<String>,
    pub files: usize,
    pub registry: bool,
}

/// Apply every active layer to the prefix.
#[instrument(skip_all)]
pub async fn install(services: &Services) -> Result<Applied> {
    let layers = active_layers(services).await?;
    let mut applied = Applied::default();
    for layer in &layers {
        let files = install_files(services, layer).await?;
        tracing::info!(id = %layer.id(), title = %layer.metadata.title, files, "Layer applied");
        applied.files += files;
        applied.layers.push(layer.id());
    }

    let patch = merge(services, &layers).await?;
    if !patch.is_empty() {
        let scratch = Path::new(SCRATCH_DIR).join(IMPORT_FILE);
        let store = &services.layers;
        store.write(&scratch, &Encoding::Utf16Le.encode(&patch)).await.or_raise(|| ErrorKind::Storage)?;
        let path = store.local_path(&scratch).or_raise(|| ErrorKind::Storage)?;
        let imported = services.kernel.import_registry(&path).await;
        _ = store.remove(&scratch).await;
        imported?;
        applied.registry = true;
    }
    Ok(applied)
}

/// The merged registry patch of every active layer, with placeholders
/// filled in. Empty when no layer carries registry changes.
pub async fn registry(services: &Services) -> Result<String> {
    let layers = active_layers(services).await?;
    merge(services, &layers).await
}

async fn active_layers(services: &Services) -> Result<Vec<Layer>> {
    Ok(Layers::new(services).list().await?.into_iter().filter(Layer::is_active).collect())
}

async fn merge(services: &Services, layers: &[Layer]) -> Result<String> {
    let store = &*services.layers;
    let mut patches = Vec::new();
    for layer in layers {
        for file in [CHANGES_FILE, OVERRIDES_FILE] {
            let path = layer.path().join(file);
            if !store.exists(&path).await.or_raise(|| ErrorKind::Storage)? {
                continue;
            }
            let data = store.read(&path).await.or_raise(|| ErrorKind::Storage)?;
            let text = Encoding::Utf16Le.decode(&data).or_raise(|| ErrorKind::Diff)?;
            patches.push(services.identity.render(&text));
        }
    }
    Ok(merge_patches(patches.iter().map(String::as_str)))
}

/// Unpack (or copy) the layer's files over the prefix. Returns how many
/// entries were written.
async fn install_files(services: &Services, layer: &Layer) -> Result<usize> {
    let store = &*services.layers;
    let portable = services.profile(DEFAULT_PROFILE);
    let own = services.profile(services.identity.user());

    for compression in Compression::ALL {
        let archive_path = layer.path().join(compression.archive_name());
        if !store.exists(&archive_path).await.or_raise(|| ErrorKind::Storage)? {
            continue;
        }
        let source = store.local_path(&archive_path).or_raise(|| ErrorKind::Storage)?;
        let destination = services.prefix.local_path(Path::new("")).or_raise(|| ErrorKind::Storage)?;
        return tokio::task::spawn_blocking(move || {
            archive::unpack(source, destination, |entry| Some(rebase(entry, &portable, &own)))
        })
        .await
        .or_raise(|| ErrorKind::Compression)?
        .or_raise(|| ErrorKind::Compression);
    }

    // Layers staged by hand may keep a loose tree.
    let loose = layer.path().join(FILES_DIR);
    let mut written = 0;
    for entry in store.list(Some(&loose), &[]).await.or_raise(|| ErrorKind::Storage)? {
        if entry.kind != EntryKind::File {
            continue;
        }
        let Ok(relative) = entry.path.strip_prefix(&loose) else {
            continue;
        };
        let target: PathBuf = rebase(relative, &portable, &own);
        copy_between(store, &entry.path, &*services.prefix, &target)
            .await
            .or_raise(|| ErrorKind::Storage)?;
        written += 1;
    }
    Ok(written)
}
