//! The layer store of one prefix and the capture lifecycle.
//!
//! ```no_run
//! # use cellar_layers::{Layers, Services, error::Result};
//! # async fn example(services: &Services) -> Result<()> {
//! let layers = Layers::new(services);
//! layers.create().await?;
//! // ... run the installer and wait for it to exit ...
//! if let Some(layer) = layers.save().await? {
//!     println!("captured {}", layer.id());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! At most one layer is pending (`created == false`) at a time; its folder
//! is the lock that [`Layers::is_processed`] reports.

use crate::Services;
use crate::error::{ErrorKind, Result};
use crate::layer::{Layer, LayerField, METADATA_FILE};
use crate::snapshot::staging::Staged;
use crate::snapshot::{Snapshot, Step};
use cellar_storage::{EntryKind, StorageBackend};
use exn::ResultExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::instrument;

const LAYER_FOLDER_PREFIX: &str = "layer-";

pub struct Layers<'a> {
    services: &'a Services,
    /// Next `layer-{n}` to probe. Only ever increases.
    next: AtomicUsize,
}

impl<'a> Layers<'a> {
    pub fn new(services: &'a Services) -> Self {
        Self { services, next: AtomicUsize::new(0) }
    }

    /// First unused `layer-{n}` folder at or after the counter.
    pub async fn create_layer_path(&self) -> Result<PathBuf> {
        loop {
            let n = self.next.fetch_add(1, Ordering::SeqCst);
            let path = PathBuf::from(format!("{LAYER_FOLDER_PREFIX}{n}"));
            if !self.services.layers.exists(&path).await.or_raise(|| ErrorKind::Storage)? {
                return Ok(path);
            }
        }
    }

    /// Begin a capture: take the before snapshot and make sure a pending
    /// layer exists. Returns the pending layer.
    ///
    /// The snapshot is retaken even when a capture is already pending.
    #[instrument(skip_all)]
    pub async fn create(&self) -> Result<Layer> {
        Snapshot::new(self.services).create(Step::Before).await?;
        if let Some(pending) = self.pending().await? {
            tracing::info!(layer = %pending.path().display(), "Capture already pending; before snapshot refreshed");
            return Ok(pending);
        }
        let path = self.create_layer_path().await?;
        let layer = Layer::load(&*self.services.layers, path).await?;
        layer.save(&*self.services.layers).await?;
        tracing::info!(layer = %layer.path().display(), id = %layer.id(), "Capture begun");
        Ok(layer)
    }

    /// Finish the pending capture, if any, and commit it.
    ///
    /// When staging or committing fails, the pending layer and the scratch
    /// state are removed before the error is returned.
    #[instrument(skip_all)]
    pub async fn save(&self) -> Result<Option<Layer>> {
        let Some(pending) = self.pending().await? else {
            tracing::debug!("No pending capture to save");
            return Ok(None);
        };
        let snapshot = Snapshot::new(self.services);
        match self.commit(&snapshot, pending.clone()).await {
            Ok(layer) => {
                snapshot.clear().await?;
                Ok(Some(layer))
            },
            Err(e) => {
                tracing::warn!(layer = %pending.path().display(), "Capture failed; cleaning up");
                // Best effort, the original error is what matters.
                _ = pending.remove(&*self.services.layers).await;
                _ = snapshot.clear().await;
                Err(e)
            },
        }
    }

    async fn commit(&self, snapshot: &Snapshot<'_>, pending: Layer) -> Result<Layer> {
        let backend = &*self.services.layers;
        let staged: Staged = snapshot.create_after().await?;
        backend.remove(pending.path()).await.or_raise(|| ErrorKind::Storage)?;
        backend.rename(&staged.path, pending.path()).await.or_raise(|| ErrorKind::Storage)?;

        let mut layer = pending;
        layer.metadata.created = true;
        let size = self.folder_size(layer.path()).await?;
        layer.set(backend, LayerField::Size(size)).await?;
        tracing::info!(
            layer = %layer.path().display(),
            id = %layer.id(),
            files = staged.files,
            registry = staged.registry,
            overrides = staged.overrides,
            size,
            "Capture committed"
        );
        Ok(layer)
    }

    /// Throw away the pending capture and scratch state.
    #[instrument(skip_all)]
    pub async fn abort(&self) -> Result<bool> {
        let pending = self.pending().await?;
        if let Some(layer) = &pending {
            layer.remove(&*self.services.layers).await?;
        }
        Snapshot::new(self.services).clear().await?;
        tracing::info!(aborted = pending.is_some(), "Capture aborted");
        Ok(pending.is_some())
    }

    /// Whether a capture is in flight.
    pub async fn is_processed(&self) -> Result<bool> {
        Ok(self.pending().await?.is_some())
    }

    /// The pending layer, if any.
    pub async fn pending(&self) -> Result<Option<Layer>> {
        Ok(self.all().await?.into_iter().find(|layer| !layer.is_created()))
    }

    /// Committed layers ordered by `(sort, created_at)`.
    pub async fn list(&self) -> Result<Vec<Layer>> {
        let mut layers: Vec<Layer> = self.all().await?.into_iter().filter(Layer::is_created).collect();
        layers.sort_by_key(Layer::sort_key);
        Ok(layers)
    }

    /// Committed layer with the given id.
    pub async fn get_by_id(&self, id: &str) -> Result<Layer> {
        let layers = self.list().await?;
        match layers.into_iter().find(|layer| layer.id() == id) {
            Some(layer) => Ok(layer),
            None => exn::bail!(ErrorKind::NotFound(id.to_string())),
        }
    }

    /// Every layer folder, pending or not.
    async fn all(&self) -> Result<Vec<Layer>> {
        list_layers(&*self.services.layers).await
    }

    async fn folder_size(&self, folder: &Path) -> Result<u64> {
        let entries = self.services.layers.list(Some(folder), &[]).await.or_raise(|| ErrorKind::Storage)?;
        Ok(entries.iter().filter(|e| e.kind == EntryKind::File).map(|e| e.size).sum())
    }
}

/// Load every top level folder of `backend` as a layer. Hidden folders
/// (scratch state) and folders without `layer.json` are left out.
pub(crate) async fn list_layers(backend: &dyn StorageBackend) -> Result<Vec<Layer>> {
    let mut folders: Vec<PathBuf> = backend
        .list_dir(Path::new(""))
        .await
        .or_raise(|| ErrorKind::Storage)?
        .into_iter()
        .filter(|entry| entry.kind == EntryKind::Dir && !entry.path.to_string_lossy().starts_with('.'))
        .map(|entry| entry.path)
        .collect();
    folders.sort();

    let mut layers = Vec::with_capacity(folders.len());
    for folder in folders {
        if !backend.exists(&folder.join(METADATA_FILE)).await.or_raise(|| ErrorKind::Storage)? {
            tracing::trace!(folder = %folder.display(), "Not a layer");
            continue;
        }
        layers.push(Layer::load(backend, folder).await?);
    }
    Ok(layers)
}
