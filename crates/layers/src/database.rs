//! Shared, per-user layer repository.
//!
//! Lives outside of any prefix so it survives prefix resets: a layer
//! captured once can be restored into every new prefix. Entries are keyed
//! by folder basename; two different layers that happen to share a folder
//! name are treated as the same entry.

use crate::Services;
use crate::error::{ErrorKind, Result};
use crate::layer::{Layer, LayerField};
use crate::layers::list_layers;
use cellar_storage::backend::copy_between;
use exn::ResultExt;
use std::path::Path;
use tracing::instrument;

pub struct Database<'a> {
    services: &'a Services,
}

impl<'a> Database<'a> {
    pub fn new(services: &'a Services) -> Self {
        Self { services }
    }

    /// Whether an entry with the same folder name exists.
    pub async fn exist(&self, layer: &Layer) -> Result<bool> {
        self.services.database.exists(Path::new(&layer.name())).await.or_raise(|| ErrorKind::Storage)
    }

    /// Copy a layer of this prefix into the database, marked active.
    ///
    /// Returns `false` without touching anything when an entry with the
    /// same folder name is already present.
    #[instrument(skip_all, fields(layer = %layer.name()))]
    pub async fn add_layer(&self, layer: &Layer) -> Result<bool> {
        if self.exist(layer).await? {
            tracing::debug!("Layer already in database");
            return Ok(false);
        }
        let name = layer.name();
        let bytes = copy_between(&*self.services.layers, layer.path(), &*self.services.database, Path::new(&name))
            .await
            .or_raise(|| ErrorKind::Storage)?;
        let mut copy = Layer::load(&*self.services.database, &name).await?;
        if !copy.is_active() {
            copy.set(&*self.services.database, LayerField::Active(true)).await?;
        }
        tracing::info!(id = %copy.id(), bytes, "Layer added to database");
        Ok(true)
    }

    /// Delete the entry sharing the layer's folder name. Returns whether
    /// there was one.
    #[instrument(skip_all, fields(layer = %layer.name()))]
    pub async fn remove_layer(&self, layer: &Layer) -> Result<bool> {
        if !self.exist(layer).await? {
            return Ok(false);
        }
        let entry = Layer::load(&*self.services.database, layer.name()).await?;
        entry.remove(&*self.services.database).await?;
        Ok(true)
    }

    /// Every entry ordered by `(sort, created_at)`.
    pub async fn list(&self) -> Result<Vec<Layer>> {
        let mut layers = list_layers(&*self.services.database).await?;
        layers.sort_by_key(Layer::sort_key);
        Ok(layers)
    }

    /// Entry with the given id.
    pub async fn get_by_id(&self, id: &str) -> Result<Layer> {
        match self.list().await?.into_iter().find(|layer| layer.id() == id) {
            Some(layer) => Ok(layer),
            None => exn::bail!(ErrorKind::NotFound(id.to_string())),
        }
    }

    /// Copy a database entry into this prefix's layer store.
    ///
    /// Returns `false` when a folder with that name already exists there.
    #[instrument(skip_all, fields(layer = %entry.name()))]
    pub async fn restore(&self, entry: &Layer) -> Result<bool> {
        let name = entry.name();
        let layers = &*self.services.layers;
        if layers.exists(Path::new(&name)).await.or_raise(|| ErrorKind::Storage)? {
            tracing::debug!("Layer already present in prefix");
            return Ok(false);
        }
        copy_between(&*self.services.database, entry.path(), layers, Path::new(&name))
            .await
            .or_raise(|| ErrorKind::Storage)?;
        tracing::info!(id = %entry.id(), "Layer restored from database");
        Ok(true)
    }
}
