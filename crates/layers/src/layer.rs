//! A single captured layer and its `layer.json` metadata.
//!
//! A layer is a folder (below the layers root, or below the database root)
//! holding:
//!
//! - `layer.json`, the [`Metadata`]
//! - `files.tar.gz` (or another [`Compression`](cellar_compress::Compression)),
//!   the changed files relative to the prefix
//! - `changes.reg`, the portable registry patch
//! - `override-dll.reg`, native overrides for libraries dropped into the
//!   system directories
//!
//! Every payload file is optional. Layer methods take the backend the folder
//! lives in, so the same type serves both stores.

use crate::error::{ErrorKind, Result};
use cellar_storage::StorageBackend;
use exn::ResultExt;
use rslug::slugify;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::instrument;

pub const METADATA_FILE: &str = "layer.json";
pub const DEFAULT_SORT: i64 = 500;
const ID_PREFIX: &str = "layer-";

/// Contents of `layer.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// `false` while the capture is still in flight.
    pub created: bool,
    /// Milliseconds since the Unix epoch. Never changes once persisted.
    pub created_at: i64,
    pub active: bool,
    pub title: String,
    #[serde(default = "default_sort")]
    pub sort: i64,
    /// Bytes on disk.
    #[serde(default)]
    pub size: u64,
}

fn default_sort() -> i64 {
    DEFAULT_SORT
}

/// A typed metadata update for [`Layer::set`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LayerField {
    Active(bool),
    Sort(i64),
    Title(String),
    Size(u64),
}

/// Serializable view of a layer for front ends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerObject {
    pub id: String,
    pub folder: String,
    pub created: bool,
    pub created_at: i64,
    pub active: bool,
    pub title: String,
    pub sort: i64,
    pub size: u64,
    /// e.g. `"12.4 MiB"`
    pub size_human: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layer {
    /// Folder, relative to the backend root.
    path: PathBuf,
    pub metadata: Metadata,
}

impl Layer {
    /// Read `layer.json` from `folder`, or start from defaults when there
    /// is none yet.
    pub async fn load(backend: &dyn StorageBackend, folder: impl Into<PathBuf>) -> Result<Self> {
        let path = folder.into();
        let file = path.join(METADATA_FILE);
        let metadata = match backend.read(&file).await {
            Ok(data) => serde_json::from_slice(&data)
                .map_err(|e| exn::Exn::from(ErrorKind::Metadata(format!("{}: {e}", file.display()))))?,
            Err(e) if e.is_not_found() => Metadata {
                created: false,
                created_at: now_millis(),
                active: true,
                title: basename(&path),
                sort: DEFAULT_SORT,
                size: 0,
            },
            Err(e) => return Err(e).or_raise(|| ErrorKind::Storage),
        };
        Ok(Self { path, metadata })
    }

    /// Derived from the creation time, so it survives folder renames.
    pub fn id(&self) -> String {
        format!("{ID_PREFIX}{}", self.metadata.created_at)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Folder basename; the identity used by the database.
    pub fn name(&self) -> String {
        basename(&self.path)
    }

    pub fn is_created(&self) -> bool {
        self.metadata.created
    }

    pub fn is_active(&self) -> bool {
        self.metadata.active
    }

    /// Create the folder if needed and write `layer.json`.
    pub async fn save(&self, backend: &dyn StorageBackend) -> Result<()> {
        let data = serde_json::to_vec_pretty(&self.metadata)
            .map_err(|e| exn::Exn::from(ErrorKind::Metadata(e.to_string())))?;
        backend.create_dir(&self.path).await.or_raise(|| ErrorKind::Storage)?;
        backend.write(&self.path.join(METADATA_FILE), &data).await.or_raise(|| ErrorKind::Storage)?;
        Ok(())
    }

    /// Delete the folder and everything in it. Missing folders are fine.
    #[instrument(skip_all, fields(layer = %self.path.display()))]
    pub async fn remove(&self, backend: &dyn StorageBackend) -> Result<()> {
        match backend.remove(&self.path).await {
            Ok(()) => {
                tracing::info!(id = %self.id(), "Layer removed");
                Ok(())
            },
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e).or_raise(|| ErrorKind::Storage),
        }
    }

    /// Change the title and move the folder to its slug.
    ///
    /// When another folder already has that name the layer stays where it
    /// is, so title and folder name may differ.
    #[instrument(skip_all, fields(layer = %self.path.display()))]
    pub async fn set_title(&mut self, backend: &dyn StorageBackend, title: impl Into<String>) -> Result<()> {
        self.metadata.title = title.into();
        let slug = slugify!(&self.metadata.title);
        let target = self.path.with_file_name(&slug);
        if !slug.is_empty() && target != self.path {
            if backend.exists(&target).await.or_raise(|| ErrorKind::Storage)? {
                tracing::debug!(target = %target.display(), "Folder name taken; keeping current folder");
            } else {
                backend.rename(&self.path, &target).await.or_raise(|| ErrorKind::Storage)?;
                self.path = target;
            }
        }
        self.save(backend).await
    }

    /// Update one field and persist.
    pub async fn set(&mut self, backend: &dyn StorageBackend, field: LayerField) -> Result<()> {
        match field {
            LayerField::Title(title) => return self.set_title(backend, title).await,
            LayerField::Active(active) => self.metadata.active = active,
            LayerField::Sort(sort) => self.metadata.sort = sort,
            LayerField::Size(size) => self.metadata.size = size,
        }
        self.save(backend).await
    }

    pub fn to_object(&self) -> LayerObject {
        LayerObject {
            id: self.id(),
            folder: self.name(),
            created: self.metadata.created,
            created_at: self.metadata.created_at,
            active: self.metadata.active,
            title: self.metadata.title.clone(),
            sort: self.metadata.sort,
            size: self.metadata.size,
            size_human: human_size(self.metadata.size),
        }
    }

    /// Ordering key of every layer listing.
    pub fn sort_key(&self) -> (i64, i64) {
        (self.metadata.sort, self.metadata.created_at)
    }
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn basename(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

pub(crate) fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellar_storage::LocalBackend;
    use rstest::rstest;

    fn backend() -> (tempfile::TempDir, LocalBackend) {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("layers", temp_dir.path()).unwrap();
        (temp_dir, backend)
    }

    #[tokio::test]
    async fn test_load_defaults() {
        let (_temp, backend) = backend();
        let layer = Layer::load(&backend, "layer-0").await.unwrap();
        assert!(!layer.is_created());
        assert!(layer.is_active());
        assert_eq!(layer.metadata.title, "layer-0");
        assert_eq!(layer.metadata.sort, DEFAULT_SORT);
        assert_eq!(layer.metadata.size, 0);
        assert!(!backend.exists(Path::new("layer-0")).await.unwrap());
    }

    #[tokio::test]
    async fn test_id_is_stable_across_reloads() {
        let (_temp, backend) = backend();
        let layer = Layer::load(&backend, "layer-0").await.unwrap();
        layer.save(&backend).await.unwrap();
        let first = Layer::load(&backend, "layer-0").await.unwrap();
        let second = Layer::load(&backend, "layer-0").await.unwrap();
        assert_eq!(first.id(), layer.id());
        assert_eq!(second.id(), layer.id());
        assert!(layer.id().starts_with("layer-"));
    }

    #[tokio::test]
    async fn test_json_is_camel_case() {
        let (_temp, backend) = backend();
        let mut layer = Layer::load(&backend, "layer-0").await.unwrap();
        layer.metadata.created_at = 1_700_000_000_000;
        layer.save(&backend).await.unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&backend.read(Path::new("layer-0/layer.json")).await.unwrap()).unwrap();
        assert_eq!(json["createdAt"], 1_700_000_000_000_i64);
        assert_eq!(json["created"], false);
        assert_eq!(json["sort"], 500);
    }

    #[tokio::test]
    async fn test_invalid_metadata() {
        let (_temp, backend) = backend();
        backend.write(Path::new("broken/layer.json"), b"{ nope").await.unwrap();
        let err = Layer::load(&backend, "broken").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Metadata(_)));
    }

    #[tokio::test]
    async fn test_set_title_renames_folder() {
        let (_temp, backend) = backend();
        let mut layer = Layer::load(&backend, "layer-0").await.unwrap();
        layer.save(&backend).await.unwrap();
        let id = layer.id();

        layer.set_title(&backend, "DirectX June 2010").await.unwrap();
        assert_eq!(layer.path(), Path::new("directx-june-2010"));
        assert!(!backend.exists(Path::new("layer-0")).await.unwrap());
        let reloaded = Layer::load(&backend, "directx-june-2010").await.unwrap();
        assert_eq!(reloaded.metadata.title, "DirectX June 2010");
        assert_eq!(reloaded.id(), id);
    }

    #[tokio::test]
    async fn test_set_title_keeps_folder_on_collision() {
        let (_temp, backend) = backend();
        backend.create_dir(Path::new("vcrun2019")).await.unwrap();
        let mut layer = Layer::load(&backend, "layer-1").await.unwrap();
        layer.save(&backend).await.unwrap();

        layer.set_title(&backend, "vcrun2019").await.unwrap();
        assert_eq!(layer.path(), Path::new("layer-1"));
        let reloaded = Layer::load(&backend, "layer-1").await.unwrap();
        assert_eq!(reloaded.metadata.title, "vcrun2019");
    }

    #[tokio::test]
    async fn test_set_fields() {
        let (_temp, backend) = backend();
        let mut layer = Layer::load(&backend, "layer-0").await.unwrap();
        layer.set(&backend, LayerField::Active(false)).await.unwrap();
        layer.set(&backend, LayerField::Sort(100)).await.unwrap();
        layer.set(&backend, LayerField::Size(4096)).await.unwrap();
        let reloaded = Layer::load(&backend, "layer-0").await.unwrap();
        assert!(!reloaded.is_active());
        assert_eq!(reloaded.sort_key().0, 100);
        assert_eq!(reloaded.to_object().size_human, "4.0 KiB");
    }

    #[tokio::test]
    async fn test_remove() {
        let (_temp, backend) = backend();
        let layer = Layer::load(&backend, "layer-0").await.unwrap();
        layer.save(&backend).await.unwrap();
        layer.remove(&backend).await.unwrap();
        assert!(!backend.exists(Path::new("layer-0")).await.unwrap());
        layer.remove(&backend).await.unwrap();
    }

    #[test]
    fn test_to_object() {
        let layer = Layer {
            path: PathBuf::from("layer-3"),
            metadata: Metadata {
                created: true,
                created_at: 42,
                active: true,
                title: "Fonts".to_string(),
                sort: 500,
                size: 0,
            },
        };
        let object = layer.to_object();
        assert_eq!(object.id, "layer-42");
        assert_eq!(object.folder, "layer-3");
        let json = serde_json::to_value(&object).unwrap();
        assert_eq!(json["sizeHuman"], "0 B");
        assert_eq!(json["createdAt"], 42);
    }

    #[rstest]
    #[case(0, "0 B")]
    #[case(1023, "1023 B")]
    #[case(1536, "1.5 KiB")]
    #[case(5 * 1024 * 1024, "5.0 MiB")]
    #[case(3 * 1024 * 1024 * 1024, "3.0 GiB")]
    fn test_human_size(#[case] bytes: u64, #[case] expected: &str) {
        assert_eq!(human_size(bytes), expected);
    }
}
