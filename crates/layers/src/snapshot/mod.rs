//! Point-in-time captures of a prefix and the deltas between two of them.
//!
//! A capture brackets some external change (typically an installer run):
//!
//! 1. [`Snapshot::create`] with [`Step::Before`] records a manifest of every
//!    file and directory plus a full registry export
//! 2. the caller runs the installer *to completion*
//! 3. [`Snapshot::create_after`] records the same again, diffs both pairs and
//!    materializes a staging layer directory with the changed files, the
//!    registry patch and DLL overrides for native libraries
//!
//! Scratch state lives in `.snapshot/` below the layers root and is
//! overwritten by the next capture.

pub mod manifest;
pub mod registry;
pub mod staging;

use crate::Services;
use crate::error::{ErrorKind, Result};
use crate::snapshot::manifest::{ManifestEntry, ManifestKind};
use crate::snapshot::registry::RegistryExport;
use crate::snapshot::staging::Staged;
use cellar_diff::{Encoding, split_lines};
use cellar_storage::EntryKind;
use exn::ResultExt;
use futures::TryStreamExt;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Scratch folder below the layers root.
pub const SCRATCH_DIR: &str = ".snapshot";
/// Prefix-relative folder of cellar's own metadata, snapshotted too.
pub const METADATA_DIR: &str = ".cellar";
/// Drive-relative top level folders that get snapshotted.
const DRIVE_ROOTS: &[&str] = &["ProgramData", "Program Files", "Program Files (x86)", "users", "windows"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Before,
    After,
}

impl Step {
    fn name(&self) -> &'static str {
        match self {
            Step::Before => "before",
            Step::After => "after",
        }
    }

    /// Manifest location, relative to the layers root.
    pub fn manifest(&self) -> PathBuf {
        Path::new(SCRATCH_DIR).join(format!("{}.manifest", self.name()))
    }

    /// Registry export location, relative to the layers root.
    pub fn registry(&self) -> PathBuf {
        Path::new(SCRATCH_DIR).join(format!("{}.reg", self.name()))
    }
}

/// Staging directory, relative to the layers root.
pub fn staging_dir() -> PathBuf {
    Path::new(SCRATCH_DIR).join("layer")
}

pub struct Snapshot<'a> {
    services: &'a Services,
}

impl<'a> Snapshot<'a> {
    pub fn new(services: &'a Services) -> Self {
        Self { services }
    }

    /// Sorted manifest lines for the current state of the prefix.
    pub async fn manifest(&self) -> Result<Vec<String>> {
        let prefix = &self.services.prefix;
        let roots = DRIVE_ROOTS
            .iter()
            .map(|root| self.services.drive().join(root))
            .chain(std::iter::once(PathBuf::from(METADATA_DIR)));

        let mut lines = Vec::new();
        for root in roots {
            if !prefix.exists(&root).await.or_raise(|| ErrorKind::Storage)? {
                continue;
            }
            let mut stream = prefix.list_stream(Some(&root), self.services.exclude());
            while let Some(entry) = stream.try_next().await.or_raise(|| ErrorKind::Storage)? {
                let line = match entry.kind {
                    EntryKind::Dir => ManifestEntry::dir(entry.path),
                    EntryKind::File => {
                        let hash = prefix.hash(&entry.path).await.or_raise(|| ErrorKind::Storage)?;
                        ManifestEntry::file(entry.path, hash, entry.size)
                    },
                    EntryKind::Symlink => {
                        tracing::trace!(path = %entry.path.display(), "Symlink left out of manifest");
                        continue;
                    },
                };
                lines.push(line.to_string());
            }
        }
        lines.sort_unstable();
        Ok(lines)
    }

    /// Record the manifest and registry export for `step`.
    #[instrument(skip(self))]
    pub async fn create(&self, step: Step) -> Result<()> {
        let layers = &self.services.layers;
        layers.create_dir(Path::new(SCRATCH_DIR)).await.or_raise(|| ErrorKind::Storage)?;

        let lines = self.manifest().await?;
        let mut text = lines.join("\n");
        text.push('\n');
        layers.write(&step.manifest(), text.as_bytes()).await.or_raise(|| ErrorKind::Storage)?;

        let export = layers.local_path(&step.registry()).or_raise(|| ErrorKind::Storage)?;
        self.services.kernel.export_registry(&export).await?;
        tracing::info!(objects = lines.len(), "Snapshot recorded");
        Ok(())
    }

    /// Take the after snapshot and stage the differences as a layer.
    #[instrument(skip(self))]
    pub async fn create_after(&self) -> Result<Staged> {
        self.create(Step::After).await?;
        let registry = self.registry_changes(&Step::Before.registry(), &Step::After.registry()).await?;
        let files = self.files_changes(&Step::Before.manifest(), &Step::After.manifest()).await?;
        staging::stage(self.services, &staging_dir(), &registry, &files).await
    }

    /// Portable `.reg` patch of the keys and values added between two
    /// exports (paths relative to the layers root).
    ///
    /// Empty when either export is missing or nothing portable changed.
    #[instrument(skip_all, fields(before = %before.display(), after = %after.display()))]
    pub async fn registry_changes(&self, before: &Path, after: &Path) -> Result<String> {
        let Some((before, after)) = self.both(before, after).await? else {
            return Ok(String::new());
        };
        let changes =
            self.services.differ.diff(&before, &after, Encoding::Utf16Le).await.or_raise(|| ErrorKind::Diff)?;
        let data = tokio::fs::read(&after).await.or_raise(|| ErrorKind::Storage)?;
        let text = Encoding::Utf16Le.decode(&data).or_raise(|| ErrorKind::Diff)?;
        let export = RegistryExport::new(split_lines(&text));
        let patch = export.extract(&changes.inserted);
        tracing::debug!(inserted = changes.inserted.len(), empty = patch.is_empty(), "Registry delta computed");
        Ok(self.services.identity.templatize(&patch))
    }

    /// Prefix-relative paths of files added or modified between two
    /// manifests (paths relative to the layers root).
    ///
    /// Empty when either manifest is missing.
    #[instrument(skip_all, fields(before = %before.display(), after = %after.display()))]
    pub async fn files_changes(&self, before: &Path, after: &Path) -> Result<Vec<PathBuf>> {
        let Some((before, after)) = self.both(before, after).await? else {
            return Ok(Vec::new());
        };
        let changes =
            self.services.differ.diff(&before, &after, Encoding::Utf8).await.or_raise(|| ErrorKind::Diff)?;
        let data = tokio::fs::read(&before).await.or_raise(|| ErrorKind::Storage)?;
        let text = Encoding::Utf8.decode(&data).or_raise(|| ErrorKind::Diff)?;
        let known: HashSet<String> = split_lines(&text).into_iter().collect();

        let files: Vec<PathBuf> = changes
            .inserted
            .values()
            // Reordered lines look inserted but were there all along.
            .filter(|line| !known.contains(*line))
            .filter_map(|line| match line.parse::<ManifestEntry>() {
                Ok(entry) => Some(entry),
                Err(_) => {
                    tracing::warn!(%line, "Ignoring malformed manifest line");
                    None
                },
            })
            .filter(|entry| entry.kind == ManifestKind::File)
            .map(|entry| entry.path)
            .collect();
        tracing::debug!(files = files.len(), "File delta computed");
        Ok(files)
    }

    /// Forget all scratch state.
    pub async fn clear(&self) -> Result<()> {
        let layers = &self.services.layers;
        if layers.exists(Path::new(SCRATCH_DIR)).await.or_raise(|| ErrorKind::Storage)? {
            layers.remove(Path::new(SCRATCH_DIR)).await.or_raise(|| ErrorKind::Storage)?;
        }
        Ok(())
    }

    /// Host paths of both files, or `None` if either is missing.
    async fn both(&self, before: &Path, after: &Path) -> Result<Option<(PathBuf, PathBuf)>> {
        let layers = &self.services.layers;
        for path in [before, after] {
            if !layers.exists(path).await.or_raise(|| ErrorKind::Storage)? {
                tracing::debug!(path = %path.display(), "Snapshot artifact missing; treating as unchanged");
                return Ok(None);
            }
        }
        Ok(Some((
            layers.local_path(before).or_raise(|| ErrorKind::Storage)?,
            layers.local_path(after).or_raise(|| ErrorKind::Storage)?,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::staging::{CHANGES_FILE, OVERRIDES_FILE};
    use crate::testing::Fixture;

    async fn read_utf16(fixture: &Fixture, path: &Path) -> String {
        Encoding::Utf16Le.decode(&fixture.services.layers.read(path).await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_manifest_is_deterministic() {
        let fixture = Fixture::new();
        fixture.write("drive_c/users/alice/Documents/notes.txt", b"hello");
        fixture.write("drive_c/Program Files/App/app.exe", b"MZ");
        let snapshot = Snapshot::new(&fixture.services);

        snapshot.create(Step::Before).await.unwrap();
        let first = fixture.services.layers.read(&Step::Before.manifest()).await.unwrap();
        snapshot.create(Step::Before).await.unwrap();
        let second = fixture.services.layers.read(&Step::Before.manifest()).await.unwrap();
        assert_eq!(first, second);
        assert!(fixture.services.layers.exists(&Step::Before.registry()).await.unwrap());
    }

    #[tokio::test]
    async fn test_manifest_contents() {
        let fixture = Fixture::new();
        fixture.write("drive_c/users/alice/a.txt", b"0123456789");
        fixture.write("drive_c/Games/huge.pak", b"pak");
        fixture.write("drive_c/other/ignored.txt", b"x");
        fixture.write(".cellar/settings.json", b"{}");
        let lines = Snapshot::new(&fixture.services).manifest().await.unwrap();

        let hash = fixture.services.prefix.hash(Path::new("drive_c/users/alice/a.txt")).await.unwrap();
        assert_eq!(hash.len(), 64);
        assert!(lines.contains(&format!("drive_c/users/alice/a.txt;file;{hash};10")));
        assert!(lines.contains(&"drive_c/users/alice;dir;;".to_string()));
        assert!(lines.iter().any(|l| l.starts_with(".cellar/settings.json;file;")));
        assert!(!lines.iter().any(|l| l.contains("Games")));
        assert!(!lines.iter().any(|l| l.contains("ignored.txt")));
        assert!(!lines.iter().any(|l| l.starts_with(".cellar/layers")));
        let mut sorted = lines.clone();
        sorted.sort();
        assert_eq!(lines, sorted);
    }

    #[tokio::test]
    async fn test_files_changes_reports_new_file() {
        let fixture = Fixture::new();
        let layers = &fixture.services.layers;
        layers.write(Path::new(".snapshot/before.manifest"), b"a.txt;file;H1;10\n").await.unwrap();
        layers.write(Path::new(".snapshot/after.manifest"), b"a.txt;file;H1;10\nb.txt;file;H2;20\n").await.unwrap();

        let files = Snapshot::new(&fixture.services)
            .files_changes(Path::new(".snapshot/before.manifest"), Path::new(".snapshot/after.manifest"))
            .await
            .unwrap();
        assert_eq!(files, vec![PathBuf::from("b.txt")]);
    }

    #[tokio::test]
    async fn test_missing_artifacts_mean_no_changes() {
        let fixture = Fixture::new();
        let snapshot = Snapshot::new(&fixture.services);
        let files = snapshot.files_changes(&Step::Before.manifest(), &Step::After.manifest()).await.unwrap();
        assert!(files.is_empty());
        let registry = snapshot.registry_changes(&Step::Before.registry(), &Step::After.registry()).await.unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_every_added_file_reported_once() {
        let fixture = Fixture::new();
        fixture.write("drive_c/users/alice/existing.txt", b"old");
        let snapshot = Snapshot::new(&fixture.services);
        snapshot.create(Step::Before).await.unwrap();

        fixture.write("drive_c/users/alice/existing.txt", b"new contents");
        fixture.write("drive_c/Program Files/App/app.exe", b"MZ");
        fixture.write("drive_c/Program Files/App/data/level1.dat", b"1");
        fixture.write("drive_c/ProgramData/App/config.ini", b"[x]");
        snapshot.create(Step::After).await.unwrap();

        let mut files = snapshot.files_changes(&Step::Before.manifest(), &Step::After.manifest()).await.unwrap();
        files.sort();
        assert_eq!(
            files,
            vec![
                PathBuf::from("drive_c/Program Files/App/app.exe"),
                PathBuf::from("drive_c/Program Files/App/data/level1.dat"),
                PathBuf::from("drive_c/ProgramData/App/config.ini"),
                PathBuf::from("drive_c/users/alice/existing.txt"),
            ]
        );
    }

    #[tokio::test]
    async fn test_registry_changes_new_key() {
        let fixture = Fixture::new();
        let snapshot = Snapshot::new(&fixture.services);
        snapshot.create(Step::Before).await.unwrap();

        fixture.add_registry(
            "[HKEY_CURRENT_USER\\Software\\Foo]\r\n\
             \"Profile\"=\"C:\\\\users\\\\alice\\\\Foo\"\r\n\
             \"Owner\"=\"alice@workstation\"\r\n\r\n",
        );
        snapshot.create(Step::After).await.unwrap();

        let patch = snapshot.registry_changes(&Step::Before.registry(), &Step::After.registry()).await.unwrap();
        assert_eq!(
            patch,
            "Windows Registry Editor Version 5.00\r\n\r\n\
             [HKEY_CURRENT_USER\\Software\\Foo]\r\n\
             \"Profile\"=\"C:\\\\users\\\\{USER}\\\\Foo\"\r\n\
             \"Owner\"=\"alice@{HOSTNAME}\"\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn test_registry_changes_skip_hardware() {
        let fixture = Fixture::new();
        let snapshot = Snapshot::new(&fixture.services);
        snapshot.create(Step::Before).await.unwrap();

        fixture.add_registry(
            "[HKEY_LOCAL_MACHINE\\HARDWARE\\DESCRIPTION\\System\\CentralProcessor\\1]\r\n\"~MHz\"=dword:00000bb8\r\n\r\n\
             [HKEY_LOCAL_MACHINE\\Software\\Microsoft\\Windows\\CurrentVersion\\MMDevices\\Audio]\r\n\"x\"=\"y\"\r\n\r\n",
        );
        snapshot.create(Step::After).await.unwrap();

        let patch = snapshot.registry_changes(&Step::Before.registry(), &Step::After.registry()).await.unwrap();
        assert_eq!(patch, "");
    }

    #[tokio::test]
    async fn test_create_after_stages_layer() {
        let fixture = Fixture::new();
        let snapshot = Snapshot::new(&fixture.services);
        snapshot.create(Step::Before).await.unwrap();

        fixture.write("drive_c/windows/system32/d3dx9_43.dll", b"MZ\x90\x00");
        fixture.write("drive_c/users/alice/AppData/Roaming/App/app.cfg", b"cfg");
        fixture.add_registry("[HKEY_CURRENT_USER\\Software\\App]\r\n\"Installed\"=dword:00000001\r\n\r\n");
        let staged = snapshot.create_after().await.unwrap();

        assert_eq!(staged.path, staging_dir());
        assert_eq!(staged.files, 2);
        assert!(staged.registry);
        assert_eq!(staged.overrides, 1);

        let layers = &fixture.services.layers;
        assert!(layers.exists(&staging_dir().join("files.tar.gz")).await.unwrap());
        assert!(!layers.exists(&staging_dir().join("files")).await.unwrap());
        let overrides = read_utf16(&fixture, &staging_dir().join(OVERRIDES_FILE)).await;
        assert!(overrides.contains("[HKEY_CURRENT_USER\\Software\\Wine\\DllOverrides]\r\n\"d3dx9_43\"=\"native\""));
        let changes = read_utf16(&fixture, &staging_dir().join(CHANGES_FILE)).await;
        assert!(changes.contains("[HKEY_CURRENT_USER\\Software\\App]"));

        let unpacked = tempfile::tempdir().unwrap();
        let archive = layers.local_path(&staging_dir().join("files.tar.gz")).unwrap();
        cellar_compress::archive::unpack(archive, unpacked.path(), |p| Some(p.to_path_buf())).unwrap();
        assert!(unpacked.path().join("drive_c/users/default/AppData/Roaming/App/app.cfg").is_file());
        assert!(unpacked.path().join("drive_c/windows/system32/d3dx9_43.dll").is_file());
        assert!(!unpacked.path().join("drive_c/users/alice").exists());
    }

    #[tokio::test]
    async fn test_create_after_without_changes() {
        let fixture = Fixture::new();
        let snapshot = Snapshot::new(&fixture.services);
        snapshot.create(Step::Before).await.unwrap();
        let staged = snapshot.create_after().await.unwrap();
        assert!(staged.is_empty());
        assert!(!fixture.services.layers.exists(&staging_dir().join(CHANGES_FILE)).await.unwrap());

        snapshot.clear().await.unwrap();
        assert!(!fixture.services.layers.exists(Path::new(SCRATCH_DIR)).await.unwrap());
    }
}
