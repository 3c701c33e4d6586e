//! Tar archives of whole directory trees.
//!
//! Both functions are blocking; call them from
//! [`spawn_blocking`](https://docs.rs/tokio/latest/tokio/task/fn.spawn_blocking.html)
//! when inside an async context.

use crate::Compression;
use crate::construct::SIGNATURE_LEN;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fs::{File, create_dir_all};
use std::io::{BufWriter, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use tracing::instrument;

/// Pack every entry below `source` into a tar archive at `destination`.
///
/// Entry names are relative to `source`. Symlinks are stored as links, not
/// followed, so a prefix's `dosdevices` style links survive the round trip.
#[instrument(skip_all, fields(source = %source.as_ref().display(), format = %compression))]
pub fn pack(source: impl AsRef<Path>, destination: impl AsRef<Path>, compression: Compression) -> Result<()> {
    let file = File::create(destination.as_ref()).or_raise(|| ErrorKind::Io)?;
    let encoder = compression.wrap_writer(BufWriter::new(file))?;
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_dir_all(".", source.as_ref()).or_raise(|| ErrorKind::Io)?;
    let encoder = builder.into_inner().or_raise(|| ErrorKind::Io)?;
    encoder.finish()?;
    Ok(())
}

/// Unpack the archive at `source` into `destination`, passing every entry
/// path through `map` first.
///
/// `map` receives the normalized, relative entry path and returns where it
/// should land (relative to `destination`), or `None` to skip the entry.
/// Entries that would escape `destination` are rejected with
/// [`ErrorKind::UnsafeEntry`]. Returns the number of entries written.
///
/// The format is sniffed from the archive's leading bytes, falling back to
/// its file name, so a renamed archive still unpacks.
#[instrument(skip_all, fields(source = %source.as_ref().display(), destination = %destination.as_ref().display()))]
pub fn unpack<F>(source: impl AsRef<Path>, destination: impl AsRef<Path>, mut map: F) -> Result<usize>
where
    F: FnMut(&Path) -> Option<PathBuf>,
{
    let source = source.as_ref();
    let destination = destination.as_ref();
    let mut file = File::open(source).or_raise(|| ErrorKind::Io)?;
    let compression = detect(&mut file, source)?;
    let reader = compression.wrap_reader(file)?;
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_mtime(true);

    let mut written = 0;
    for entry in archive.entries().or_raise(|| ErrorKind::InvalidData)? {
        let mut entry = entry.or_raise(|| ErrorKind::InvalidData)?;
        let raw = entry.path().or_raise(|| ErrorKind::InvalidData)?.into_owned();
        let Some(relative) = normalize(&raw)? else {
            // The archive root itself ("./").
            continue;
        };
        let Some(target) = map(&relative) else {
            tracing::trace!(path = %relative.display(), "Skipping archive entry");
            continue;
        };
        let Some(target) = normalize(&target)? else {
            continue;
        };
        let target = destination.join(target);
        if let Some(parent) = target.parent() {
            create_dir_all(parent).or_raise(|| ErrorKind::Io)?;
        }
        entry.unpack(&target).or_raise(|| ErrorKind::Io)?;
        written += 1;
    }
    tracing::debug!(entries = written, "Archive unpacked");
    Ok(written)
}

fn detect(file: &mut File, path: &Path) -> Result<Compression> {
    let mut magic = Vec::with_capacity(SIGNATURE_LEN);
    file.by_ref().take(SIGNATURE_LEN as u64).read_to_end(&mut magic).or_raise(|| ErrorKind::Io)?;
    file.seek(SeekFrom::Start(0)).or_raise(|| ErrorKind::Io)?;
    Ok(match Compression::from_magic_bytes(&magic) {
        Compression::None => Compression::from_path(path),
        detected => detected,
    })
}

/// Strip `.` components and reject anything that climbs or is absolute.
/// Returns `None` for a path that normalizes to nothing.
fn normalize(path: &Path) -> Result<Option<PathBuf>> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {},
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                exn::bail!(ErrorKind::UnsafeEntry(path.to_path_buf()))
            },
        }
    }
    Ok((!out.as_os_str().is_empty()).then_some(out))
}
