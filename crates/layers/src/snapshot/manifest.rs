//! One line per filesystem object: `<relative>;<file|dir>;<hash>;<size>`.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManifestKind {
    File,
    Dir,
}

/// A single manifest line.
///
/// Hash and size are only present for files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    pub path: PathBuf,
    pub kind: ManifestKind,
    pub hash: Option<String>,
    pub size: Option<u64>,
}

impl ManifestEntry {
    pub fn file(path: impl Into<PathBuf>, hash: impl Into<String>, size: u64) -> Self {
        Self { path: path.into(), kind: ManifestKind::File, hash: Some(hash.into()), size: Some(size) }
    }

    pub fn dir(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), kind: ManifestKind::Dir, hash: None, size: None }
    }
}

impl Display for ManifestEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let kind = match self.kind {
            ManifestKind::File => "file",
            ManifestKind::Dir => "dir",
        };
        write!(
            f,
            "{};{kind};{};{}",
            self.path.display(),
            self.hash.as_deref().unwrap_or_default(),
            self.size.map(|s| s.to_string()).unwrap_or_default()
        )
    }
}

/// The line that failed to parse.
#[derive(Debug, PartialEq, Eq)]
pub struct InvalidLine(pub String);

impl FromStr for ManifestEntry {
    type Err = InvalidLine;

    /// Fields are split from the right, so a path containing `;` survives.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidLine(line.to_string());
        let mut fields = line.rsplitn(4, ';');
        let (Some(size), Some(hash), Some(kind), Some(path)) = (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(invalid());
        };
        if path.is_empty() {
            return Err(invalid());
        }
        match kind {
            "file" => Ok(Self::file(path, hash, size.parse().map_err(|_| invalid())?)),
            "dir" => Ok(Self::dir(path)),
            _ => Err(invalid()),
        }
    }
}
