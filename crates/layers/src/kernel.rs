//! The compatibility runtime, as far as layers are concerned.
//!
//! Capturing and replaying layers never starts the programs being installed;
//! it only needs to know where the prefix keeps its files and to move the
//! registry in and out of text files.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::instrument;

#[async_trait]
pub trait Kernel: Send + Sync {
    /// Absolute path of the emulated `C:` drive.
    fn drive_root(&self) -> PathBuf;

    /// Absolute path of the external games mount, if any. Never snapshotted.
    fn games_dir(&self) -> Option<PathBuf>;

    /// Name of the user profile folder under `users/`.
    fn user_name(&self) -> String;

    /// Dump the full registry hive to `path` (UTF-16LE `.reg` text).
    async fn export_registry(&self, path: &Path) -> Result<()>;

    /// Merge a `.reg` file into the registry.
    async fn import_registry(&self, path: &Path) -> Result<()>;
}

/// Wine, driven through its `regedit`.
#[derive(Clone, Debug)]
pub struct Wine {
    binary: PathBuf,
    prefix: PathBuf,
    games_dir: Option<PathBuf>,
    user: String,
}

impl Wine {
    /// `binary` is resolved on `PATH` unless it already is a path.
    /// `user` falls back to `$USER`, which is what Wine names the profile.
    pub fn new(
        binary: impl AsRef<Path>,
        prefix: impl Into<PathBuf>,
        games_dir: Option<PathBuf>,
        user: Option<String>,
    ) -> Result<Self> {
        let binary = binary.as_ref();
        let binary =
            which::which(binary).or_raise(|| ErrorKind::Kernel(format!("{} not found", binary.display())))?;
        let user = match user {
            Some(user) => user,
            None => std::env::var("USER")
                .ok()
                .or_else(|| std::env::var("LOGNAME").ok())
                .ok_or_raise(|| ErrorKind::Kernel("could not determine user name".to_string()))?,
        };
        tracing::debug!(binary = %binary.display(), %user, "Using Wine");
        Ok(Self { binary, prefix: prefix.into(), games_dir, user })
    }

    async fn regedit(&self, args: &[&str], path: &Path) -> Result<()> {
        let output = Command::new(&self.binary)
            .arg("regedit")
            .args(args)
            .arg(windows_path(path))
            .env("WINEPREFIX", &self.prefix)
            .env("WINEDEBUG", "-all")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .or_raise(|| ErrorKind::Kernel(format!("could not start {}", self.binary.display())))?;
        if !output.status.success() {
            tracing::warn!(stderr = %String::from_utf8_lossy(&output.stderr).trim(), "regedit failed");
            exn::bail!(ErrorKind::Kernel(format!("regedit exited with {}", output.status)));
        }
        Ok(())
    }
}

#[async_trait]
impl Kernel for Wine {
    fn drive_root(&self) -> PathBuf {
        self.prefix.join("drive_c")
    }

    fn games_dir(&self) -> Option<PathBuf> {
        self.games_dir.clone()
    }

    fn user_name(&self) -> String {
        self.user.clone()
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    async fn export_registry(&self, path: &Path) -> Result<()> {
        self.regedit(&["/E"], path).await
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    async fn import_registry(&self, path: &Path) -> Result<()> {
        self.regedit(&[], path).await
    }
}

/// Host path as seen from inside the prefix, through the `Z:` drive that
/// Wine maps to `/`.
pub fn windows_path(path: &Path) -> String {
    format!("Z:{}", path.display().to_string().replace('/', "\\"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_path() {
        assert_eq!(windows_path(Path::new("/home/alice/.wine/x.reg")), "Z:\\home\\alice\\.wine\\x.reg");
    }

    #[test]
    fn test_wine_layout() {
        let wine = Wine {
            binary: PathBuf::from("/usr/bin/wine"),
            prefix: PathBuf::from("/home/alice/.wine"),
            games_dir: None,
            user: "alice".to_string(),
        };
        assert_eq!(wine.drive_root(), PathBuf::from("/home/alice/.wine/drive_c"));
        assert_eq!(wine.user_name(), "alice");
        assert!(wine.games_dir().is_none());
    }

    #[test]
    fn test_missing_binary() {
        let err = Wine::new("/nonexistent/wine", "/tmp/prefix", None, Some("alice".to_string())).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Kernel(_)));
    }
}
