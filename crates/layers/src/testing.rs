//! Fixtures shared by the unit tests of this crate.

use crate::error::{ErrorKind, Result};
use crate::{Identity, Kernel, Services};
use async_trait::async_trait;
use cellar_diff::{Differ, Encoding};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Runtime stand-in: exports whatever registry text it was handed and
/// remembers what got imported.
pub(crate) struct FakeKernel {
    prefix: PathBuf,
    user: String,
    games: Option<PathBuf>,
    pub registry: Mutex<String>,
    pub imported: Mutex<Vec<String>>,
    pub fail_export: Mutex<bool>,
}

#[async_trait]
impl Kernel for FakeKernel {
    fn drive_root(&self) -> PathBuf {
        self.prefix.join("drive_c")
    }

    fn games_dir(&self) -> Option<PathBuf> {
        self.games.clone()
    }

    fn user_name(&self) -> String {
        self.user.clone()
    }

    async fn export_registry(&self, path: &Path) -> Result<()> {
        if *self.fail_export.lock().unwrap() {
            exn::bail!(ErrorKind::Kernel("export refused".to_string()));
        }
        let text = self.registry.lock().unwrap().clone();
        std::fs::write(path, Encoding::Utf16Le.encode(&text)).unwrap();
        Ok(())
    }

    async fn import_registry(&self, path: &Path) -> Result<()> {
        let text = Encoding::Utf16Le.decode(&std::fs::read(path).unwrap()).unwrap();
        self.imported.lock().unwrap().push(text);
        Ok(())
    }
}

pub(crate) const BASE_REGISTRY: &str = "\
Windows Registry Editor Version 5.00\r
\r
[HKEY_CURRENT_USER\\Software\\Wine]\r
\"Version\"=\"win10\"\r
\r
[HKEY_LOCAL_MACHINE\\HARDWARE\\DESCRIPTION\\System\\CentralProcessor\\0]\r
\"~MHz\"=dword:00000bb8\r
\r
";

pub(crate) struct Fixture {
    pub temp: TempDir,
    pub prefix: PathBuf,
    pub kernel: Arc<FakeKernel>,
    pub services: Services,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_user("alice", None)
    }

    /// A fresh prefix for `user`, optionally sharing another fixture's
    /// database directory.
    pub fn with_user(user: &str, database: Option<&Path>) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let prefix = temp.path().join("prefix");
        for dir in ["drive_c/windows/system32", "drive_c/Program Files", "drive_c/ProgramData"] {
            std::fs::create_dir_all(prefix.join(dir)).unwrap();
        }
        std::fs::create_dir_all(prefix.join("drive_c/users").join(user)).unwrap();
        std::fs::write(prefix.join("drive_c/windows/win.ini"), "[fonts]\r\n").unwrap();

        let kernel = Arc::new(FakeKernel {
            prefix: prefix.clone(),
            user: user.to_string(),
            games: Some(prefix.join("drive_c/Games")),
            registry: Mutex::new(BASE_REGISTRY.to_string()),
            imported: Mutex::new(Vec::new()),
            fail_export: Mutex::new(false),
        });
        let database = database.map(Path::to_path_buf).unwrap_or_else(|| temp.path().join("database"));
        let services = Services::new(kernel.clone(), &prefix, prefix.join(".cellar/layers"), database)
            .unwrap()
            .with_differ(Differ::builtin())
            .with_identity(Identity::new(user, "workstation", prefix.display().to_string()));
        Self { temp, prefix, kernel, services }
    }

    /// Write a file below the prefix.
    pub fn write(&self, relative: &str, data: &[u8]) {
        let path = self.prefix.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    /// Append a chunk of `.reg` text to what the kernel will export next.
    pub fn add_registry(&self, text: &str) {
        self.kernel.registry.lock().unwrap().push_str(text);
    }

    pub fn database_dir(&self) -> PathBuf {
        self.temp.path().join("database")
    }
}
