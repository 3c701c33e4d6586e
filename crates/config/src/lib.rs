//! Layered configuration for cellar.
//!
//! Values are merged from, in increasing priority:
//!
//! 1. built-in defaults
//! 2. `config.toml` / `config.yaml` in the platform config directory
//! 3. an explicitly given file (TOML, YAML or JSON, picked by extension)
//! 4. `CELLAR_` environment variables, with `__` separating nested keys
//!    (e.g. `CELLAR_ARCHIVE__COMPRESSION=bzip2`)
//!
//! ```no_run
//! use cellar_config::Config;
//!
//! # fn example() -> cellar_config::error::Result<()> {
//! let config = Config::load(None)?;
//! println!("layers live in {}", config.layers_dir()?.display());
//! # Ok(())
//! # }
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use cellar_compress::Compression;
use directories::ProjectDirs;
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "CELLAR_";
/// Folder inside the prefix holding cellar's own metadata.
pub const METADATA_DIR: &str = ".cellar";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the prefix being managed (the folder containing `drive_c`).
    pub prefix: Option<PathBuf>,
    /// Where committed and pending layers are kept.
    pub layers_dir: Option<PathBuf>,
    /// Shared per-user layer database.
    pub database_dir: Option<PathBuf>,
    /// External games storage mount, never snapshotted.
    pub games_dir: Option<PathBuf>,
    /// Overrides the user name detected from the environment.
    pub user: Option<String>,
    pub diff: DiffConfig,
    pub archive: ArchiveConfig,
    pub wine: WineConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// Path to a `diff` executable supporting `-c`.
    pub command: Option<PathBuf>,
    /// Always use the in-process engine.
    pub builtin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    #[serde(with = "compression")]
    pub compression: Compression,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WineConfig {
    pub binary: PathBuf,
}
impl Default for WineConfig {
    fn default() -> Self {
        Self { binary: PathBuf::from("wine") }
    }
}

impl Config {
    /// Load and validate configuration from every source.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(dirs) = project_dirs() {
            let dir = dirs.config_dir();
            tracing::trace!(dir = %dir.display(), "Looking for configuration files");
            figment = figment.merge(Toml::file(dir.join("config.toml"))).merge(Yaml::file(dir.join("config.yaml")));
        }
        if let Some(path) = explicit {
            if !path.is_file() {
                exn::bail!(ErrorKind::Invalid("config file"));
            }
            figment = match path.extension().and_then(|e| e.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }
        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extract and validate from an already assembled [`Figment`].
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (field, path) in [
            ("prefix", &self.prefix),
            ("layers_dir", &self.layers_dir),
            ("database_dir", &self.database_dir),
            ("games_dir", &self.games_dir),
        ] {
            if let Some(path) = path
                && !path.is_absolute()
            {
                exn::bail!(ErrorKind::Invalid(field));
            }
        }
        if self.user.as_deref().is_some_and(|user| user.trim().is_empty() || user.contains(['/', '\\'])) {
            exn::bail!(ErrorKind::Invalid("user"));
        }
        if self.wine.binary.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid("wine.binary"));
        }
        Ok(())
    }

    /// The prefix, falling back to `WINEPREFIX` and then `~/.wine`.
    pub fn prefix(&self) -> Result<PathBuf> {
        if let Some(prefix) = &self.prefix {
            return Ok(prefix.clone());
        }
        if let Some(prefix) = std::env::var_os("WINEPREFIX").map(PathBuf::from)
            && prefix.is_absolute()
        {
            return Ok(prefix);
        }
        let dirs = directories::BaseDirs::new().ok_or_raise(|| ErrorKind::Directories)?;
        Ok(dirs.home_dir().join(".wine"))
    }

    /// `layers_dir`, defaulting to `<prefix>/.cellar/layers`.
    pub fn layers_dir(&self) -> Result<PathBuf> {
        match &self.layers_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(self.prefix()?.join(METADATA_DIR).join("layers")),
        }
    }

    /// `database_dir`, defaulting to `<data dir>/layers`.
    pub fn database_dir(&self) -> Result<PathBuf> {
        match &self.database_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(project_dirs().ok_or_raise(|| ErrorKind::Directories)?.data_dir().join("layers")),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "cellar")
}

/// (De)serialize [`Compression`] through its short name.
mod compression {
    use cellar_compress::Compression;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub(super) fn serialize<S: Serializer>(value: &Compression, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(value.as_str())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Compression, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(|e: cellar_compress::error::Error| D::Error::custom(&*e))
    }
}
