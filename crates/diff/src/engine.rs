use crate::error::{ErrorKind, Result};
use crate::{ChangeKind, DiffChangeSet, Encoding, parse, split_lines};
use exn::ResultExt;
use similar::{Algorithm, ChangeTag, TextDiff};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::instrument;

/// How change sets get computed.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Engine {
    /// A context diff executable, e.g. `/usr/bin/diff`.
    External(PathBuf),
    /// Myers diff computed in-process.
    Builtin,
}

/// Computes [`DiffChangeSet`]s between two files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Differ {
    engine: Engine,
}

impl Default for Differ {
    fn default() -> Self {
        Self::discover(None, false)
    }
}

impl Differ {
    /// Pick an engine.
    ///
    /// An explicit `command` wins; otherwise `diff` is looked up on `PATH`.
    /// Falls back to the builtin engine when `builtin` is set or nothing
    /// was found.
    pub fn discover(command: Option<PathBuf>, builtin: bool) -> Self {
        if builtin {
            return Self::builtin();
        }
        if let Some(command) = command {
            return Self::external(command);
        }
        match which::which("diff") {
            Ok(path) => Self::external(path),
            Err(_) => {
                tracing::info!("diff executable not found in PATH; using builtin engine");
                Self::builtin()
            },
        }
    }

    pub fn external(command: impl Into<PathBuf>) -> Self {
        Self { engine: Engine::External(command.into()) }
    }

    pub fn builtin() -> Self {
        Self { engine: Engine::Builtin }
    }

    pub fn is_builtin(&self) -> bool {
        self.engine == Engine::Builtin
    }

    /// Load both files as line arrays and diff them.
    #[instrument(skip_all, fields(old = %old.display(), new = %new.display(), %encoding))]
    pub async fn diff(&self, old: &Path, new: &Path, encoding: Encoding) -> Result<DiffChangeSet> {
        let old = encoding.decode(&tokio::fs::read(old).await.or_raise(|| ErrorKind::Io)?)?;
        let new = encoding.decode(&tokio::fs::read(new).await.or_raise(|| ErrorKind::Io)?)?;
        self.diff_lines(&split_lines(&old), &split_lines(&new)).await
    }

    /// Diff two line arrays that are already in memory.
    pub async fn diff_lines(&self, old: &[String], new: &[String]) -> Result<DiffChangeSet> {
        let result = match &self.engine {
            Engine::External(command) => run_external(command, old, new).await?,
            Engine::Builtin => builtin(old, new),
        };
        tracing::debug!(
            inserted = result.inserted.len(),
            deleted = result.deleted.len(),
            builtin = self.is_builtin(),
            "Diff computed"
        );
        Ok(result)
    }
}

/// Run `diff -c` over normalized UTF-8 copies of both inputs.
///
/// The inputs are rewritten rather than handed over as-is: a line-oriented
/// differ treats UTF-16 as binary and would report nothing useful.
async fn run_external(command: &Path, old: &[String], new: &[String]) -> Result<DiffChangeSet> {
    let scratch = tempfile::tempdir().or_raise(|| ErrorKind::Io)?;
    let old_path = scratch.path().join("old");
    let new_path = scratch.path().join("new");
    tokio::fs::write(&old_path, join_lines(old)).await.or_raise(|| ErrorKind::Io)?;
    tokio::fs::write(&new_path, join_lines(new)).await.or_raise(|| ErrorKind::Io)?;

    let output = Command::new(command)
        .arg("-c")
        .arg(&old_path)
        .arg(&new_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .or_raise(|| ErrorKind::Spawn(command.display().to_string()))?;

    match output.status.code() {
        Some(0) => Ok(DiffChangeSet::default()),
        Some(1) => Ok(parse(&String::from_utf8_lossy(&output.stdout), old, new)),
        code => {
            tracing::warn!(stderr = %String::from_utf8_lossy(&output.stderr).trim(), "diff command failed");
            // No exit code at all means a signal killed it.
            exn::bail!(ErrorKind::CommandFailed(code.unwrap_or(-1)))
        },
    }
}

fn join_lines(lines: &[String]) -> String {
    let mut text = lines.join("\n");
    if !lines.is_empty() {
        text.push('\n');
    }
    text
}

fn builtin(old: &[String], new: &[String]) -> DiffChangeSet {
    let old: Vec<&str> = old.iter().map(String::as_str).collect();
    let new: Vec<&str> = new.iter().map(String::as_str).collect();
    let diff = TextDiff::configure().algorithm(Algorithm::Myers).diff_slices(&old, &new);

    let mut result = DiffChangeSet::default();
    for change in diff.iter_all_changes() {
        match (change.tag(), change.old_index(), change.new_index()) {
            (ChangeTag::Delete, Some(index), _) => {
                result.get_mut(ChangeKind::Deleted).insert(index, change.value().to_string());
            },
            (ChangeTag::Insert, _, Some(index)) => {
                result.get_mut(ChangeKind::Inserted).insert(index, change.value().to_string());
            },
            _ => {},
        }
    }
    result
}
