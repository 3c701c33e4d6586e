//! Rooted filesystem access.
//!
//! Every prefix, layer store and shared layer database is accessed through a
//! [`StorageBackend`] anchored at a root directory. Paths handed to a backend
//! are always relative to that root and validated with [`validate_path`] so
//! nothing (a malformed manifest line, a hostile archive) can reach outside.

pub mod backend;
mod entry;
pub mod error;
mod path;

pub use crate::backend::{BoxSyncRead, BoxSyncWrite, LocalBackend, StorageBackend};
pub use crate::entry::{Entry, EntryKind};
pub use crate::path::validate as validate_path;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
