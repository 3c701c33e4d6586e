//! Capture the side effects of an installation step into a *layer*, and
//! replay committed layers onto fresh prefixes.
//!
//! - [`Snapshot`] records manifests and registry exports, and stages the
//!   difference between two of them
//! - [`Layer`] is one persisted change set with its `layer.json`
//! - [`Layers`] drives the capture lifecycle of one prefix
//! - [`Database`] is the shared per-user repository of layers
//! - [`apply`] replays active layers onto a prefix
//!
//! Everything is wired through a [`Services`] value passed by reference.

pub mod apply;
pub mod database;
pub mod error;
pub mod kernel;
pub mod layer;
pub mod layers;
mod services;
pub mod snapshot;
mod template;
#[cfg(test)]
pub(crate) mod testing;

pub use crate::database::Database;
pub use crate::kernel::{Kernel, Wine};
pub use crate::layer::{Layer, LayerField, LayerObject};
pub use crate::layers::Layers;
pub use crate::services::Services;
pub use crate::snapshot::{Snapshot, Step};
pub use crate::template::Identity;
