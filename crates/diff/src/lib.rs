//! Line-level change sets between two text files.
//!
//! The snapshot code never needs a full patch, only *which* lines of the
//! newer file were inserted and which lines of the older file went away.
//! A [`Differ`] produces that as a [`DiffChangeSet`]:
//!
//! - **External** engine: runs a context diff (`diff -c`) and reconstructs
//!   the change set from its textual output with [`parse`]
//! - **Builtin** engine: computes the same change set in-process with the
//!   [`similar`] crate when no `diff` executable is available
//!
//! Inputs are decoded with an [`Encoding`] first so UTF-16 registry exports
//! and UTF-8 manifests go through the same path.

mod context;
mod encoding;
mod engine;
pub mod error;

pub use crate::context::parse;
pub use crate::encoding::{Encoding, split_lines};
pub use crate::engine::Differ;
use std::collections::BTreeMap;

/// Which side of a diff a line belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangeKind {
    /// Line only present in the newer file; indexed against the newer file.
    Inserted,
    /// Line only present in the older file; indexed against the older file.
    Deleted,
}

/// Changed lines keyed by their zero-based index in the file they came from.
///
/// Unchanged lines are never recorded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiffChangeSet {
    pub inserted: BTreeMap<usize, String>,
    pub deleted: BTreeMap<usize, String>,
}
impl DiffChangeSet {
    pub fn get(&self, kind: ChangeKind) -> &BTreeMap<usize, String> {
        match kind {
            ChangeKind::Inserted => &self.inserted,
            ChangeKind::Deleted => &self.deleted,
        }
    }

    pub(crate) fn get_mut(&mut self, kind: ChangeKind) -> &mut BTreeMap<usize, String> {
        match kind {
            ChangeKind::Inserted => &mut self.inserted,
            ChangeKind::Deleted => &mut self.deleted,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.deleted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_set_accessors() {
        let mut set = DiffChangeSet::default();
        assert!(set.is_empty());
        set.get_mut(ChangeKind::Inserted).insert(3, "b.txt;file;H2;20".to_string());
        assert!(!set.is_empty());
        assert_eq!(set.get(ChangeKind::Inserted).get(&3).map(String::as_str), Some("b.txt;file;H2;20"));
        assert!(set.get(ChangeKind::Deleted).is_empty());
    }
}
