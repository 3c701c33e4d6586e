//! Context diff (`diff -c`) output parsing.
//!
//! ```text
//! *** before.manifest   2024-01-01 00:00:00
//! --- after.manifest    2024-01-01 00:00:01
//! ***************
//! *** 1 ****
//! --- 1,2 ----
//!   a.txt;file;H1;10
//! + b.txt;file;H2;20
//! ```
//!
//! Each hunk has an old half (`*** N,M ****`) followed by a new half
//! (`--- N,M ----`). Content lines carry a two character marker: `+ `, `- `,
//! `! ` for changed lines and two spaces for context.

use crate::{ChangeKind, DiffChangeSet};
use regex::Regex;
use std::sync::LazyLock;

static OLD_HUNK_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\*\*\* (\d+)(?:,\d+)? \*\*\*\*$").unwrap());
static NEW_HUNK_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^--- (\d+)(?:,\d+)? ----$").unwrap());
static SEPARATOR_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\*{15}$").unwrap());

/// Position tracking for each half of the hunk currently being read.
struct Cursor {
    section: ChangeKind,
    old: usize,
    new: usize,
}
impl Cursor {
    fn position(&mut self) -> &mut usize {
        match self.section {
            ChangeKind::Deleted => &mut self.old,
            ChangeKind::Inserted => &mut self.new,
        }
    }
}

/// Rebuild a [`DiffChangeSet`] from context diff output.
///
/// `old` and `new` are the line arrays of the two files that were diffed;
/// recorded values are taken from them rather than from the diff output so
/// trailing whitespace survives intact. Every content line advances the
/// position of the half it belongs to, and each hunk header resets it.
/// Positions that fall outside the line arrays are ignored.
pub fn parse(output: &str, old: &[String], new: &[String]) -> DiffChangeSet {
    let mut result = DiffChangeSet::default();
    let mut cursor = Cursor { section: ChangeKind::Deleted, old: 1, new: 1 };

    for line in output.lines() {
        if let Some(captures) = OLD_HUNK_REGEX.captures(line) {
            cursor.section = ChangeKind::Deleted;
            cursor.old = captures[1].parse().unwrap_or(0);
            continue;
        }
        if let Some(captures) = NEW_HUNK_REGEX.captures(line) {
            cursor.section = ChangeKind::Inserted;
            cursor.new = captures[1].parse().unwrap_or(0);
            continue;
        }
        if SEPARATOR_REGEX.is_match(line) {
            cursor.section = ChangeKind::Deleted;
            continue;
        }

        let mut chars = line.chars();
        let (Some(marker), Some(' ')) = (chars.next(), chars.next()) else {
            // File headers, "\ No newline at end of file" and the like.
            continue;
        };
        if !matches!(marker, '+' | '-' | '!' | ' ') {
            continue;
        }
        let section = cursor.section;
        let position = cursor.position();
        if marker != ' '
            && let Some(index) = position.checked_sub(1)
        {
            let source = match section {
                ChangeKind::Deleted => old,
                ChangeKind::Inserted => new,
            };
            match source.get(index) {
                Some(original) => {
                    result.get_mut(section).insert(index, original.clone());
                },
                None => tracing::warn!(index, ?section, "Diff output references a line past the end of input"),
            }
        }
        *position += 1;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_insertion() {
        let old = lines(&["a.txt;file;H1;10"]);
        let new = lines(&["a.txt;file;H1;10", "b.txt;file;H2;20"]);
        let output = "\
*** before.manifest\t2024-01-01 00:00:00.000000000 +0000
--- after.manifest\t2024-01-01 00:00:01.000000000 +0000
***************
*** 1 ****
--- 1,2 ----
  a.txt;file;H1;10
+ b.txt;file;H2;20
";
        let result = parse(output, &old, &new);
        assert!(result.deleted.is_empty());
        assert_eq!(result.inserted.len(), 1);
        assert_eq!(result.inserted.get(&1).map(String::as_str), Some("b.txt;file;H2;20"));
    }

    #[test]
    fn test_parse_change_with_unequal_halves() {
        let old = lines(&["x", "a", "b", "y"]);
        let new = lines(&["x", "c", "y", "z", "w"]);
        let output = "\
***************
*** 1,4 ****
  x
! a
! b
  y
--- 1,5 ----
  x
! c
  y
+ z
+ w
";
        let result = parse(output, &old, &new);
        assert_eq!(result.deleted.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(result.deleted.get(&2).map(String::as_str), Some("b"));
        assert_eq!(result.inserted.keys().copied().collect::<Vec<_>>(), vec![1, 3, 4]);
        assert_eq!(result.inserted.get(&4).map(String::as_str), Some("w"));
    }

    #[test]
    fn test_parse_multiple_hunks() {
        let old: Vec<String> = (1..=20).map(|i| format!("line {i}")).collect();
        let mut new = old.clone();
        new.remove(1);
        new.insert(17, "added".to_string());
        let output = "\
***************
*** 1,5 ****
  line 1
- line 2
  line 3
  line 4
  line 5
--- 1,4 ----
***************
*** 15,20 ****
--- 14,20 ----
  line 15
  line 16
  line 17
  line 18
+ added
  line 19
  line 20
";
        let result = parse(output, &old, &new);
        assert_eq!(result.deleted.len(), 1);
        assert_eq!(result.deleted.get(&1).map(String::as_str), Some("line 2"));
        assert_eq!(result.inserted.len(), 1);
        assert_eq!(result.inserted.get(&17).map(String::as_str), Some("added"));
    }

    #[test]
    fn test_parse_ignores_out_of_range() {
        let output = "*** 1 ****\n--- 5 ----\n+ ghost\n";
        let result = parse(output, &[], &lines(&["only"]));
        assert!(result.is_empty());
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse("", &[], &[]).is_empty());
    }
}
