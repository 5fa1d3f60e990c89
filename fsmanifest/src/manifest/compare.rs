//! Manifest comparison.
//!
//! Quick fidelity looks only at size and mtime, so content that changed
//! without touching either (a faulty copy that preserved both, bit rot) goes
//! unnoticed. Strict fidelity also compares content hashes and catches it.

use super::{FileRecord, Manifest};
use crate::utils::errors::{ManifestError, Result};
use serde::Serialize;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Fidelity {
    /// Size and modification time only
    Quick,
    /// Size, modification time and content hash
    Strict,
}

/// Before/after pair for a changed field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Delta<T> {
    pub before: T,
    pub after: T,
}

/// Which fields of a path differ between the two sides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Changes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<Delta<i64>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<Delta<u64>>,

    /// Content hashes differ (strict fidelity only)
    pub content: bool,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        self.modified_time.is_none() && self.size.is_none() && !self.content
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "changes", rename_all = "lowercase")]
pub enum DiffKind {
    /// Only on the second side
    Added,
    /// Only on the first side
    Removed,
    /// On both sides with differing fields
    Modified(Changes),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffEntry {
    pub path: String,
    #[serde(flatten)]
    pub kind: DiffKind,
}

impl DiffEntry {
    pub fn added(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: DiffKind::Added,
        }
    }

    pub fn removed(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: DiffKind::Removed,
        }
    }

    pub fn modified(path: impl Into<String>, changes: Changes) -> Self {
        Self {
            path: path.into(),
            kind: DiffKind::Modified(changes),
        }
    }
}

/// Compare `before` against `after`.
///
/// Entries come back sorted by path; unchanged paths are not reported. In
/// strict mode every common path must carry a hash on both sides, otherwise
/// [`ManifestError::MissingHash`] is returned.
pub fn compare(before: &Manifest, after: &Manifest, fidelity: Fidelity) -> Result<Vec<DiffEntry>> {
    let mut entries = Vec::new();
    let mut left = before.records().iter().peekable();
    let mut right = after.records().iter().peekable();

    loop {
        let order = match (left.peek(), right.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(a), Some(b)) => a.relative_path.cmp(&b.relative_path),
        };

        match order {
            Ordering::Less => {
                if let Some(a) = left.next() {
                    entries.push(DiffEntry::removed(&a.relative_path));
                }
            }
            Ordering::Greater => {
                if let Some(b) = right.next() {
                    entries.push(DiffEntry::added(&b.relative_path));
                }
            }
            Ordering::Equal => {
                if let (Some(a), Some(b)) = (left.next(), right.next()) {
                    let changes = changes_between(a, b, fidelity)?;
                    if !changes.is_empty() {
                        entries.push(DiffEntry::modified(&a.relative_path, changes));
                    }
                }
            }
        }
    }

    Ok(entries)
}

/// Field-level differences between two records of the same path
pub fn changes_between(
    before: &FileRecord,
    after: &FileRecord,
    fidelity: Fidelity,
) -> Result<Changes> {
    let mut changes = Changes::default();

    if before.modified_time != after.modified_time {
        changes.modified_time = Some(Delta {
            before: before.modified_time,
            after: after.modified_time,
        });
    }
    if before.size_bytes != after.size_bytes {
        changes.size = Some(Delta {
            before: before.size_bytes,
            after: after.size_bytes,
        });
    }

    if fidelity == Fidelity::Strict {
        match (&before.content_hash, &after.content_hash) {
            (Some(a), Some(b)) => changes.content = a != b,
            _ => return Err(ManifestError::MissingHash(before.relative_path.clone())),
        }
    }

    Ok(changes)
}
