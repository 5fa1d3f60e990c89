//! File inventory types.
//!
//! A [`Manifest`] records every regular file under a directory with its size,
//! mtime, content hash and (where available) stable identifier. Records are
//! kept sorted by path and paths are unique; a manifest is never modified
//! after construction, updates always build a new one.

pub mod codec;
pub mod compare;
pub mod reconcile;
pub mod verify;

use crate::utils::errors::{ManifestError, Result};
use serde::Serialize;
use std::collections::HashMap;

pub use compare::{compare, Changes, Delta, DiffEntry, DiffKind, Fidelity};
pub use reconcile::{reconcile, Reconciliation, ReconcileStats};

/// One regular file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    /// Root-relative path, `/`-separated
    pub relative_path: String,

    /// Seconds since Unix epoch
    pub modified_time: i64,

    /// File size in bytes
    pub size_bytes: u64,

    /// Lowercase hex MD5 of the content; absent for quick records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    /// Platform file identifier (inode number on Unix)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stable_id: Option<u64>,
}

impl FileRecord {
    /// Same size and mtime, the only fields quick comparison looks at
    pub fn same_metadata(&self, other: &FileRecord) -> bool {
        self.size_bytes == other.size_bytes && self.modified_time == other.modified_time
    }
}

/// Ordered, path-unique collection of [`FileRecord`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    records: Vec<FileRecord>,
}

impl Manifest {
    /// Build a manifest, sorting by path.
    ///
    /// Fails with [`ManifestError::DuplicatePath`] if two records share a path.
    pub fn new(mut records: Vec<FileRecord>) -> Result<Self> {
        records.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        if let Some(pair) = records
            .windows(2)
            .find(|pair| pair[0].relative_path == pair[1].relative_path)
        {
            return Err(ManifestError::DuplicatePath(pair[0].relative_path.clone()));
        }
        Ok(Self { records })
    }

    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<FileRecord> {
        self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Look up a record by path
    pub fn get(&self, relative_path: &str) -> Option<&FileRecord> {
        self.records
            .binary_search_by(|r| r.relative_path.as_str().cmp(relative_path))
            .ok()
            .map(|i| &self.records[i])
    }

    pub fn total_bytes(&self) -> u64 {
        self.records.iter().map(|r| r.size_bytes).sum()
    }

    /// Whether any record carries a stable identifier
    pub fn has_stable_ids(&self) -> bool {
        self.records.iter().any(|r| r.stable_id.is_some())
    }

    /// Map from path to record, for callers that probe many paths concurrently
    pub fn index_by_path(&self) -> HashMap<&str, &FileRecord> {
        self.records
            .iter()
            .map(|r| (r.relative_path.as_str(), r))
            .collect()
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = &'a FileRecord;
    type IntoIter = std::slice::Iter<'a, FileRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
