//! Incremental manifest update.
//!
//! Given the previous manifest and a fresh scan without hashes, each scanned
//! file is resolved in order of preference:
//!
//! 1. same path with the same size and mtime: the old record is reused;
//! 2. same stable identifier with the same size and mtime: the file was moved
//!    or renamed, its old hash is reused under the new path;
//! 3. anything else is hashed again.
//!
//! An old record without a content hash is never reused. Only case 3 reads
//! file content. Reuse by identifier is only as sound as the identifiers: a
//! filesystem that recycles them for deleted files can produce a stale match.

use super::{FileRecord, Manifest};
use crate::config::HashErrorPolicy;
use crate::pool::WorkerPool;
use crate::utils::errors::{ManifestError, Result};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// What reconciliation decided for one scanned file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Path and metadata match an old record
    Unchanged(FileRecord),
    /// Identifier and metadata match an old record stored under `from`
    Moved { from: String, record: FileRecord },
    /// Content must be hashed
    Rehash,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub unchanged: usize,
    pub moved: usize,
    pub rehashed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub manifest: Manifest,
    pub stats: ReconcileStats,
}

/// Read-only lookups into the previous manifest, built once and shared by
/// all workers.
pub struct ManifestIndex<'a> {
    by_path: HashMap<&'a str, &'a FileRecord>,
    by_id: HashMap<u64, &'a FileRecord>,
}

impl<'a> ManifestIndex<'a> {
    pub fn new(old: &'a Manifest) -> Self {
        let by_path = old.index_by_path();
        let mut by_id = HashMap::new();
        for record in old {
            if let Some(id) = record.stable_id {
                // Hard links share an id; the first path in order wins
                by_id.entry(id).or_insert(record);
            }
        }
        Self { by_path, by_id }
    }

    /// Decide how to obtain the hash for `fresh`. A path match always wins
    /// over an identifier match; old records without a hash are never reused.
    pub fn resolve(&self, fresh: &FileRecord) -> Resolution {
        if let Some(old) = self.by_path.get(fresh.relative_path.as_str()) {
            if old.content_hash.is_some() && old.same_metadata(fresh) {
                return Resolution::Unchanged(FileRecord {
                    stable_id: fresh.stable_id.or(old.stable_id),
                    ..(*old).clone()
                });
            }
        }

        if let Some(old) = fresh.stable_id.and_then(|id| self.by_id.get(&id)) {
            if old.content_hash.is_some() && old.same_metadata(fresh) {
                return Resolution::Moved {
                    from: old.relative_path.clone(),
                    record: FileRecord {
                        relative_path: fresh.relative_path.clone(),
                        ..(*old).clone()
                    },
                };
            }
        }

        Resolution::Rehash
    }
}

/// Build a new manifest from `old` and an unhashed scan of the same tree.
///
/// `hash` computes the content hash of a scanned record and is only called
/// for files that cannot be proven unchanged. Those calls run on `pool`.
/// Every scanned record must carry a stable identifier; `old` is left
/// untouched.
pub fn reconcile<F>(
    old: &Manifest,
    fresh: Vec<FileRecord>,
    pool: &WorkerPool,
    policy: HashErrorPolicy,
    hash: F,
) -> Result<Reconciliation>
where
    F: Fn(&FileRecord) -> io::Result<String> + Sync,
{
    if let Some(record) = fresh.iter().find(|r| r.stable_id.is_none()) {
        return Err(ManifestError::Unsupported(format!(
            "{} has no stable file identifier; incremental update needs one for every file",
            record.relative_path
        )));
    }

    let index = ManifestIndex::new(old);
    let mut stats = ReconcileStats::default();
    let mut records = Vec::with_capacity(fresh.len());
    let mut pending = Vec::new();

    for record in fresh {
        match index.resolve(&record) {
            Resolution::Unchanged(kept) => {
                stats.unchanged += 1;
                records.push(kept);
            }
            Resolution::Moved { from, record: moved } => {
                debug!("Detected move: {} -> {}", from, moved.relative_path);
                stats.moved += 1;
                records.push(moved);
            }
            Resolution::Rehash => {
                debug!("Rehashing {}", record.relative_path);
                pending.push(record);
            }
        }
    }

    let outcomes = pool.run(
        |feeder| -> Result<()> {
            for record in pending {
                if !feeder.push(record) {
                    break;
                }
            }
            Ok(())
        },
        |record| {
            let result = hash(&record);
            (record, result)
        },
        |(_, result)| result.is_err() && policy == HashErrorPolicy::Abort,
    )?;

    let mut failures = Vec::new();
    for (mut record, result) in outcomes {
        match result {
            Ok(digest) => {
                record.content_hash = Some(digest);
                stats.rehashed += 1;
                records.push(record);
            }
            Err(source) => failures.push((record.relative_path, source)),
        }
    }

    failures.sort_by(|a, b| a.0.cmp(&b.0));
    if policy == HashErrorPolicy::Abort {
        if let Some((path, source)) = failures.into_iter().next() {
            return Err(ManifestError::Hash {
                path: PathBuf::from(path),
                source,
            });
        }
    } else {
        for (path, source) in &failures {
            warn!("Skipping {}: cannot hash: {}", path, source);
        }
        stats.skipped = failures.len();
    }

    info!(
        "Reconciled {} files: {} unchanged, {} moved, {} rehashed, {} skipped",
        records.len(),
        stats.unchanged,
        stats.moved,
        stats.rehashed,
        stats.skipped
    );

    Ok(Reconciliation {
        manifest: Manifest::new(records)?,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::test_support::record_with_id;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scanned(path: &str, modified_time: i64, size_bytes: u64, stable_id: u64) -> FileRecord {
        FileRecord {
            relative_path: path.to_string(),
            modified_time,
            size_bytes,
            content_hash: None,
            stable_id: Some(stable_id),
        }
    }

    fn pool() -> WorkerPool {
        WorkerPool::new(2, 4)
    }

    #[test]
    fn test_unchanged_files_are_not_hashed() -> Result<()> {
        let old = Manifest::new(vec![record_with_id("a.txt", 10, 5, "hash-a", 1)])?;
        let calls = AtomicUsize::new(0);

        let result = reconcile(
            &old,
            vec![scanned("a.txt", 10, 5, 1)],
            &pool(),
            HashErrorPolicy::Abort,
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("fresh".to_string())
            },
        )?;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.manifest, old);
        assert_eq!(result.stats.unchanged, 1);
        Ok(())
    }

    #[test]
    fn test_move_detection_reuses_hash() -> Result<()> {
        let old = Manifest::new(vec![record_with_id("a.txt", 10, 5, "hash-a", 42)])?;

        let result = reconcile(
            &old,
            vec![scanned("b/a.txt", 10, 5, 42)],
            &pool(),
            HashErrorPolicy::Abort,
            |r| panic!("unexpected read of {}", r.relative_path),
        )?;

        let moved = result.manifest.get("b/a.txt").unwrap();
        assert_eq!(moved.content_hash.as_deref(), Some("hash-a"));
        assert_eq!(moved.stable_id, Some(42));
        assert!(result.manifest.get("a.txt").is_none());
        assert_eq!(result.stats.moved, 1);
        Ok(())
    }

    #[test]
    fn test_changed_and_new_files_are_hashed() -> Result<()> {
        let old = Manifest::new(vec![record_with_id("a.txt", 10, 5, "hash-a", 1)])?;

        let result = reconcile(
            &old,
            vec![scanned("a.txt", 11, 5, 1), scanned("new.txt", 1, 1, 2)],
            &pool(),
            HashErrorPolicy::Abort,
            |r| Ok(format!("hash-of-{}", r.relative_path)),
        )?;

        assert_eq!(
            result.manifest.get("a.txt").unwrap().content_hash.as_deref(),
            Some("hash-of-a.txt")
        );
        assert_eq!(result.manifest.get("a.txt").unwrap().modified_time, 11);
        assert_eq!(
            result.manifest.get("new.txt").unwrap().content_hash.as_deref(),
            Some("hash-of-new.txt")
        );
        assert_eq!(result.stats.rehashed, 2);
        Ok(())
    }

    #[test]
    fn test_path_match_beats_id_match() -> Result<()> {
        // x.txt kept its path; its id now also names what used to be y.txt
        let old = Manifest::new(vec![
            record_with_id("x.txt", 10, 5, "hash-x", 1),
            record_with_id("y.txt", 10, 5, "hash-y", 2),
        ])?;

        let result = reconcile(
            &old,
            vec![scanned("x.txt", 10, 5, 2)],
            &pool(),
            HashErrorPolicy::Abort,
            |_| Ok("fresh".to_string()),
        )?;

        let x = result.manifest.get("x.txt").unwrap();
        assert_eq!(x.content_hash.as_deref(), Some("hash-x"));
        assert_eq!(result.stats.unchanged, 1);
        assert_eq!(result.stats.moved, 0);
        Ok(())
    }

    #[test]
    fn test_path_match_takes_fresh_stable_id() -> Result<()> {
        // Same path and metadata, new file object (e.g. restored from a backup)
        let old = Manifest::new(vec![record_with_id("a.txt", 10, 5, "hash-a", 1)])?;

        let result = reconcile(
            &old,
            vec![scanned("a.txt", 10, 5, 99)],
            &pool(),
            HashErrorPolicy::Abort,
            |r| panic!("unexpected read of {}", r.relative_path),
        )?;

        let kept = result.manifest.get("a.txt").unwrap();
        assert_eq!(kept.content_hash.as_deref(), Some("hash-a"));
        assert_eq!(kept.stable_id, Some(99));
        assert_eq!(result.stats.unchanged, 1);
        Ok(())
    }

    #[test]
    fn test_hashless_old_records_are_rehashed() -> Result<()> {
        let mut by_path = record_with_id("a.txt", 10, 5, "unused", 1);
        by_path.content_hash = None;
        let mut by_id = record_with_id("b.txt", 10, 5, "unused", 2);
        by_id.content_hash = None;
        let old = Manifest::new(vec![by_path, by_id])?;

        let result = reconcile(
            &old,
            vec![scanned("a.txt", 10, 5, 1), scanned("moved/b.txt", 10, 5, 2)],
            &pool(),
            HashErrorPolicy::Abort,
            |r| Ok(format!("hash-of-{}", r.relative_path)),
        )?;

        assert_eq!(result.stats.unchanged, 0);
        assert_eq!(result.stats.moved, 0);
        assert_eq!(result.stats.rehashed, 2);
        assert!(result.manifest.iter().all(|r| r.content_hash.is_some()));
        assert_eq!(
            result.manifest.get("moved/b.txt").unwrap().content_hash.as_deref(),
            Some("hash-of-moved/b.txt")
        );
        Ok(())
    }

    #[test]
    fn test_id_match_with_changed_metadata_is_rehashed() -> Result<()> {
        let old = Manifest::new(vec![record_with_id("a.txt", 10, 5, "hash-a", 7)])?;

        let result = reconcile(
            &old,
            vec![scanned("renamed.txt", 10, 6, 7)],
            &pool(),
            HashErrorPolicy::Abort,
            |_| Ok("fresh".to_string()),
        )?;

        assert_eq!(
            result.manifest.get("renamed.txt").unwrap().content_hash.as_deref(),
            Some("fresh")
        );
        assert_eq!(result.stats.moved, 0);
        assert_eq!(result.stats.rehashed, 1);
        Ok(())
    }

    #[test]
    fn test_missing_stable_id_is_unsupported() {
        let mut record = scanned("a", 1, 1, 1);
        record.stable_id = None;
        let err = reconcile(
            &Manifest::default(),
            vec![record],
            &pool(),
            HashErrorPolicy::Skip,
            |_| Ok(String::new()),
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::Unsupported(_)));
    }

    #[test]
    fn test_hash_failure_policy() -> Result<()> {
        let fresh = || vec![scanned("bad.txt", 1, 1, 1), scanned("good.txt", 1, 1, 2)];
        let hash = |r: &FileRecord| {
            if r.relative_path == "bad.txt" {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
            } else {
                Ok("ok".to_string())
            }
        };

        let skipped = reconcile(
            &Manifest::default(),
            fresh(),
            &pool(),
            HashErrorPolicy::Skip,
            hash,
        )?;
        assert_eq!(skipped.manifest.len(), 1);
        assert!(skipped.manifest.get("good.txt").is_some());
        assert_eq!(skipped.stats.skipped, 1);

        let aborted = reconcile(
            &Manifest::default(),
            fresh(),
            &pool(),
            HashErrorPolicy::Abort,
            hash,
        );
        assert!(matches!(
            aborted,
            Err(ManifestError::Hash { path, .. }) if path == PathBuf::from("bad.txt")
        ));
        Ok(())
    }

    #[test]
    fn test_old_manifest_is_not_mutated() -> Result<()> {
        let old = Manifest::new(vec![record_with_id("a.txt", 10, 5, "hash-a", 1)])?;
        let snapshot = old.clone();

        reconcile(
            &old,
            vec![scanned("moved/a.txt", 10, 5, 1)],
            &pool(),
            HashErrorPolicy::Abort,
            |_| Ok("fresh".to_string()),
        )?;

        assert_eq!(old, snapshot);
        Ok(())
    }
}
