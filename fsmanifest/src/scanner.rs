//! Directory scanning.
//!
//! The calling thread walks the tree and feeds discovered paths into the
//! worker pool; workers stat, identify and (optionally) hash each file; the
//! coordinator applies the hash failure policy and sorts the result by path.

use crate::config::{Config, HashErrorPolicy};
use crate::fs::stable_id::{PlatformStableIds, StableIdProvider};
use crate::fs::walker::{self, DiscoveredFile, WalkOptions};
use crate::fs::FileMetadata;
use crate::hasher::ContentHasher;
use crate::manifest::FileRecord;
use crate::pool::WorkerPool;
use crate::progress::{format_bytes, ProgressCounters, ProgressReporter};
use crate::utils::errors::{ManifestError, Result};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Which derived fields a scan computes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOptions {
    pub with_hash: bool,
    pub with_stable_id: bool,
}

/// Result of describing one discovered file
#[derive(Debug)]
pub(crate) enum FileOutcome {
    Record(FileRecord),
    /// Stat failed; logged
    Skipped(String),
    /// Not a regular file (directory symlink, fifo, socket, device)
    Ignored(String),
    HashFailed {
        relative_path: String,
        path: PathBuf,
        source: io::Error,
    },
}

#[derive(Clone)]
pub struct Scanner {
    walk: WalkOptions,
    pool: WorkerPool,
    policy: HashErrorPolicy,
    hasher: ContentHasher,
    ids: Arc<dyn StableIdProvider>,
    progress_interval: Duration,
}

impl Scanner {
    pub fn new(config: &Config) -> Self {
        Self {
            walk: WalkOptions {
                follow_links: config.scan.follow_links,
                same_file_system: false,
                exclude_names: config.scan.exclude_names.clone(),
                skip_paths: Vec::new(),
            },
            pool: WorkerPool::new(
                config.scan.effective_workers(),
                config.scan.effective_queue_depth(),
            ),
            policy: config.scan.on_hash_error,
            hasher: ContentHasher::new(config.hash.buffer_size),
            ids: Arc::new(PlatformStableIds),
            progress_interval: Duration::from_millis(config.report.progress_interval_ms.max(1)),
        }
    }

    /// Replace the stable identifier provider
    pub fn with_stable_ids(mut self, ids: Arc<dyn StableIdProvider>) -> Self {
        self.ids = ids;
        self
    }

    /// Leave a root-relative path out of every scan
    pub fn skip_path(mut self, relative_path: impl Into<String>) -> Self {
        self.walk.skip_paths.push(relative_path.into());
        self
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn policy(&self) -> HashErrorPolicy {
        self.policy
    }


    /// Scan `root` and return one record per regular file, sorted by path.
    ///
    /// # Returns
    /// * `Ok(Vec<FileRecord>)` - Records for every file that could be read
    /// * `Err(ManifestError::Traversal)` - If the root is inaccessible
    /// * `Err(ManifestError::Hash)` - If hashing failed under the abort policy
    pub fn scan(&self, root: &Path, options: ScanOptions) -> Result<Vec<FileRecord>> {
        self.scan_counted(root, options).map(|(records, _)| records)
    }

    /// Like [`Scanner::scan`], also returning how many files were skipped.
    pub fn scan_counted(
        &self,
        root: &Path,
        options: ScanOptions,
    ) -> Result<(Vec<FileRecord>, usize)> {
        let counters = ProgressCounters::new();
        let _reporter = options
            .with_hash
            .then(|| self.progress_reporter("Hashing", counters.clone()));

        let outcomes = self.run_over_tree(
            root,
            options.with_stable_id,
            |file| self.describe(file, options, &counters),
            |outcome| self.halts_on(outcome),
        )?;

        let mut records = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        let mut skipped = 0;
        for outcome in outcomes {
            match outcome {
                FileOutcome::Record(record) => records.push(record),
                FileOutcome::Skipped(_) => skipped += 1,
                FileOutcome::Ignored(_) => {}
                FileOutcome::HashFailed { path, source, .. } => failures.push((path, source)),
            }
        }

        skipped += self.settle_hash_failures(failures)?;
        records.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        info!(
            "Scanned {}: {} files, {} total, {} skipped",
            root.display(),
            records.len(),
            format_bytes(records.iter().map(|r| r.size_bytes).sum()),
            skipped
        );
        Ok((records, skipped))
    }

    /// Walk `root` on the calling thread and run `work` on the pool for every file.
    pub(crate) fn run_over_tree<R, W, H>(
        &self,
        root: &Path,
        same_file_system: bool,
        work: W,
        halt_on: H,
    ) -> Result<Vec<R>>
    where
        R: Send,
        W: Fn(DiscoveredFile) -> R + Sync,
        H: Fn(&R) -> bool + Sync,
    {
        let mut walk = self.walk.clone();
        walk.same_file_system |= same_file_system;

        self.pool.run(
            |feeder| {
                let summary =
                    walker::walk_directory_with_callback(root, &walk, |file| feeder.push(file))?;
                debug!(
                    "Walk of {} found {} files ({} unreadable entries)",
                    root.display(),
                    summary.files,
                    summary.skipped
                );
                Ok(())
            },
            work,
            halt_on,
        )
    }

    /// Stat, identify and optionally hash one file.
    pub(crate) fn describe(
        &self,
        file: DiscoveredFile,
        options: ScanOptions,
        counters: &ProgressCounters,
    ) -> FileOutcome {
        let (metadata, raw) = match FileMetadata::from_path(&file.path) {
            Ok(found) => found,
            Err(e) => {
                warn!("Skipping {}: {}", file.path.display(), e);
                return FileOutcome::Skipped(file.relative_path);
            }
        };

        if !raw.is_file() {
            debug!("Ignoring non-regular file {}", file.path.display());
            return FileOutcome::Ignored(file.relative_path);
        }

        let stable_id = if options.with_stable_id {
            self.ids.stable_id(&raw)
        } else {
            None
        };

        let content_hash = if options.with_hash {
            match self.hash_file(&file.path, metadata.size, counters) {
                Ok(digest) => Some(digest),
                Err(source) => {
                    return FileOutcome::HashFailed {
                        relative_path: file.relative_path,
                        path: file.path,
                        source,
                    };
                }
            }
        } else {
            None
        };

        FileOutcome::Record(FileRecord {
            relative_path: file.relative_path,
            modified_time: metadata.modified,
            size_bytes: metadata.size,
            content_hash,
            stable_id,
        })
    }

    pub(crate) fn hash_file(
        &self,
        path: &Path,
        size: u64,
        counters: &ProgressCounters,
    ) -> io::Result<String> {
        let digest = self.hasher.hash_file(path)?;
        counters.record(size);
        Ok(digest)
    }

    pub(crate) fn halts_on(&self, outcome: &FileOutcome) -> bool {
        self.policy == HashErrorPolicy::Abort && matches!(outcome, FileOutcome::HashFailed { .. })
    }

    /// Apply the hash failure policy; returns how many files were dropped.
    pub(crate) fn settle_hash_failures(
        &self,
        mut failures: Vec<(PathBuf, io::Error)>,
    ) -> Result<usize> {
        failures.sort_by(|a, b| a.0.cmp(&b.0));
        match self.policy {
            HashErrorPolicy::Abort => match failures.into_iter().next() {
                Some((path, source)) => Err(ManifestError::Hash { path, source }),
                None => Ok(0),
            },
            HashErrorPolicy::Skip => {
                for (path, source) in &failures {
                    warn!("Skipping {}: cannot hash: {}", path.display(), source);
                }
                Ok(failures.len())
            }
        }
    }

    pub(crate) fn progress_reporter(
        &self,
        label: &'static str,
        counters: Arc<ProgressCounters>,
    ) -> ProgressReporter {
        ProgressReporter::spawn(label, counters, self.progress_interval)
    }
}
