//! Command orchestration.
//!
//! Ties the scanner, codec and engines together for each user-facing
//! command. Every method is blocking; the binary drives them from
//! `spawn_blocking`.

pub mod report;

use crate::config::Config;
use crate::fs::stable_id::{PlatformStableIds, StableIdProvider};
use crate::fs::walker::normalize_relative;
use crate::hasher::ContentHasher;
use crate::manifest::{self, codec, DiffEntry, Fidelity, Manifest, ReconcileStats};
use crate::progress::{format_bytes, format_duration, ProgressCounters};
use crate::scanner::{ScanOptions, Scanner};
use crate::utils::errors::{ManifestError, Result};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Outcome of a command that writes a manifest
#[derive(Debug, Clone)]
pub struct BuildSummary {
    pub destination: PathBuf,
    pub records: usize,
    pub total_bytes: u64,
    pub skipped: usize,
    /// Present for `update`
    pub reconcile: Option<ReconcileStats>,
    pub elapsed: Duration,
}

impl fmt::Display for BuildSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Wrote {} records ({}) to {} in {}",
            self.records,
            format_bytes(self.total_bytes),
            self.destination.display(),
            format_duration(self.elapsed)
        )?;
        if let Some(stats) = &self.reconcile {
            write!(
                f,
                "; {} unchanged, {} moved, {} rehashed",
                stats.unchanged, stats.moved, stats.rehashed
            )?;
        }
        write!(f, "; {} skipped", self.skipped)
    }
}

/// One side of a comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Manifest(PathBuf),
    Directory(PathBuf),
}

impl Source {
    /// Directories are scanned, anything else is read as a manifest file
    pub fn classify(path: &Path) -> Self {
        if path.is_dir() {
            Source::Directory(path.to_path_buf())
        } else {
            Source::Manifest(path.to_path_buf())
        }
    }
}

#[derive(Clone)]
pub struct ManifestTool {
    config: Arc<Config>,
    ids: Arc<dyn StableIdProvider>,
}

impl ManifestTool {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            ids: Arc::new(PlatformStableIds),
        }
    }

    /// Replace the stable identifier provider
    pub fn with_stable_ids(mut self, ids: Arc<dyn StableIdProvider>) -> Self {
        self.ids = ids;
        self
    }

    /// Full scan with hashes and stable identifiers, written to `destination`.
    pub fn create(
        &self,
        directory: &Path,
        destination: &Path,
        force: bool,
    ) -> Result<BuildSummary> {
        let start = Instant::now();
        self.ids.require(directory)?;
        codec::ensure_destination(destination, force)?;

        info!("Creating manifest of {}", directory.display());
        let scanner = self.scanner(directory, &[destination]);
        let (records, skipped) = scanner.scan_counted(
            directory,
            ScanOptions {
                with_hash: true,
                with_stable_id: true,
            },
        )?;
        let manifest = Manifest::new(records)?;
        codec::save(&manifest, destination, force)?;

        Ok(self.summarize(&manifest, destination, skipped, None, start))
    }

    /// Build `destination` from `previous` and the current state of `directory`,
    /// hashing only files that cannot be proven unchanged.
    pub fn update(
        &self,
        directory: &Path,
        previous: &Path,
        destination: &Path,
        force: bool,
    ) -> Result<BuildSummary> {
        let start = Instant::now();
        self.ids.require(directory)?;
        codec::ensure_destination(destination, force)?;
        let old = codec::load(previous)?;

        info!(
            "Updating manifest of {} ({} previous records)",
            directory.display(),
            old.len()
        );
        let scanner = self.scanner(directory, &[previous, destination]);
        let (fresh, scan_skipped) = scanner.scan_counted(
            directory,
            ScanOptions {
                with_hash: false,
                with_stable_id: true,
            },
        )?;

        let counters = ProgressCounters::new();
        let reconciled = {
            let _reporter = scanner.progress_reporter("Rehashing", counters.clone());
            manifest::reconcile(&old, fresh, scanner.pool(), scanner.policy(), |record| {
                scanner.hash_file(
                    &directory.join(&record.relative_path),
                    record.size_bytes,
                    &counters,
                )
            })?
        };
        codec::save(&reconciled.manifest, destination, force)?;

        Ok(self.summarize(
            &reconciled.manifest,
            destination,
            scan_skipped + reconciled.stats.skipped,
            Some(reconciled.stats),
            start,
        ))
    }

    /// Manifest for one side of a comparison. Directories are hashed only
    /// for strict fidelity. A manifest file on the `counterpart` side is left
    /// out when it lives inside a scanned directory.
    pub fn load_source(
        &self,
        source: &Source,
        counterpart: &Source,
        fidelity: Fidelity,
    ) -> Result<Manifest> {
        match source {
            Source::Manifest(path) => codec::load(path),
            Source::Directory(path) => {
                let excluded: Vec<&Path> = match counterpart {
                    Source::Manifest(manifest) => vec![manifest.as_path()],
                    Source::Directory(_) => Vec::new(),
                };
                let records = self.scanner(path, &excluded).scan(
                    path,
                    ScanOptions {
                        with_hash: fidelity == Fidelity::Strict,
                        with_stable_id: false,
                    },
                )?;
                Manifest::new(records)
            }
        }
    }

    /// Compare two sides, each a manifest file or a directory.
    pub fn compare(
        &self,
        before: &Path,
        after: &Path,
        fidelity: Fidelity,
    ) -> Result<Vec<DiffEntry>> {
        let (left, right) = (Source::classify(before), Source::classify(after));
        let before = self.load_source(&left, &right, fidelity)?;
        let after = self.load_source(&right, &left, fidelity)?;
        manifest::compare(&before, &after, fidelity)
    }

    /// Check `directory` against the manifest stored at `manifest_path`.
    pub fn verify(
        &self,
        directory: &Path,
        manifest_path: &Path,
        fidelity: Fidelity,
    ) -> Result<Vec<DiffEntry>> {
        let stored = codec::load(manifest_path)?;
        let scanner = self.scanner(directory, &[manifest_path]);
        manifest::verify::verify(&scanner, &stored, directory, fidelity)
    }

    /// Content digest of a single file
    pub fn checksum(&self, file: &Path) -> Result<String> {
        let metadata = fs::metadata(file).map_err(|e| ManifestError::file_io(file, e))?;
        if metadata.is_dir() {
            return Err(ManifestError::file_io(
                file,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "is a directory"),
            ));
        }
        ContentHasher::new(self.config.hash.buffer_size)
            .hash_file(file)
            .map_err(|source| ManifestError::Hash {
                path: file.to_path_buf(),
                source,
            })
    }

    /// Scanner for `root` that leaves out any of `excluded` living inside it
    fn scanner(&self, root: &Path, excluded: &[&Path]) -> Scanner {
        let mut scanner = Scanner::new(&self.config).with_stable_ids(self.ids.clone());
        for path in excluded {
            if let Some(relative) = relative_inside(root, path) {
                info!("Excluding {} from the scan", relative);
                scanner = scanner.skip_path(relative);
            }
        }
        scanner
    }

    fn summarize(
        &self,
        manifest: &Manifest,
        destination: &Path,
        skipped: usize,
        reconcile: Option<ReconcileStats>,
        start: Instant,
    ) -> BuildSummary {
        let summary = BuildSummary {
            destination: destination.to_path_buf(),
            records: manifest.len(),
            total_bytes: manifest.total_bytes(),
            skipped,
            reconcile,
            elapsed: start.elapsed(),
        };
        info!("{}", summary);
        summary
    }
}

/// Root-relative path of `file` if it lies under `root`.
///
/// `file` need not exist yet, but its parent directory must.
fn relative_inside(root: &Path, file: &Path) -> Option<String> {
    let root = root.canonicalize().ok()?;
    let parent = match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let absolute = parent.canonicalize().ok()?.join(file.file_name()?);
    normalize_relative(absolute.strip_prefix(&root).ok()?)
}
