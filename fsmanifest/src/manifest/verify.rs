//! Check a live directory against a stored manifest.
//!
//! Workers look each discovered file up in the manifest. A file whose size or
//! mtime already differs is reported without reading it; in strict mode a
//! file whose metadata matches is hashed and its hash compared. Manifest
//! paths the walk never reached are reported as removed.

use super::compare::{changes_between, Changes, DiffEntry, Fidelity};
use super::{FileRecord, Manifest};
use crate::config::HashErrorPolicy;
use crate::fs::DiscoveredFile;
use crate::progress::ProgressCounters;
use crate::scanner::{FileOutcome, ScanOptions, Scanner};
use crate::utils::errors::{ManifestError, Result};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// Per-file verdict produced by a worker
#[derive(Debug)]
enum Check {
    Match(String),
    Differs(DiffEntry),
    /// Present but unreadable; neither verified nor removed
    Unverified(String),
    Ignored,
    HashFailed {
        relative_path: String,
        path: PathBuf,
        source: io::Error,
    },
    Failed(ManifestError),
}

/// Compare the files under `root` with `manifest`.
///
/// Entries are sorted by path and use the manifest as the "before" side.
/// Strict fidelity needs a hash on every manifest record whose metadata
/// matches the disk, otherwise [`ManifestError::MissingHash`] is returned.
pub fn verify(
    scanner: &Scanner,
    manifest: &Manifest,
    root: &Path,
    fidelity: Fidelity,
) -> Result<Vec<DiffEntry>> {
    let index = manifest.index_by_path();
    let counters = ProgressCounters::new();
    let _reporter = (fidelity == Fidelity::Strict)
        .then(|| scanner.progress_reporter("Verifying", counters.clone()));

    let checks = scanner.run_over_tree(
        root,
        false,
        |file| check_file(scanner, &index, file, fidelity, &counters),
        |check| match check {
            Check::Failed(_) => true,
            Check::HashFailed { .. } => scanner.policy() == HashErrorPolicy::Abort,
            _ => false,
        },
    )?;

    let mut visited = HashSet::with_capacity(checks.len());
    let mut entries = Vec::new();
    let mut failures = Vec::new();
    let mut errors = Vec::new();
    let mut matched = 0usize;

    for check in checks {
        match check {
            Check::Match(path) => {
                matched += 1;
                visited.insert(path);
            }
            Check::Differs(entry) => {
                visited.insert(entry.path.clone());
                entries.push(entry);
            }
            Check::Unverified(path) => {
                visited.insert(path);
            }
            Check::Ignored => {}
            Check::HashFailed {
                relative_path,
                path,
                source,
            } => {
                visited.insert(relative_path);
                failures.push((path, source));
            }
            Check::Failed(e) => errors.push(e),
        }
    }

    if let Some(e) = errors.into_iter().next() {
        return Err(e);
    }
    let unverified = scanner.settle_hash_failures(failures)?;

    entries.extend(
        manifest
            .iter()
            .filter(|r| !visited.contains(&r.relative_path))
            .map(|r| DiffEntry::removed(&r.relative_path)),
    );
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    info!(
        "Verified {}: {} match, {} differ, {} unverified",
        root.display(),
        matched,
        entries.len(),
        unverified
    );
    Ok(entries)
}

fn check_file(
    scanner: &Scanner,
    index: &HashMap<&str, &FileRecord>,
    file: DiscoveredFile,
    fidelity: Fidelity,
    counters: &ProgressCounters,
) -> Check {
    let path = file.path.clone();
    let current = match scanner.describe(file, ScanOptions::default(), counters) {
        FileOutcome::Record(record) => record,
        FileOutcome::Skipped(relative_path) => return Check::Unverified(relative_path),
        FileOutcome::Ignored(_) => return Check::Ignored,
        FileOutcome::HashFailed {
            relative_path,
            path,
            source,
        } => {
            return Check::HashFailed {
                relative_path,
                path,
                source,
            }
        }
    };

    let Some(stored) = index.get(current.relative_path.as_str()) else {
        return Check::Differs(DiffEntry::added(current.relative_path));
    };

    // Metadata drift is reported without reading content
    let changes = match changes_between(stored, &current, Fidelity::Quick) {
        Ok(changes) => changes,
        Err(e) => return Check::Failed(e),
    };
    if !changes.is_empty() {
        return Check::Differs(DiffEntry::modified(current.relative_path, changes));
    }
    if fidelity == Fidelity::Quick {
        return Check::Match(current.relative_path);
    }

    let Some(expected) = stored.content_hash.as_deref() else {
        return Check::Failed(ManifestError::MissingHash(current.relative_path));
    };
    match scanner.hash_file(&path, current.size_bytes, counters) {
        Ok(actual) if actual == expected => Check::Match(current.relative_path),
        Ok(_) => Check::Differs(DiffEntry::modified(
            current.relative_path,
            Changes {
                content: true,
                ..Changes::default()
            },
        )),
        Err(source) => Check::HashFailed {
            relative_path: current.relative_path,
            path,
            source,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::fs::FileMetadata;
    use crate::hasher::ContentHasher;
    use crate::manifest::DiffKind;
    use std::fs;
    use tempfile::TempDir;

    fn scanner() -> Scanner {
        let mut config = Config::default();
        config.scan.workers = 2;
        Scanner::new(&config)
    }

    /// Manifest matching the current state of `root`
    fn snapshot(root: &Path) -> Result<Manifest> {
        let records = scanner().scan(
            root,
            ScanOptions {
                with_hash: true,
                with_stable_id: false,
            },
        )?;
        Manifest::new(records)
    }

    fn write_preserving_mtime(path: &Path, contents: &[u8]) -> Result<()> {
        let before = fs::metadata(path)?.modified()?;
        fs::write(path, contents)?;
        let file = fs::OpenOptions::new().write(true).open(path)?;
        file.set_modified(before)?;
        Ok(())
    }

    #[test]
    fn test_clean_tree() -> Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("a.txt"), b"alpha")?;
        let manifest = snapshot(temp_dir.path())?;

        assert!(verify(&scanner(), &manifest, temp_dir.path(), Fidelity::Strict)?.is_empty());
        assert!(verify(&scanner(), &manifest, temp_dir.path(), Fidelity::Quick)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_added_removed_and_resized() -> Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("keep.txt"), b"keep")?;
        fs::write(temp_dir.path().join("gone.txt"), b"gone")?;
        fs::write(temp_dir.path().join("grow.txt"), b"1")?;
        let manifest = snapshot(temp_dir.path())?;

        fs::remove_file(temp_dir.path().join("gone.txt"))?;
        fs::write(temp_dir.path().join("new.txt"), b"new")?;
        write_preserving_mtime(&temp_dir.path().join("grow.txt"), b"12345")?;

        let diff = verify(&scanner(), &manifest, temp_dir.path(), Fidelity::Quick)?;
        let summary: Vec<(&str, &DiffKind)> =
            diff.iter().map(|e| (e.path.as_str(), &e.kind)).collect();
        assert_eq!(summary.len(), 3);
        assert_eq!(summary[0], ("gone.txt", &DiffKind::Removed));
        assert_eq!(summary[1].0, "grow.txt");
        assert!(matches!(summary[1].1, DiffKind::Modified(c) if c.size.is_some() && !c.content));
        assert_eq!(summary[2], ("new.txt", &DiffKind::Added));
        Ok(())
    }

    #[test]
    fn test_strict_catches_silent_content_change() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("data.bin");
        fs::write(&path, b"aaaa")?;
        let manifest = snapshot(temp_dir.path())?;

        write_preserving_mtime(&path, b"bbbb")?;
        assert_eq!(
            FileMetadata::from_path(&path)?.0.modified,
            manifest.get("data.bin").map(|r| r.modified_time).unwrap_or_default()
        );

        assert!(verify(&scanner(), &manifest, temp_dir.path(), Fidelity::Quick)?.is_empty());
        let strict = verify(&scanner(), &manifest, temp_dir.path(), Fidelity::Strict)?;
        assert_eq!(
            strict,
            vec![DiffEntry::modified(
                "data.bin",
                Changes {
                    content: true,
                    ..Changes::default()
                }
            )]
        );
        Ok(())
    }

    #[test]
    fn test_strict_without_hashes() -> Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("a.txt"), b"alpha")?;
        let quick = Manifest::new(scanner().scan(temp_dir.path(), ScanOptions::default())?)?;

        let err = verify(&scanner(), &quick, temp_dir.path(), Fidelity::Strict).unwrap_err();
        assert!(matches!(err, ManifestError::MissingHash(p) if p == "a.txt"));
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_unreadable_file_policy() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("locked.txt");
        fs::write(&path, b"secret")?;
        let manifest = snapshot(temp_dir.path())?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o000))?;

        // Running as root can still read the file
        if ContentHasher::default().hash_file(&path).is_ok() {
            return Ok(());
        }

        let skipped = verify(&scanner(), &manifest, temp_dir.path(), Fidelity::Strict)?;
        assert!(skipped.is_empty());

        let mut config = Config::default();
        config.scan.on_hash_error = HashErrorPolicy::Abort;
        let err = verify(&Scanner::new(&config), &manifest, temp_dir.path(), Fidelity::Strict)
            .unwrap_err();
        assert!(matches!(err, ManifestError::Hash { .. }));
        Ok(())
    }
}
