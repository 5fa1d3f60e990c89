//! Directory traversal.
//!
//! The walker is the producer side of a scan: it only discovers files and
//! hands out their paths. Stat calls and hashing happen on the workers.

use crate::utils::errors::{ManifestError, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Do not descend into other mounted file systems
    pub same_file_system: bool,

    /// Entry names to prune (exact file-name match)
    pub exclude_names: Vec<String>,

    /// Root-relative paths (forward slashes) to leave out, e.g. the manifest itself
    pub skip_paths: Vec<String>,
}

/// A file found by the walker, not yet stat'ed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Full path to the file
    pub path: PathBuf,

    /// Path relative to the root, `/`-separated
    pub relative_path: String,
}

/// Counters for one walk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkSummary {
    pub files: usize,
    pub skipped: usize,
}

/// Walk a directory tree, handing every file to `callback`.
///
/// The walk stops early when `callback` returns `false`. Entries that cannot
/// be read below the root are logged and skipped; an inaccessible root fails
/// the whole walk with [`ManifestError::Traversal`].
///
/// # Example
/// ```no_run
/// use fsmanifest::fs::walker::{walk_directory_with_callback, WalkOptions};
/// use std::path::Path;
///
/// let mut files = Vec::new();
/// walk_directory_with_callback(Path::new("/data"), &WalkOptions::default(), |file| {
///     files.push(file);
///     true
/// })
/// .unwrap();
/// println!("Found {} files", files.len());
/// ```
pub fn walk_directory_with_callback<F>(
    root: &Path,
    options: &WalkOptions,
    mut callback: F,
) -> Result<WalkSummary>
where
    F: FnMut(DiscoveredFile) -> bool,
{
    check_root(root)?;

    let mut summary = WalkSummary::default();
    let walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .same_file_system(options.same_file_system)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !should_exclude(entry, &options.exclude_names));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => {
                return Err(ManifestError::Traversal {
                    root: root.to_path_buf(),
                    message: err.to_string(),
                });
            }
            Err(err) => {
                warn!("Skipping unreadable entry: {}", err);
                summary.skipped += 1;
                continue;
            }
        };

        // Directories never produce records
        if entry.file_type().is_dir() {
            continue;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let Some(relative_path) = normalize_relative(relative) else {
            warn!("Skipping file with a non UTF-8 path: {}", entry.path().display());
            summary.skipped += 1;
            continue;
        };

        if options.skip_paths.iter().any(|p| *p == relative_path) {
            debug!("Leaving {} out of the walk", relative_path);
            continue;
        }

        summary.files += 1;
        let file = DiscoveredFile {
            path: entry.path().to_path_buf(),
            relative_path,
        };
        if !callback(file) {
            debug!("Walk of {} stopped early", root.display());
            break;
        }
    }

    Ok(summary)
}

/// Join the normal components of `relative` with `/`.
///
/// Returns `None` when a component is not valid UTF-8.
pub fn normalize_relative(relative: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        if let Component::Normal(part) = component {
            parts.push(part.to_str()?);
        }
    }
    Some(parts.join("/"))
}

fn check_root(root: &Path) -> Result<()> {
    let metadata = fs::metadata(root).map_err(|e| ManifestError::Traversal {
        root: root.to_path_buf(),
        message: e.to_string(),
    })?;
    if !metadata.is_dir() {
        return Err(ManifestError::Traversal {
            root: root.to_path_buf(),
            message: "not a directory".to_string(),
        });
    }
    Ok(())
}

/// Check if a directory entry should be excluded based on its name
fn should_exclude(entry: &DirEntry, names: &[String]) -> bool {
    let file_name = entry.file_name().to_string_lossy();
    names.iter().any(|name| *name == file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn walk_directory(root: &Path, options: &WalkOptions) -> Result<Vec<DiscoveredFile>> {
        let mut files = Vec::new();
        walk_directory_with_callback(root, options, |file| {
            files.push(file);
            true
        })?;
        Ok(files)
    }

    fn sorted_paths(files: &[DiscoveredFile]) -> Vec<&str> {
        let mut paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        paths.sort();
        paths
    }

    #[test]
    fn test_walk_empty_directory() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let files = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        assert_eq!(files.len(), 0);
        Ok(())
    }

    #[test]
    fn test_walk_with_subdirectories() -> Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir_all(temp_dir.path().join("subdir/deeper"))?;
        fs::create_dir(temp_dir.path().join("empty"))?;
        fs::write(temp_dir.path().join("file1.txt"), b"content1")?;
        fs::write(temp_dir.path().join("subdir/file2.txt"), b"content2")?;
        fs::write(temp_dir.path().join("subdir/deeper/file3.txt"), b"content3")?;

        let files = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        assert_eq!(
            sorted_paths(&files),
            vec!["file1.txt", "subdir/deeper/file3.txt", "subdir/file2.txt"]
        );
        Ok(())
    }

    #[test]
    fn test_exclude_names_prunes_directories() -> Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join(".git"))?;
        fs::write(temp_dir.path().join(".git/HEAD"), b"ref")?;
        fs::write(temp_dir.path().join("digit.txt"), b"keep")?;

        let options = WalkOptions {
            exclude_names: vec![".git".to_string()],
            ..WalkOptions::default()
        };
        let files = walk_directory(temp_dir.path(), &options)?;
        assert_eq!(sorted_paths(&files), vec!["digit.txt"]);
        Ok(())
    }

    #[test]
    fn test_skip_paths() -> Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir(temp_dir.path().join("meta"))?;
        fs::write(temp_dir.path().join("meta/manifest.csv"), b"Path")?;
        fs::write(temp_dir.path().join("data.bin"), b"1")?;

        let options = WalkOptions {
            skip_paths: vec!["meta/manifest.csv".to_string()],
            ..WalkOptions::default()
        };
        let files = walk_directory(temp_dir.path(), &options)?;
        assert_eq!(sorted_paths(&files), vec!["data.bin"]);
        Ok(())
    }

    #[test]
    fn test_callback_can_stop_walk() -> Result<()> {
        let temp_dir = TempDir::new()?;
        for i in 0..5 {
            fs::write(temp_dir.path().join(format!("f{i}")), b"x")?;
        }

        let mut seen = 0;
        walk_directory_with_callback(temp_dir.path(), &WalkOptions::default(), |_| {
            seen += 1;
            seen < 2
        })?;
        assert_eq!(seen, 2);
        Ok(())
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let err = walk_directory(Path::new("/nonexistent/root"), &WalkOptions::default())
            .unwrap_err();
        assert!(matches!(err, ManifestError::Traversal { .. }));
    }

    #[test]
    fn test_file_root_is_fatal() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let file = temp_dir.path().join("plain.txt");
        fs::write(&file, b"x")?;

        let err = walk_directory(&file, &WalkOptions::default()).unwrap_err();
        assert!(matches!(err, ManifestError::Traversal { .. }));
        Ok(())
    }

    #[test]
    fn test_normalize_relative() {
        assert_eq!(
            normalize_relative(Path::new("a/b/c.txt")).as_deref(),
            Some("a/b/c.txt")
        );
        assert_eq!(normalize_relative(Path::new("./x")).as_deref(), Some("x"));
    }
}
