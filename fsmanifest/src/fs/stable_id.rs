//! Stable per-file identifiers.
//!
//! A stable identifier names the underlying file object independently of its
//! path, which lets reconciliation recognise a renamed or moved file without
//! reading its content. Availability is platform and filesystem specific, so
//! it sits behind [`StableIdProvider`]: a missing identifier is an ordinary
//! `None`, and only commands that require the capability check for it upfront.

use crate::utils::errors::{ManifestError, Result};
use std::fs::Metadata;
use std::path::Path;

pub trait StableIdProvider: Send + Sync {
    /// Whether files under `root` carry persistent identifiers.
    fn is_supported(&self, root: &Path) -> Result<bool>;

    /// Identifier of the file described by `metadata`, if the platform has one.
    fn stable_id(&self, metadata: &Metadata) -> Option<u64>;

    /// Fail with [`ManifestError::Unsupported`] unless `root` has the capability.
    fn require(&self, root: &Path) -> Result<()> {
        if self.is_supported(root)? {
            Ok(())
        } else {
            Err(ManifestError::Unsupported(format!(
                "{} does not expose stable file identifiers; \
                 incremental manifests are unavailable there",
                root.display()
            )))
        }
    }
}

/// Inode numbers on Unix; no capability on other platforms.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformStableIds;

#[cfg(unix)]
impl StableIdProvider for PlatformStableIds {
    fn is_supported(&self, root: &Path) -> Result<bool> {
        let metadata = std::fs::metadata(root).map_err(|e| ManifestError::Traversal {
            root: root.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(metadata.is_dir())
    }

    fn stable_id(&self, metadata: &Metadata) -> Option<u64> {
        use std::os::unix::fs::MetadataExt;
        Some(metadata.ino())
    }
}

#[cfg(not(unix))]
impl StableIdProvider for PlatformStableIds {
    fn is_supported(&self, _root: &Path) -> Result<bool> {
        Ok(false)
    }

    fn stable_id(&self, _metadata: &Metadata) -> Option<u64> {
        None
    }
}

/// Provider for trees without identifiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStableIds;

impl StableIdProvider for NoStableIds {
    fn is_supported(&self, _root: &Path) -> Result<bool> {
        Ok(false)
    }

    fn stable_id(&self, _metadata: &Metadata) -> Option<u64> {
        None
    }
}
