//! File metadata as recorded in manifests.
//!
//! Modification times are kept as whole seconds since the Unix epoch; the
//! sub-second part is discarded and never compared.

use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Metadata for a single regular file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// File size in bytes
    pub size: u64,

    /// Last modified time (seconds since Unix epoch, truncated)
    pub modified: i64,
}

impl FileMetadata {
    /// Read metadata for `path`, following symbolic links.
    pub fn from_path(path: &Path) -> std::io::Result<(Self, fs::Metadata)> {
        let metadata = fs::metadata(path)?;
        let extracted = Self::from_metadata(&metadata)?;
        Ok((extracted, metadata))
    }

    pub fn from_metadata(metadata: &fs::Metadata) -> std::io::Result<Self> {
        Ok(Self {
            size: metadata.len(),
            modified: unix_seconds(metadata.modified()?),
        })
    }
}

/// Whole seconds since the epoch, rounding towards negative infinity for
/// timestamps before 1970.
pub fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => {
            let before = e.duration();
            let secs = before.as_secs() as i64;
            if before.subsec_nanos() > 0 {
                -secs - 1
            } else {
                -secs
            }
        }
    }
}
