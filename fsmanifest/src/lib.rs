//! File Manifest Library
//!
//! Inventories of a directory tree (path, size, mtime, MD5, stable file id)
//! with incremental update that reuses hashes of unchanged and moved files,
//! and comparison of manifests and live directories.

pub mod commands;
pub mod config;
pub mod fs;
pub mod hasher;
pub mod manifest;
pub mod pool;
pub mod progress;
pub mod scanner;
pub mod utils;

// Re-export commonly used types
pub use commands::ManifestTool;
pub use config::Config;
pub use manifest::{DiffEntry, Fidelity, FileRecord, Manifest};
pub use utils::errors::{ManifestError, Result};
