//! Configuration management for fsmanifest.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `FSMANIFEST_*` environment variables (`__` separates section and key, e.g.
//! `FSMANIFEST_SCAN__WORKERS=8`). Command-line flags are applied on top by the
//! binary.

use crate::utils::errors::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "FSMANIFEST";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scan: ScanConfig,
    pub hash: HashConfig,
    pub log: LogConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Follow symbolic links to directories
    pub follow_links: bool,

    /// File or directory names pruned from every walk
    pub exclude_names: Vec<String>,

    /// Hashing workers (0 = available hardware concurrency)
    pub workers: usize,

    /// Capacity of the work and result queues (0 = 4 x workers)
    pub queue_depth: usize,

    /// What to do when a file cannot be hashed
    pub on_hash_error: HashErrorPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HashConfig {
    /// Read chunk size in bytes
    pub buffer_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Output format for compare/verify reports
    pub format: ReportFormat,

    /// Interval between progress log lines
    pub progress_interval_ms: u64,
}

/// Coordinator policy for files whose content cannot be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashErrorPolicy {
    /// Log a warning and leave the file out of the result
    #[default]
    Skip,
    /// Stop the whole operation
    Abort,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            follow_links: false,
            exclude_names: Vec::new(),
            workers: 0,
            queue_depth: 0,
            on_hash_error: HashErrorPolicy::default(),
        }
    }
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            buffer_size: crate::hasher::DEFAULT_BUFFER_SIZE,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            format: ReportFormat::default(),
            progress_interval_ms: 1000,
        }
    }
}

impl ScanConfig {
    /// Worker count with the hardware-concurrency default resolved
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Queue capacity with the default resolved
    pub fn effective_queue_depth(&self) -> usize {
        if self.queue_depth > 0 {
            self.queue_depth
        } else {
            self.effective_workers() * 4
        }
    }
}

impl Config {
    /// Load configuration from defaults, an optional TOML file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::new(&path.to_string_lossy(), config::FileFormat::Toml)
                    .required(true),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("scan.exclude_names"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
