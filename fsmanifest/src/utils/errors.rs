//! Error types for manifest operations.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Cannot traverse {}: {message}", root.display())]
    Traversal { root: PathBuf, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error on {}: {source}", path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to hash {}: {source}", path.display())]
    Hash {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Manifest parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Duplicate path in manifest: {0}")]
    DuplicatePath(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Destination already exists: {} (use --force to replace it)", .0.display())]
    DestinationExists(PathBuf),

    #[error("Strict comparison requires content hashes, but {0} has none")]
    MissingHash(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ManifestError {
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        ManifestError::Parse {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn file_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ManifestError::FileIo {
            path: path.into(),
            source,
        }
    }
}

impl From<config::ConfigError> for ManifestError {
    fn from(err: config::ConfigError) -> Self {
        ManifestError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ManifestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_exists_message_mentions_force() {
        let err = ManifestError::DestinationExists(PathBuf::from("out.csv"));
        let msg = err.to_string();
        assert!(msg.contains("out.csv"));
        assert!(msg.contains("--force"));
    }

    #[test]
    fn test_parse_error_carries_line() {
        let err = ManifestError::parse(7, "bad size");
        assert_eq!(err.to_string(), "Manifest parse error at line 7: bad size");
    }
}
