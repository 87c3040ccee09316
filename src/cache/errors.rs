//! Cache storage error types

use std::path::PathBuf;

/// Errors raised by cache storage backends
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt cache entry at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Cache task failed: {0}")]
    Task(String),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}
