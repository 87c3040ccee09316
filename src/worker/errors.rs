//! Worker error types

use crate::cache::CacheError;
use crate::http::FetchError;

use super::state::WorkerState;

/// Errors surfaced by lifecycle events
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to precache {url}: {source}")]
    Precache {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Invalid worker state: expected {expected}, got {actual}")]
    InvalidState {
        expected: String,
        actual: WorkerState,
    },

    #[error("Host error: {0}")]
    Host(String),
}
