//! Network fetch error types
//!
//! Transport failures and, for precaching, unsuccessful HTTP statuses.

/// Network fetch error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid method: {0}")]
    InvalidMethod(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Server error ({0}): {1}")]
    Server(u16, String),

    #[error("Bad response ({0}): {1}")]
    BadStatus(u16, String),
}

impl FetchError {
    /// Whether the host may reasonably retry the request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Network(_) | FetchError::Timeout | FetchError::Server(_, _)
        )
    }

    /// Create a FetchError for an unsuccessful status on `url`
    pub fn from_status(status: u16, url: &str) -> Self {
        match status {
            404 => FetchError::NotFound(url.to_string()),
            408 => FetchError::Timeout,
            500..=599 => FetchError::Server(status, url.to_string()),
            _ => FetchError::BadStatus(status, url.to_string()),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(err.to_string())
        }
    }
}
