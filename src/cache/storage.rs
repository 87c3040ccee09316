//! Cache storage abstraction
//!
//! Mirrors the host cache storage surface: open, keys, delete, a batch
//! insert, and a lookup that searches every bucket unless told otherwise.

use async_trait::async_trait;
use tracing::trace;

use super::errors::CacheError;
use crate::http::{Request, Response};

/// Restricts a lookup to one bucket
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchOptions {
    /// Only search this bucket. `None` searches all buckets in `keys()` order.
    pub cache_name: Option<String>,
}

impl MatchOptions {
    pub fn in_bucket(name: &str) -> Self {
        Self {
            cache_name: Some(name.to_string()),
        }
    }
}

/// A cache hit along with the bucket that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedMatch {
    pub cache_name: String,
    pub response: Response,
}

/// Named bucket storage
///
/// Requests passed in must already be resolved against the worker scope.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a bucket, creating it if absent
    async fn open(&self, name: &str) -> Result<(), CacheError>;

    /// Whether a bucket exists
    async fn has(&self, name: &str) -> Result<bool, CacheError>;

    /// Names of all buckets
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    /// Delete a bucket. Returns false if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    /// Insert a batch into an opened bucket. Either every entry is stored or none is.
    /// Existing entries with the same key are replaced.
    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(Request, Response)>,
    ) -> Result<(), CacheError>;

    /// Look up a single key in one bucket
    async fn get(&self, name: &str, key: &str) -> Result<Option<Response>, CacheError>;

    /// Request keys stored in a bucket
    async fn entries(&self, name: &str) -> Result<Vec<String>, CacheError>;

    /// Look a request up across buckets
    async fn match_request(
        &self,
        request: &Request,
        options: &MatchOptions,
    ) -> Result<Option<CachedMatch>, CacheError> {
        if !request.is_cacheable() {
            trace!(method = %request.method, url = %request.url, "Method never matches cache");
            return Ok(None);
        }

        let key = request.cache_key();
        let names = match &options.cache_name {
            Some(name) => vec![name.clone()],
            None => self.keys().await?,
        };

        for name in names {
            if let Some(response) = self.get(&name, &key).await? {
                return Ok(Some(CachedMatch {
                    cache_name: name,
                    response,
                }));
            }
        }

        Ok(None)
    }
}
