//! In-memory cache storage
//!
//! Buckets are kept in creation order so cross-bucket lookups behave like
//! the host cache storage.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::errors::CacheError;
use super::storage::CacheStorage;
use crate::http::{Request, Response};

type Bucket = BTreeMap<String, Response>;

#[derive(Default)]
struct MemoryState {
    /// Bucket names in creation order
    order: Vec<String>,
    buckets: HashMap<String, Bucket>,
}

/// Cache storage that lives for the life of the process
#[derive(Default)]
pub struct MemoryCacheStorage {
    state: RwLock<MemoryState>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        let mut state = self.state.write().await;
        if !state.buckets.contains_key(name) {
            state.buckets.insert(name.to_string(), Bucket::new());
            state.order.push(name.to_string());
            debug!(bucket = name, "Created cache bucket");
        }
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.state.read().await.buckets.contains_key(name))
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.state.read().await.order.clone())
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let mut state = self.state.write().await;
        if state.buckets.remove(name).is_none() {
            return Ok(false);
        }
        state.order.retain(|n| n != name);
        debug!(bucket = name, "Deleted cache bucket");
        Ok(true)
    }

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(Request, Response)>,
    ) -> Result<(), CacheError> {
        let mut state = self.state.write().await;
        let bucket = state
            .buckets
            .get_mut(name)
            .ok_or_else(|| CacheError::BucketNotFound(name.to_string()))?;

        let count = entries.len();
        for (request, response) in entries {
            bucket.insert(request.cache_key(), response);
        }

        debug!(bucket = name, count = count, "Stored batch in cache bucket");
        Ok(())
    }

    async fn get(&self, name: &str, key: &str) -> Result<Option<Response>, CacheError> {
        let state = self.state.read().await;
        Ok(state.buckets.get(name).and_then(|b| b.get(key)).cloned())
    }

    async fn entries(&self, name: &str) -> Result<Vec<String>, CacheError> {
        let state = self.state.read().await;
        state
            .buckets
            .get(name)
            .map(|b| b.keys().cloned().collect())
            .ok_or_else(|| CacheError::BucketNotFound(name.to_string()))
    }
}
