//! Hot response cache
//!
//! Keeps recently read disk entries in memory using Moka so repeated hits
//! skip the filesystem. Unbounded: the precache list is small and fixed.
//!
//! Every invalidation bumps a generation counter. A reader records the
//! generation before going to disk and only fills the cache if nothing was
//! invalidated meanwhile, so a slow read cannot resurrect replaced data.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use moka::sync::Cache;
use tracing::{debug, trace};

use crate::http::Response;

/// In-memory front for disk-backed buckets, with hit/miss counters
pub struct HotResponseCache {
    /// Responses by `bucket \n request key`
    responses: Cache<String, Response>,
    /// Invalidation counter. Held while filling or invalidating.
    generation: Mutex<u64>,
    hits: AtomicU64,
    misses: AtomicU64,
}

fn hot_key(bucket: &str, key: &str) -> String {
    format!("{}\n{}", bucket, key)
}

impl HotResponseCache {
    pub fn new() -> Self {
        let responses = Cache::builder().name("hot_response_cache").build();

        Self {
            responses,
            generation: Mutex::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get a response if it is held in memory. Updates hit/miss counters.
    pub fn get(&self, bucket: &str, key: &str) -> Option<Response> {
        match self.responses.get(&hot_key(bucket, key)) {
            Some(response) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(bucket = bucket, key = key, "Hot cache HIT");
                Some(response)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(bucket = bucket, key = key, "Hot cache MISS");
                None
            }
        }
    }

    fn lock_generation(&self) -> MutexGuard<'_, u64> {
        self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current invalidation generation; read before loading from disk
    pub fn generation(&self) -> u64 {
        *self.lock_generation()
    }

    /// Fill an entry read from disk, unless an invalidation happened since
    /// `seen`. Returns whether the entry was stored.
    pub fn insert_if_unchanged(&self, bucket: &str, key: &str, response: Response, seen: u64) -> bool {
        let generation = self.lock_generation();
        if *generation != seen {
            trace!(bucket = bucket, key = key, "Skipping hot fill after invalidation");
            return false;
        }
        self.responses.insert(hot_key(bucket, key), response);
        true
    }

    /// Drop entries overwritten on disk
    pub fn invalidate(&self, bucket: &str, keys: &[String]) {
        let mut generation = self.lock_generation();
        *generation += 1;
        for key in keys {
            self.responses.invalidate(&hot_key(bucket, key));
        }
    }

    /// Drop everything. Called when a bucket is deleted.
    pub fn clear(&self) {
        let mut generation = self.lock_generation();
        *generation += 1;
        self.responses.invalidate_all();
        debug!("Cleared hot response cache");
    }

    /// Returns (hits, misses, hit_rate)
    pub fn stats(&self) -> (u64, u64, f64) {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        (hits, misses, hit_rate)
    }
}

impl Default for HotResponseCache {
    fn default() -> Self {
        Self::new()
    }
}
