//! Cache-first offline worker
//!
//! Precaches a fixed list of assets into a versioned cache bucket, evicts
//! buckets from older versions on activation, and answers fetches from the
//! cache with a network fallback.

pub mod cache;
pub mod config;
pub mod http;
pub mod ipc;
pub mod worker;

pub use config::{DaemonConfig, MatchScope, StorageKind, WorkerConfig};
pub use worker::{PrecacheWorker, ServiceWorkerLifecycle, WorkerError};
