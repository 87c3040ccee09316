//! Named cache buckets
//!
//! A bucket maps request keys to stored responses. Backends live in memory
//! (tests, one-shot runs) or on disk (the daemon).

pub mod disk;
pub mod errors;
pub mod hot;
pub mod memory;
pub mod storage;

pub use disk::DiskCacheStorage;
pub use errors::CacheError;
pub use hot::HotResponseCache;
pub use memory::MemoryCacheStorage;
pub use storage::{CacheStorage, CachedMatch, MatchOptions};
