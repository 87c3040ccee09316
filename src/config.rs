//! Worker and daemon configuration
//!
//! Defaults are overlaid by an optional JSON file (`PRECACHE_CONFIG`) and
//! then by individual environment variables.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::http::types::{parse_scope, resolve_url};
use crate::worker::WorkerError;

/// Bucket name for the current precache list. Bump it whenever the list changes.
pub const DEFAULT_CACHE_VERSION: &str = "task-entry-cache-v2";

/// Assets needed to load the page offline, relative to the scope
pub const DEFAULT_PRECACHED_PATHS: [&str; 5] = [
    "./",
    "./index.html",
    "./manifest.json",
    "./icon-192.png",
    "./icon-512.png",
];

pub const DEFAULT_SCOPE: &str = "http://localhost:8080/";

/// Socket path for IPC communication
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/precache-worker.sock";

/// Which buckets a fetch may be answered from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchScope {
    /// Any bucket, in storage order
    #[default]
    AllBuckets,
    /// Only the bucket named by `cache_version`
    CurrentVersion,
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageKind {
    Memory,
    #[default]
    Disk,
}

/// Values injected into a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerConfig {
    pub cache_version: String,
    pub precached_paths: Vec<String>,
    /// Absolute URL relative paths resolve against
    pub scope: String,
    pub match_scope: MatchScope,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_version: DEFAULT_CACHE_VERSION.to_string(),
            precached_paths: DEFAULT_PRECACHED_PATHS.iter().map(|p| p.to_string()).collect(),
            scope: DEFAULT_SCOPE.to_string(),
            match_scope: MatchScope::AllBuckets,
        }
    }
}

impl WorkerConfig {
    pub fn new(cache_version: &str, precached_paths: &[&str]) -> Self {
        Self {
            cache_version: cache_version.to_string(),
            precached_paths: precached_paths.iter().map(|p| p.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_scope(mut self, scope: &str) -> Self {
        self.scope = scope.to_string();
        self
    }

    pub fn with_match_scope(mut self, match_scope: MatchScope) -> Self {
        self.match_scope = match_scope;
        self
    }

    /// Check the configuration and return the parsed scope
    pub fn validate(&self) -> Result<Url, WorkerError> {
        if self.cache_version.trim().is_empty() {
            return Err(WorkerError::Config("cacheVersion must not be empty".to_string()));
        }
        if self.precached_paths.is_empty() {
            return Err(WorkerError::Config("precachedPaths must not be empty".to_string()));
        }

        let scope = parse_scope(&self.scope).map_err(|e| WorkerError::Config(e.to_string()))?;

        let mut seen = HashSet::new();
        for path in &self.precached_paths {
            let url = resolve_url(&scope, path).map_err(|e| WorkerError::Config(e.to_string()))?;
            if !seen.insert(url.clone()) {
                return Err(WorkerError::Config(format!("duplicate precached path: {}", url)));
            }
        }

        Ok(scope)
    }
}

/// Daemon settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub cache_dir: PathBuf,
    pub storage: StorageKind,
    pub request_timeout_secs: u64,
    /// Upper bound on a single install or activate event
    pub lifecycle_timeout_secs: u64,
    pub worker: WorkerConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            cache_dir: default_cache_dir(),
            storage: StorageKind::Disk,
            request_timeout_secs: 30,
            lifecycle_timeout_secs: 120,
            worker: WorkerConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Defaults, then `PRECACHE_CONFIG`, then individual env overrides
    pub fn load() -> Result<Self> {
        let lookup = |name: &str| std::env::var(name).ok();
        let mut config = match lookup("PRECACHE_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(lookup);
        config
            .worker
            .validate()
            .context("Invalid worker configuration")?;
        Ok(config)
    }

    /// Read a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_json::from_slice(&data)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Apply `PRECACHE_*` overrides from `lookup`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(socket) = lookup("PRECACHE_SOCKET") {
            self.socket_path = PathBuf::from(socket);
        }
        if let Some(dir) = lookup("PRECACHE_CACHE_DIR") {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(scope) = lookup("PRECACHE_SCOPE") {
            self.worker.scope = scope;
        }
        if let Some(version) = lookup("PRECACHE_CACHE_VERSION") {
            self.worker.cache_version = version;
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn lifecycle_timeout(&self) -> Duration {
        Duration::from_secs(self.lifecycle_timeout_secs)
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("precache-worker")
}
