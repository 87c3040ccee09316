//! Lifecycle handlers
//!
//! `PrecacheWorker` implements the cache-first worker:
//!
//! - install: fetch every precached path and store them as one batch
//! - activate: delete every bucket not named by the current version, then claim clients
//! - fetch: answer from cache when possible, otherwise from the network, never writing back

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use reqwest::Url;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::errors::WorkerError;
use super::host::Host;
use super::state::WorkerState;
use crate::cache::{CacheStorage, MatchOptions};
use crate::config::{MatchScope, WorkerConfig};
use crate::http::{FetchError, Network, Request, Response};

/// The three events a host dispatches to a worker
///
/// Each returns a future the host awaits; dropping it cancels the event.
#[async_trait]
pub trait ServiceWorkerLifecycle: Send + Sync {
    async fn on_install(&self) -> Result<(), WorkerError>;
    async fn on_activate(&self) -> Result<(), WorkerError>;
    async fn on_fetch(&self, request: Request) -> Result<Response, WorkerError>;
}

/// Where a fetch was answered from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseSource {
    Cache { bucket: String },
    Network,
}

/// A fetch response and its source
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub response: Response,
    pub source: ResponseSource,
}

/// Cache-first worker over injected storage, network and host
pub struct PrecacheWorker {
    config: WorkerConfig,
    scope: Url,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    host: Arc<dyn Host>,
    state: RwLock<WorkerState>,
    /// Set once an activation completes; a later failed event falls back
    /// to Activated instead of Redundant
    activated_once: AtomicBool,
    cache_hits: AtomicU64,
    network_fallbacks: AtomicU64,
}

impl PrecacheWorker {
    /// Create a worker. Fails if the configuration does not validate.
    pub fn new(
        config: WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
        host: Arc<dyn Host>,
    ) -> Result<Self, WorkerError> {
        let scope = config.validate()?;

        Ok(Self {
            config,
            scope,
            storage,
            network,
            host,
            state: RwLock::new(WorkerState::Parsed),
            activated_once: AtomicBool::new(false),
            cache_hits: AtomicU64::new(0),
            network_fallbacks: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn cache_version(&self) -> &str {
        &self.config.cache_version
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    /// Returns (cache hits, network fallbacks)
    pub fn fetch_stats(&self) -> (u64, u64) {
        (
            self.cache_hits.load(Ordering::Relaxed),
            self.network_fallbacks.load(Ordering::Relaxed),
        )
    }

    /// Move into `next` unless another lifecycle event is running.
    /// Returns the previous state.
    async fn begin(&self, next: WorkerState, allowed: &[WorkerState]) -> Result<WorkerState, WorkerError> {
        let mut state = self.state.write().await;
        let current = *state;
        if current.is_busy() || !allowed.contains(&current) {
            return Err(WorkerError::InvalidState {
                expected: allowed
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(" | "),
                actual: current,
            });
        }
        *state = next;
        Ok(current)
    }

    async fn set_state(&self, next: WorkerState) {
        *self.state.write().await = next;
    }

    /// State after a failed or cancelled event. A worker that already
    /// controls clients keeps doing so.
    fn failed_state(&self) -> WorkerState {
        if self.activated_once.load(Ordering::Acquire) {
            WorkerState::Activated
        } else {
            WorkerState::Redundant
        }
    }

    /// Mark a lifecycle event the host gave up on. A worker whose first
    /// install or activate was cancelled midway is redundant.
    pub async fn cancel_event(&self) {
        let mut state = self.state.write().await;
        let current = *state;
        if current.is_busy() {
            let next = self.failed_state();
            warn!(version = %self.config.cache_version, state = %current, next = %next, "Lifecycle event cancelled");
            *state = next;
        }
    }

    /// Request keys the install event stores
    fn precache_requests(&self) -> Result<Vec<Request>, FetchError> {
        self.config
            .precached_paths
            .iter()
            .map(|path| Request::get(path).resolve(&self.scope))
            .collect()
    }

    /// Adopt a bucket left by an earlier run of the same version.
    ///
    /// When the current bucket already holds every precached entry the
    /// worker becomes Installed without touching the network and returns
    /// true. Otherwise the state is left as it was and false is returned.
    pub async fn resume(&self) -> Result<bool, WorkerError> {
        let previous = self
            .begin(
                WorkerState::Installing,
                &[WorkerState::Parsed, WorkerState::Redundant],
            )
            .await?;

        let result = async {
            let version = &self.config.cache_version;
            if !self.storage.has(version).await? {
                return Ok::<_, WorkerError>(false);
            }
            let stored: HashSet<String> = self.storage.entries(version).await?.into_iter().collect();
            let requests = self.precache_requests()?;
            Ok(requests.iter().all(|r| stored.contains(&r.cache_key())))
        }
        .await;

        match result {
            Ok(true) => {
                self.set_state(WorkerState::Installed).await;
                info!(version = %self.config.cache_version, "Resumed from existing cache bucket");
                Ok(true)
            }
            Ok(false) => {
                self.set_state(previous).await;
                debug!(version = %self.config.cache_version, "No complete cache bucket to resume");
                Ok(false)
            }
            Err(e) => {
                self.set_state(previous).await;
                Err(e)
            }
        }
    }

    /// Run the install event. Returns the number of entries stored.
    ///
    /// Installing an activated worker refreshes its bucket in place and
    /// leaves it activated, whether or not the refresh succeeds.
    pub async fn install(&self) -> Result<usize, WorkerError> {
        let previous = self
            .begin(
                WorkerState::Installing,
                &[
                    WorkerState::Parsed,
                    WorkerState::Installed,
                    WorkerState::Activated,
                    WorkerState::Redundant,
                ],
            )
            .await?;

        info!(version = %self.config.cache_version, "Installing worker");

        let result = async {
            let count = self.precache().await?;
            self.host.skip_waiting().await?;
            Ok::<_, WorkerError>(count)
        }
        .await;

        match result {
            Ok(count) => {
                let next = if previous == WorkerState::Activated {
                    WorkerState::Activated
                } else {
                    WorkerState::Installed
                };
                self.set_state(next).await;
                info!(version = %self.config.cache_version, entries = count, "Worker installed");
                Ok(count)
            }
            Err(e) => {
                let next = self.failed_state();
                self.set_state(next).await;
                error!(version = %self.config.cache_version, error = %e, state = %next, "Install failed");
                Err(e)
            }
        }
    }

    /// Fetch every precached path, then store them as one batch
    async fn precache(&self) -> Result<usize, WorkerError> {
        let version = &self.config.cache_version;
        self.storage.open(version).await?;

        let requests = self.precache_requests()?;

        let fetches = requests.into_iter().map(|request| async move {
            let response = self
                .network
                .fetch(&request)
                .await
                .map_err(|source| WorkerError::Precache {
                    url: request.url.clone(),
                    source,
                })?;

            if !response.is_ok() {
                return Err(WorkerError::Precache {
                    source: FetchError::from_status(response.status, &request.url),
                    url: request.url,
                });
            }

            debug!(url = %request.url, size = response.body.len(), "Fetched precache entry");
            Ok::<_, WorkerError>((request, response))
        });

        let entries = try_join_all(fetches).await?;
        let count = entries.len();
        self.storage.put_all(version, entries).await?;
        Ok(count)
    }

    /// Run the activate event. Returns the names of deleted buckets.
    pub async fn activate(&self) -> Result<Vec<String>, WorkerError> {
        self.begin(
            WorkerState::Activating,
            &[WorkerState::Installed, WorkerState::Activated],
        )
        .await?;

        info!(version = %self.config.cache_version, "Activating worker");

        let result = async {
            let deleted = self.evict_stale_buckets().await?;
            self.host.claim_clients(&self.config.cache_version).await?;
            Ok::<_, WorkerError>(deleted)
        }
        .await;

        match result {
            Ok(deleted) => {
                self.activated_once.store(true, Ordering::Release);
                self.set_state(WorkerState::Activated).await;
                info!(
                    version = %self.config.cache_version,
                    deleted = deleted.len(),
                    "Worker activated"
                );
                Ok(deleted)
            }
            Err(e) => {
                let next = self.failed_state();
                self.set_state(next).await;
                error!(version = %self.config.cache_version, error = %e, state = %next, "Activate failed");
                Err(e)
            }
        }
    }

    /// Delete every bucket other than the current version, concurrently
    async fn evict_stale_buckets(&self) -> Result<Vec<String>, WorkerError> {
        let names = self.storage.keys().await?;
        let stale = names
            .into_iter()
            .filter(|name| *name != self.config.cache_version);

        let deletions = stale.map(|name| async move {
            let deleted = self.storage.delete(&name).await?;
            if deleted {
                info!(bucket = %name, "Old cache deleted");
            }
            Ok::<_, WorkerError>(deleted.then_some(name))
        });

        Ok(try_join_all(deletions).await?.into_iter().flatten().collect())
    }

    /// Handle a fetch, reporting where the response came from
    pub async fn fetch(&self, request: Request) -> Result<FetchOutcome, WorkerError> {
        let request = request.resolve(&self.scope)?;
        let version = &self.config.cache_version;

        let options = match self.config.match_scope {
            MatchScope::AllBuckets => MatchOptions::default(),
            MatchScope::CurrentVersion => MatchOptions::in_bucket(version),
        };

        if let Some(hit) = self.storage.match_request(&request, &options).await? {
            if hit.cache_name != *version {
                warn!(
                    url = %request.url,
                    bucket = %hit.cache_name,
                    current = %version,
                    "Serving response from a stale cache bucket"
                );
            }
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!(url = %request.url, bucket = %hit.cache_name, "Cache HIT");
            return Ok(FetchOutcome {
                response: hit.response,
                source: ResponseSource::Cache {
                    bucket: hit.cache_name,
                },
            });
        }

        self.network_fallbacks.fetch_add(1, Ordering::Relaxed);
        debug!(method = %request.method, url = %request.url, "Cache MISS, fetching from network");

        let response = self.network.fetch(&request).await?;
        Ok(FetchOutcome {
            response,
            source: ResponseSource::Network,
        })
    }

    /// Fetch on behalf of a client this worker does not control
    pub async fn fetch_uncontrolled(&self, request: Request) -> Result<Response, WorkerError> {
        let request = request.resolve(&self.scope)?;
        debug!(method = %request.method, url = %request.url, "Uncontrolled fetch");
        Ok(self.network.fetch(&request).await?)
    }
}

#[async_trait]
impl ServiceWorkerLifecycle for PrecacheWorker {
    async fn on_install(&self) -> Result<(), WorkerError> {
        self.install().await.map(|_| ())
    }

    async fn on_activate(&self) -> Result<(), WorkerError> {
        self.activate().await.map(|_| ())
    }

    async fn on_fetch(&self, request: Request) -> Result<Response, WorkerError> {
        self.fetch(request).await.map(|outcome| outcome.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheError, MemoryCacheStorage};
    use crate::worker::DaemonHost;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    const SCOPE: &str = "http://localhost:8080/app/";

    /// Network that serves a fixed set of URLs and records every call
    #[derive(Default)]
    struct FakeNetwork {
        routes: Mutex<HashMap<String, Response>>,
        calls: Mutex<Vec<String>>,
        offline: Mutex<HashSet<String>>,
    }

    impl FakeNetwork {
        fn serving(paths: &[&str]) -> Self {
            let network = Self::default();
            for path in paths {
                network.route(path, 200, &format!("network:{}", path));
            }
            network
        }

        fn route(&self, path: &str, status: u16, body: &str) {
            let url = absolute(path);
            self.routes
                .lock()
                .unwrap()
                .insert(url.clone(), Response::new(&url, status, body.as_bytes().to_vec()));
        }

        fn go_offline(&self, path: &str) {
            self.offline.lock().unwrap().insert(absolute(path));
        }

        fn calls_to(&self, path: &str) -> usize {
            let url = absolute(path);
            self.calls.lock().unwrap().iter().filter(|c| **c == url).count()
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Network for FakeNetwork {
        async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
            self.calls.lock().unwrap().push(request.url.clone());
            if self.offline.lock().unwrap().contains(&request.url) {
                return Err(FetchError::Network("offline".to_string()));
            }
            Ok(self
                .routes
                .lock()
                .unwrap()
                .get(&request.url)
                .cloned()
                .unwrap_or_else(|| Response::new(&request.url, 404, Vec::new())))
        }
    }

    /// Memory storage that records delete calls and can refuse them
    #[derive(Default)]
    struct RecordingStorage {
        inner: MemoryCacheStorage,
        deletes: Mutex<Vec<String>>,
        refuse_deletes: bool,
    }

    impl RecordingStorage {
        fn undeletable() -> Self {
            Self {
                refuse_deletes: true,
                ..Self::default()
            }
        }

        fn deletes(&self) -> Vec<String> {
            self.deletes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CacheStorage for RecordingStorage {
        async fn open(&self, name: &str) -> Result<(), CacheError> {
            self.inner.open(name).await
        }
        async fn has(&self, name: &str) -> Result<bool, CacheError> {
            self.inner.has(name).await
        }
        async fn keys(&self) -> Result<Vec<String>, CacheError> {
            self.inner.keys().await
        }
        async fn delete(&self, name: &str) -> Result<bool, CacheError> {
            self.deletes.lock().unwrap().push(name.to_string());
            if self.refuse_deletes {
                return Err(CacheError::Task(format!("cannot delete {}", name)));
            }
            self.inner.delete(name).await
        }
        async fn put_all(
            &self,
            name: &str,
            entries: Vec<(Request, Response)>,
        ) -> Result<(), CacheError> {
            self.inner.put_all(name, entries).await
        }
        async fn get(&self, name: &str, key: &str) -> Result<Option<Response>, CacheError> {
            self.inner.get(name, key).await
        }
        async fn entries(&self, name: &str) -> Result<Vec<String>, CacheError> {
            self.inner.entries(name).await
        }
    }

    fn absolute(path: &str) -> String {
        Url::parse(SCOPE).unwrap().join(path).unwrap().to_string()
    }

    fn default_paths() -> Vec<&'static str> {
        crate::config::DEFAULT_PRECACHED_PATHS.to_vec()
    }

    struct Fixture {
        worker: PrecacheWorker,
        storage: Arc<dyn CacheStorage>,
        network: Arc<FakeNetwork>,
        host: Arc<DaemonHost>,
    }

    fn fixture_with(config: WorkerConfig, storage: Arc<dyn CacheStorage>) -> Fixture {
        let network = Arc::new(FakeNetwork::serving(&default_paths()));
        let host = Arc::new(DaemonHost::new());
        let worker = PrecacheWorker::new(
            config.with_scope(SCOPE),
            Arc::clone(&storage),
            network.clone(),
            host.clone(),
        )
        .unwrap();
        Fixture {
            worker,
            storage,
            network,
            host,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(
            WorkerConfig::default(),
            Arc::new(MemoryCacheStorage::new()),
        )
    }

    async fn bucket_urls(storage: &Arc<dyn CacheStorage>, name: &str) -> HashSet<String> {
        storage.entries(name).await.unwrap().into_iter().collect()
    }

    fn expected_keys() -> HashSet<String> {
        default_paths()
            .iter()
            .map(|p| format!("GET {}", absolute(p)))
            .collect()
    }

    #[tokio::test]
    async fn test_install_populates_every_listed_resource() {
        let f = fixture();

        let count = f.worker.install().await.unwrap();

        assert_eq!(count, 5);
        assert_eq!(bucket_urls(&f.storage, "task-entry-cache-v2").await, expected_keys());
        assert_eq!(f.worker.state().await, WorkerState::Installed);
        assert!(f.host.skip_waiting_requested());
    }

    #[tokio::test]
    async fn test_install_twice_keeps_same_entries() {
        let f = fixture();

        f.worker.install().await.unwrap();
        f.worker.install().await.unwrap();

        let entries = f.storage.entries("task-entry-cache-v2").await.unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries.into_iter().collect::<HashSet<_>>(), expected_keys());
    }

    #[tokio::test]
    async fn test_install_fails_as_a_whole_on_bad_status() {
        let f = fixture();
        f.network.route("./icon-512.png", 404, "");

        let err = f.worker.install().await.unwrap_err();

        assert!(matches!(err, WorkerError::Precache { .. }));
        assert!(f.storage.entries("task-entry-cache-v2").await.unwrap().is_empty());
        assert_eq!(f.worker.state().await, WorkerState::Redundant);
        assert!(!f.host.skip_waiting_requested());
    }

    #[tokio::test]
    async fn test_install_fails_on_network_error_and_can_retry() {
        let f = fixture();
        f.network.go_offline("./manifest.json");

        assert!(f.worker.install().await.is_err());
        assert!(f.storage.entries("task-entry-cache-v2").await.unwrap().is_empty());

        f.network.offline.lock().unwrap().clear();
        assert_eq!(f.worker.install().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_activate_evicts_non_current_buckets() {
        let f = fixture();
        f.storage.open("task-entry-cache-v1").await.unwrap();
        f.worker.install().await.unwrap();
        let client = f.host.register_client().await;

        let deleted = f.worker.activate().await.unwrap();

        assert_eq!(deleted, vec!["task-entry-cache-v1"]);
        assert_eq!(f.storage.keys().await.unwrap(), vec!["task-entry-cache-v2"]);
        assert_eq!(f.worker.state().await, WorkerState::Activated);
        assert_eq!(f.host.controller_of(client).await.as_deref(), Some("task-entry-cache-v2"));
    }

    #[tokio::test]
    async fn test_activate_with_only_current_bucket_deletes_nothing() {
        let storage = Arc::new(RecordingStorage::default());
        let f = fixture_with(WorkerConfig::default(), storage.clone());
        f.worker.install().await.unwrap();

        let deleted = f.worker.activate().await.unwrap();

        // Each deletion is logged once per returned name; none here
        assert!(deleted.is_empty());
        assert!(storage.deletes().is_empty());
        assert_eq!(f.storage.keys().await.unwrap(), vec!["task-entry-cache-v2"]);
    }

    #[tokio::test]
    async fn test_activate_deletes_each_stale_bucket_once() {
        let storage = Arc::new(RecordingStorage::default());
        let f = fixture_with(WorkerConfig::default(), storage.clone());
        f.storage.open("task-entry-cache-v1").await.unwrap();
        f.storage.open("task-entry-cache-v0").await.unwrap();
        f.worker.install().await.unwrap();

        let mut deleted = f.worker.activate().await.unwrap();
        deleted.sort();
        let mut attempted = storage.deletes();
        attempted.sort();

        assert_eq!(deleted, vec!["task-entry-cache-v0", "task-entry-cache-v1"]);
        assert_eq!(attempted, deleted);
    }

    #[tokio::test]
    async fn test_activate_before_install_is_rejected() {
        let f = fixture();
        let err = f.worker.activate().await.unwrap_err();
        assert!(matches!(
            err,
            WorkerError::InvalidState {
                actual: WorkerState::Parsed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_delete_failure_is_fatal_and_skips_claim() {
        let f = fixture_with(WorkerConfig::default(), Arc::new(RecordingStorage::undeletable()));
        f.storage.open("task-entry-cache-v1").await.unwrap();
        f.worker.install().await.unwrap();
        let client = f.host.register_client().await;

        assert!(matches!(f.worker.activate().await, Err(WorkerError::Cache(_))));
        assert_eq!(f.worker.state().await, WorkerState::Redundant);
        assert_eq!(f.host.controller_of(client).await, None);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_worker_activated() {
        let f = fixture();
        f.worker.install().await.unwrap();
        f.worker.activate().await.unwrap();
        f.network.go_offline("./icon-512.png");

        assert!(f.worker.install().await.is_err());

        assert_eq!(f.worker.state().await, WorkerState::Activated);
        assert!(f.worker.state().await.can_intercept_fetch());
        let outcome = f.worker.fetch(Request::get("./icon-512.png")).await.unwrap();
        assert_eq!(
            outcome.source,
            ResponseSource::Cache {
                bucket: "task-entry-cache-v2".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_cancelled_refresh_keeps_worker_activated() {
        let f = fixture();
        f.worker.install().await.unwrap();
        f.worker.activate().await.unwrap();
        f.worker
            .begin(WorkerState::Installing, &[WorkerState::Activated])
            .await
            .unwrap();

        f.worker.cancel_event().await;
        assert_eq!(f.worker.state().await, WorkerState::Activated);
    }

    #[tokio::test]
    async fn test_restart_offline_resumes_from_disk_bucket() {
        let tmp = tempfile::TempDir::new().unwrap();
        let disk = |dir: &std::path::Path| -> Arc<dyn CacheStorage> {
            Arc::new(crate::cache::DiskCacheStorage::new(dir.to_path_buf()).unwrap())
        };

        let f = fixture_with(WorkerConfig::default(), disk(tmp.path()));
        f.worker.install().await.unwrap();
        f.worker.activate().await.unwrap();
        drop(f);

        // New process: same cache dir, no network at all
        let network = Arc::new(FakeNetwork::default());
        for path in default_paths() {
            network.go_offline(path);
        }
        let host = Arc::new(DaemonHost::new());
        let client = host.register_client().await;
        let worker = PrecacheWorker::new(
            WorkerConfig::default().with_scope(SCOPE),
            disk(tmp.path()),
            network.clone(),
            host.clone(),
        )
        .unwrap();

        assert!(worker.resume().await.unwrap());
        assert_eq!(worker.state().await, WorkerState::Installed);
        worker.activate().await.unwrap();

        assert!(worker.state().await.can_intercept_fetch());
        assert_eq!(host.controller_of(client).await.as_deref(), Some("task-entry-cache-v2"));
        let response = worker.on_fetch(Request::get("./index.html")).await.unwrap();
        assert_eq!(response.body, b"network:./index.html");
        assert_eq!(network.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_resume_needs_every_precached_entry() {
        let f = fixture();
        assert!(!f.worker.resume().await.unwrap());
        assert_eq!(f.worker.state().await, WorkerState::Parsed);

        // Bucket exists but one entry is missing
        f.storage.open("task-entry-cache-v2").await.unwrap();
        let url = absolute("./index.html");
        f.storage
            .put_all(
                "task-entry-cache-v2",
                vec![(Request::get(&url), Response::new(&url, 200, b"x".to_vec()))],
            )
            .await
            .unwrap();
        assert!(!f.worker.resume().await.unwrap());
        assert_eq!(f.worker.state().await, WorkerState::Parsed);
        assert_eq!(f.network.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_fetch_hit_skips_network() {
        let f = fixture();
        f.worker.install().await.unwrap();
        f.worker.activate().await.unwrap();
        let calls_after_install = f.network.total_calls();

        let outcome = f.worker.fetch(Request::get("./index.html")).await.unwrap();

        assert_eq!(outcome.response.body, b"network:./index.html");
        assert_eq!(
            outcome.source,
            ResponseSource::Cache {
                bucket: "task-entry-cache-v2".to_string()
            }
        );
        assert_eq!(f.network.total_calls(), calls_after_install);
    }

    #[tokio::test]
    async fn test_fetch_miss_goes_to_network_once() {
        let f = fixture();
        f.worker.install().await.unwrap();
        f.network.route("./unknown-asset.js", 200, "console.log(1)");

        let response = f
            .worker
            .on_fetch(Request::get("./unknown-asset.js"))
            .await
            .unwrap();

        assert_eq!(response.body, b"console.log(1)");
        assert_eq!(f.network.calls_to("./unknown-asset.js"), 1);
    }

    #[tokio::test]
    async fn test_fetch_never_writes_back() {
        let f = fixture();
        f.worker.install().await.unwrap();
        f.network.route("./unknown-asset.js", 200, "x");

        f.worker.fetch(Request::get("./unknown-asset.js")).await.unwrap();
        let second = f.worker.fetch(Request::get("./unknown-asset.js")).await.unwrap();

        assert_eq!(second.source, ResponseSource::Network);
        assert_eq!(f.network.calls_to("./unknown-asset.js"), 2);
        let key = format!("GET {}", absolute("./unknown-asset.js"));
        assert!(!bucket_urls(&f.storage, "task-entry-cache-v2").await.contains(&key));
        assert_eq!(f.worker.fetch_stats(), (0, 2));
    }

    #[tokio::test]
    async fn test_offline_miss_surfaces_error() {
        let f = fixture();
        f.worker.install().await.unwrap();
        f.network.go_offline("./unknown-asset.js");

        let err = f.worker.fetch(Request::get("./unknown-asset.js")).await.unwrap_err();
        assert!(matches!(err, WorkerError::Fetch(FetchError::Network(_))));
    }

    #[tokio::test]
    async fn test_offline_hit_still_served() {
        let f = fixture();
        f.worker.install().await.unwrap();
        f.network.go_offline("./index.html");

        let response = f.worker.on_fetch(Request::get("./index.html")).await.unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn test_post_bypasses_cache() {
        let f = fixture();
        f.worker.install().await.unwrap();
        let before = f.network.calls_to("./index.html");

        let outcome = f
            .worker
            .fetch(Request::new("POST", "./index.html"))
            .await
            .unwrap();

        assert_eq!(outcome.source, ResponseSource::Network);
        assert_eq!(f.network.calls_to("./index.html"), before + 1);
    }

    #[tokio::test]
    async fn test_stale_bucket_served_unless_restricted() {
        let stale_entry = |storage: Arc<dyn CacheStorage>| async move {
            storage.open("task-entry-cache-v1").await.unwrap();
            let url = absolute("./old.js");
            storage
                .put_all(
                    "task-entry-cache-v1",
                    vec![(Request::get(&url), Response::new(&url, 200, b"old".to_vec()))],
                )
                .await
                .unwrap();
        };

        let f = fixture();
        stale_entry(Arc::clone(&f.storage)).await;
        let outcome = f.worker.fetch(Request::get("./old.js")).await.unwrap();
        assert_eq!(
            outcome.source,
            ResponseSource::Cache {
                bucket: "task-entry-cache-v1".to_string()
            }
        );

        let f = fixture_with(
            WorkerConfig::default().with_match_scope(MatchScope::CurrentVersion),
            Arc::new(MemoryCacheStorage::new()),
        );
        stale_entry(Arc::clone(&f.storage)).await;
        let outcome = f.worker.fetch(Request::get("./old.js")).await.unwrap();
        assert_eq!(outcome.source, ResponseSource::Network);
    }

    #[tokio::test]
    async fn test_distinct_config_per_worker() {
        let f = fixture_with(
            WorkerConfig::new("custom-v7", &["./a.css", "./b.js"]),
            Arc::new(MemoryCacheStorage::new()),
        );
        f.network.route("./a.css", 200, "a");
        f.network.route("./b.js", 200, "b");

        assert_eq!(f.worker.install().await.unwrap(), 2);
        assert_eq!(f.storage.keys().await.unwrap(), vec!["custom-v7"]);
    }

    #[tokio::test]
    async fn test_cancel_only_affects_running_event() {
        let f = fixture();
        f.worker.cancel_event().await;
        assert_eq!(f.worker.state().await, WorkerState::Parsed);

        f.worker.install().await.unwrap();
        f.worker.cancel_event().await;
        assert_eq!(f.worker.state().await, WorkerState::Installed);
    }

    #[tokio::test]
    async fn test_cancel_marks_busy_worker_redundant() {
        let f = fixture();
        f.worker.begin(WorkerState::Installing, &[WorkerState::Parsed]).await.unwrap();

        assert!(matches!(
            f.worker.install().await,
            Err(WorkerError::InvalidState { .. })
        ));

        f.worker.cancel_event().await;
        assert_eq!(f.worker.state().await, WorkerState::Redundant);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = PrecacheWorker::new(
            WorkerConfig::new("v1", &[]),
            Arc::new(MemoryCacheStorage::new()),
            Arc::new(FakeNetwork::default()),
            Arc::new(DaemonHost::new()),
        );
        assert!(matches!(result, Err(WorkerError::Config(_))));
    }
}
