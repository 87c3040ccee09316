//! Host capabilities the worker calls back into
//!
//! `skip_waiting` and `claim_clients` are the two host operations a worker
//! can request. `DaemonHost` implements them for the IPC daemon, where each
//! connected socket is a client page.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::errors::WorkerError;

/// Host operations requested by lifecycle handlers
#[async_trait]
pub trait Host: Send + Sync {
    /// Activate the installed worker without waiting for old clients to close
    async fn skip_waiting(&self) -> Result<(), WorkerError>;

    /// Take control of every open client on behalf of `version`
    async fn claim_clients(&self, version: &str) -> Result<(), WorkerError>;
}

/// Client table for the daemon
pub struct DaemonHost {
    /// Controlling worker version by client ID (`None` = uncontrolled)
    clients: RwLock<HashMap<u64, Option<String>>>,
    /// Version that controls newly connected clients
    active_version: RwLock<Option<String>>,
    next_client: AtomicU64,
    skip_waiting: AtomicBool,
}

impl DaemonHost {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            active_version: RwLock::new(None),
            next_client: AtomicU64::new(1),
            skip_waiting: AtomicBool::new(false),
        }
    }

    /// Register a connected client. It is controlled by the active version, if any.
    pub async fn register_client(&self) -> u64 {
        let id = self.next_client.fetch_add(1, Ordering::Relaxed);
        let controller = self.active_version.read().await.clone();
        debug!(client = id, controller = ?controller, "Client connected");
        self.clients.write().await.insert(id, controller);
        id
    }

    pub async fn unregister_client(&self, id: u64) {
        self.clients.write().await.remove(&id);
        debug!(client = id, "Client disconnected");
    }

    /// Version controlling a client
    pub async fn controller_of(&self, id: u64) -> Option<String> {
        self.clients.read().await.get(&id).cloned().flatten()
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Number of clients controlled by `version`
    pub async fn controlled_count(&self, version: &str) -> usize {
        self.clients
            .read()
            .await
            .values()
            .filter(|c| c.as_deref() == Some(version))
            .count()
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::Relaxed)
    }

    /// Consume a pending skip-waiting request. The daemon activates the
    /// installed worker right away when this returns true.
    pub fn take_skip_waiting(&self) -> bool {
        self.skip_waiting.swap(false, Ordering::AcqRel)
    }
}

impl Default for DaemonHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Host for DaemonHost {
    async fn skip_waiting(&self) -> Result<(), WorkerError> {
        self.skip_waiting.store(true, Ordering::Relaxed);
        debug!("Worker requested skip waiting");
        Ok(())
    }

    async fn claim_clients(&self, version: &str) -> Result<(), WorkerError> {
        *self.active_version.write().await = Some(version.to_string());

        let mut clients = self.clients.write().await;
        for controller in clients.values_mut() {
            *controller = Some(version.to_string());
        }

        info!(version = version, clients = clients.len(), "Claimed clients");
        Ok(())
    }
}
