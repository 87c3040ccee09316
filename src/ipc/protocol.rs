//! IPC protocol definitions
//!
//! Newline-delimited JSON over a Unix domain socket. Each connection is a
//! client page; commands dispatch lifecycle events to the worker.

use serde::{Deserialize, Serialize};

use crate::worker::WorkerState;

/// Protocol version for future compatibility
pub const PROTOCOL_VERSION: u32 = 1;

fn default_method() -> String {
    "GET".to_string()
}

/// Commands sent by clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    /// Dispatch an install event
    Install,
    /// Dispatch an activate event
    Activate,
    /// Dispatch a fetch event for this client
    #[serde(rename_all = "camelCase")]
    Fetch {
        /// Absolute or scope-relative URL
        url: String,
        #[serde(default = "default_method")]
        method: String,
    },
    /// List cache buckets
    ListCaches,
    /// Get worker status
    GetStatus,
}

/// Responses sent back to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    #[serde(rename_all = "camelCase")]
    Success { message: Option<String> },
    #[serde(rename_all = "camelCase")]
    Error { error: String },
    /// Result of a fetch event
    #[serde(rename_all = "camelCase")]
    Fetched {
        url: String,
        status: u16,
        headers: Vec<(String, String)>,
        /// Body, base64 encoded
        body_base64: String,
        from_cache: bool,
        /// Bucket that answered, for cache hits
        bucket: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Caches { caches: Vec<CacheInfo> },
    #[serde(rename_all = "camelCase")]
    Status {
        version: u32,
        state: WorkerState,
        cache_version: String,
        clients: usize,
        controlled_clients: usize,
        cache_hits: u64,
        network_fallbacks: u64,
    },
}

/// A cache bucket (for listCaches)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheInfo {
    pub name: String,
    pub entries: usize,
    /// Named by the worker's current version
    pub current: bool,
}

/// Parse a JSON command from bytes
pub fn parse_command(data: &[u8]) -> Result<Command, serde_json::Error> {
    serde_json::from_slice(data)
}

/// Serialize a response to JSON bytes
pub fn serialize_response(response: &Response) -> Result<Vec<u8>, serde_json::Error> {
    let mut json = serde_json::to_vec(response)?;
    json.push(b'\n');
    Ok(json)
}
