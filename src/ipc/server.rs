//! IPC Server - Unix socket server hosting the worker
//!
//! Every connection is registered with the host as a client. Lifecycle
//! commands are bounded by the configured timeout; a timed-out event is
//! cancelled. A successful install asks to skip waiting, so the server
//! activates the worker straight after it.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use crate::http::Request;
use crate::ipc::protocol::{
    parse_command, serialize_response, CacheInfo, Command, Response, PROTOCOL_VERSION,
};
use crate::worker::{DaemonHost, PrecacheWorker, ResponseSource, WorkerError};

/// Shared state handed to each connection
#[derive(Clone)]
struct ServerContext {
    worker: Arc<PrecacheWorker>,
    host: Arc<DaemonHost>,
    lifecycle_timeout: Duration,
}

/// IPC server that dispatches client commands to the worker
pub struct IpcServer {
    context: ServerContext,
    socket_path: PathBuf,
    listener: Option<UnixListener>,
}

impl IpcServer {
    pub fn new(
        worker: Arc<PrecacheWorker>,
        host: Arc<DaemonHost>,
        socket_path: PathBuf,
        lifecycle_timeout: Duration,
    ) -> Self {
        Self {
            context: ServerContext {
                worker,
                host,
                lifecycle_timeout,
            },
            socket_path,
            listener: None,
        }
    }

    /// Bind the socket, replacing a stale socket file
    pub async fn start(&mut self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .context("Failed to remove existing socket file")?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind Unix socket: {:?}", self.socket_path))?;

        info!(socket_path = %self.socket_path.display(), "IPC server started");

        self.listener = Some(listener);
        Ok(())
    }

    /// Run the server loop, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("Server not started")?;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let context = self.context.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, context).await {
                            error!(error = %e, "Connection handler error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Remove the socket file
    pub async fn stop(&self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).context("Failed to remove socket file")?;
        }
        info!("IPC server stopped");
        Ok(())
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

/// Handle a single client connection
async fn handle_connection(stream: UnixStream, context: ServerContext) -> Result<()> {
    let client_id = context.host.register_client().await;

    let (reader, mut writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => {
                debug!(client = client_id, "Connection closed by client");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                debug!(client = client_id, command = %trimmed, "Received command");

                let response = match parse_command(trimmed.as_bytes()) {
                    Ok(command) => process_command(command, client_id, &context).await,
                    Err(e) => {
                        warn!(error = %e, command = %trimmed, "Failed to parse command");
                        Response::Error {
                            error: format!("Invalid command: {}", e),
                        }
                    }
                };

                match serialize_response(&response) {
                    Ok(json) => {
                        if let Err(e) = writer.write_all(&json).await {
                            error!(error = %e, "Failed to write response");
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to serialize response");
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to read from socket");
                break;
            }
        }
    }

    context.host.unregister_client(client_id).await;
    Ok(())
}

/// Await a lifecycle event, cancelling it after `timeout`
async fn run_lifecycle<T, F>(worker: &PrecacheWorker, timeout: Duration, event: F) -> Result<T, String>
where
    F: Future<Output = Result<T, WorkerError>>,
{
    match tokio::time::timeout(timeout, event).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(_) => {
            worker.cancel_event().await;
            Err(format!("Lifecycle event timed out after {:?}", timeout))
        }
    }
}

/// Process a command and return a response
async fn process_command(command: Command, client_id: u64, context: &ServerContext) -> Response {
    let worker = &context.worker;

    match command {
        Command::Install => {
            info!(client = client_id, "Processing install command");
            let event = install_and_activate(worker, &context.host);
            match run_lifecycle(worker, context.lifecycle_timeout, event).await {
                Ok((count, activated)) => {
                    let suffix = if activated { " and activated" } else { "" };
                    Response::Success {
                        message: Some(format!(
                            "Installed {} entries into '{}'{}",
                            count,
                            worker.cache_version(),
                            suffix
                        )),
                    }
                }
                Err(error) => Response::Error { error },
            }
        }

        Command::Activate => {
            info!(client = client_id, "Processing activate command");
            match run_lifecycle(worker, context.lifecycle_timeout, worker.activate()).await {
                Ok(deleted) => Response::Success {
                    message: Some(format!("Activated; deleted {} stale caches", deleted.len())),
                },
                Err(error) => Response::Error { error },
            }
        }

        Command::Fetch { url, method } => {
            let request = Request::new(&method, &url);
            let controlled = worker.state().await.can_intercept_fetch()
                && context.host.controller_of(client_id).await.as_deref()
                    == Some(worker.cache_version());

            let outcome = if controlled {
                worker.fetch(request).await
            } else {
                worker.fetch_uncontrolled(request).await.map(|response| {
                    crate::worker::FetchOutcome {
                        response,
                        source: ResponseSource::Network,
                    }
                })
            };

            match outcome {
                Ok(outcome) => {
                    let bucket = match outcome.source {
                        ResponseSource::Cache { bucket } => Some(bucket),
                        ResponseSource::Network => None,
                    };
                    Response::Fetched {
                        url: outcome.response.url,
                        status: outcome.response.status,
                        headers: outcome.response.headers,
                        body_base64: base64::engine::general_purpose::STANDARD
                            .encode(&outcome.response.body),
                        from_cache: bucket.is_some(),
                        bucket,
                    }
                }
                Err(e) => Response::Error {
                    error: e.to_string(),
                },
            }
        }

        Command::ListCaches => match list_caches(worker).await {
            Ok(caches) => Response::Caches { caches },
            Err(e) => Response::Error {
                error: format!("Failed to list caches: {}", e),
            },
        },

        Command::GetStatus => {
            let (cache_hits, network_fallbacks) = worker.fetch_stats();
            Response::Status {
                version: PROTOCOL_VERSION,
                state: worker.state().await,
                cache_version: worker.cache_version().to_string(),
                clients: context.host.client_count().await,
                controlled_clients: context.host.controlled_count(worker.cache_version()).await,
                cache_hits,
                network_fallbacks,
            }
        }
    }
}

/// Run install, then activate if the worker asked to skip waiting.
/// Returns the entry count and whether activation ran.
pub async fn install_and_activate(
    worker: &PrecacheWorker,
    host: &DaemonHost,
) -> Result<(usize, bool), WorkerError> {
    let count = worker.install().await?;
    if !host.take_skip_waiting() {
        return Ok((count, false));
    }
    worker.activate().await?;
    Ok((count, true))
}

/// Bring the worker up at daemon start. A complete bucket from an earlier
/// run is adopted without the network; otherwise the worker installs.
pub async fn register(worker: &PrecacheWorker, host: &DaemonHost) -> Result<(), WorkerError> {
    if worker.resume().await? {
        worker.activate().await?;
        return Ok(());
    }
    install_and_activate(worker, host).await.map(|_| ())
}

/// Describe every bucket in the worker's storage
pub async fn list_caches(worker: &PrecacheWorker) -> Result<Vec<CacheInfo>, WorkerError> {
    let storage = worker.storage();
    let mut caches = Vec::new();
    for name in storage.keys().await? {
        let entries = storage.entries(&name).await?.len();
        caches.push(CacheInfo {
            current: name == worker.cache_version(),
            name,
            entries,
        });
    }
    Ok(caches)
}
