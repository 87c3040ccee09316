//! Precache worker daemon
//!
//! Hosts a cache-first worker and exposes its lifecycle over a Unix socket.

use std::env;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use precache_worker::cache::{CacheStorage, DiskCacheStorage, MemoryCacheStorage};
use precache_worker::http::{HttpNetwork, Request};
use precache_worker::ipc::{list_caches, register, IpcServer};
use precache_worker::worker::{DaemonHost, ResponseSource};
use precache_worker::{DaemonConfig, PrecacheWorker, StorageKind};

/// CLI command
#[derive(Debug)]
enum Command {
    /// Run IPC server mode (default)
    Server,
    /// Precache the asset list
    Install,
    /// Install, then evict stale caches
    Activate,
    /// Fetch a URL through the worker
    Fetch { url: String },
    /// List cache buckets
    List,
    /// Show help
    Help,
}

fn print_help() {
    eprintln!(
        r#"precache-worker - Cache-first offline worker

USAGE:
    precache-worker                  # Run IPC server (default)
    precache-worker install
    precache-worker activate
    precache-worker fetch <url>
    precache-worker list
    precache-worker help

COMMANDS:
    (none)    Resume or install, activate, then serve clients on the IPC socket
    install   Precache the configured asset list
    activate  Install, then delete caches from older versions
    fetch     Fetch a URL cache-first (relative URLs resolve against the scope)
    list      List cache buckets and their entry counts
    help      Show this help message

ENVIRONMENT:
    PRECACHE_CONFIG         Path to a JSON config file
    PRECACHE_SOCKET         IPC socket path
    PRECACHE_CACHE_DIR      Disk cache directory
    PRECACHE_SCOPE          Scope URL relative paths resolve against
    PRECACHE_CACHE_VERSION  Current cache bucket name
    RUST_LOG                Log level (trace, debug, info, warn, error)
"#
    );
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        return Ok(Command::Server);
    }

    match args[1].as_str() {
        "install" => Ok(Command::Install),
        "activate" => Ok(Command::Activate),
        "fetch" => {
            let url = args
                .get(2)
                .ok_or_else(|| anyhow!("Usage: precache-worker fetch <url>"))?;
            Ok(Command::Fetch { url: url.clone() })
        }
        "list" => Ok(Command::List),
        "help" | "--help" | "-h" => Ok(Command::Help),
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            Ok(Command::Help)
        }
    }
}

fn build_storage(config: &DaemonConfig) -> Result<Arc<dyn CacheStorage>> {
    match config.storage {
        StorageKind::Memory => Ok(Arc::new(MemoryCacheStorage::new())),
        StorageKind::Disk => {
            let storage = DiskCacheStorage::new(config.cache_dir.clone())
                .context("Failed to open disk cache storage")?;
            Ok(Arc::new(storage))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let log_level = env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let command = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    let config = DaemonConfig::load()?;
    let storage = build_storage(&config)?;
    let network = Arc::new(
        HttpNetwork::with_timeout(config.request_timeout()).context("Failed to create network client")?,
    );
    let host = Arc::new(DaemonHost::new());
    let worker = Arc::new(PrecacheWorker::new(
        config.worker.clone(),
        storage,
        network,
        host.clone(),
    )?);

    match command {
        Command::Server => {
            info!(
                version = %worker.cache_version(),
                scope = %config.worker.scope,
                "Starting precache worker in IPC server mode"
            );

            // A failure leaves the worker uncontrolling; clients can retry via IPC
            if let Err(e) = register(&worker, &host).await {
                warn!(error = %e, "Registration at startup failed");
            }

            let mut ipc_server = IpcServer::new(
                Arc::clone(&worker),
                host,
                config.socket_path.clone(),
                config.lifecycle_timeout(),
            );
            if let Err(e) = ipc_server.start().await {
                error!(error = %e, "Failed to start IPC server");
                return Err(e);
            }

            info!("Daemon ready. Waiting for clients...");

            tokio::select! {
                result = ipc_server.run() => {
                    if let Err(e) = result {
                        error!(error = %e, "IPC server error");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                }
            }

            ipc_server.stop().await?;
            info!("Shutdown complete.");
        }
        Command::Install => {
            let count = worker.install().await?;
            println!("Installed {} entries into '{}'", count, worker.cache_version());
        }
        Command::Activate => {
            worker.install().await?;
            let deleted = worker.activate().await?;
            if deleted.is_empty() {
                println!("Activated '{}'; no stale caches", worker.cache_version());
            } else {
                println!("Activated '{}'; deleted:", worker.cache_version());
                for name in deleted {
                    println!("  {}", name);
                }
            }
        }
        Command::Fetch { url } => {
            let outcome = worker.fetch(Request::get(&url)).await?;
            let source = match &outcome.source {
                ResponseSource::Cache { bucket } => format!("cache ({})", bucket),
                ResponseSource::Network => "network".to_string(),
            };
            println!(
                "{} {} from {} ({} bytes)",
                outcome.response.status,
                outcome.response.url,
                source,
                outcome.response.body.len()
            );
        }
        Command::List => {
            let caches = list_caches(&worker).await?;
            if caches.is_empty() {
                println!("No cache buckets.");
            } else {
                println!("Cache buckets:");
                for cache in caches {
                    let marker = if cache.current { " (current)" } else { "" };
                    println!("  {}{} - {} entries", cache.name, marker, cache.entries);
                }
            }
        }
        Command::Help => print_help(),
    }

    Ok(())
}
