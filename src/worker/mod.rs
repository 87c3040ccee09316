//! Precache worker: install, activate and fetch handlers

pub mod errors;
pub mod host;
pub mod lifecycle;
pub mod state;

pub use errors::WorkerError;
pub use host::{DaemonHost, Host};
pub use lifecycle::{FetchOutcome, PrecacheWorker, ResponseSource, ServiceWorkerLifecycle};
pub use state::WorkerState;
