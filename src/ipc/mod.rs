//! IPC server: clients drive the worker over a Unix socket

pub mod protocol;
pub mod server;

pub use protocol::{parse_command, serialize_response, CacheInfo, Command, Response, PROTOCOL_VERSION};
pub use server::{install_and_activate, list_caches, register, IpcServer};
