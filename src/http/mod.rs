//! Request/response model and the network fallback client

pub mod client;
pub mod errors;
pub mod types;

pub use client::{HttpNetwork, Network};
pub use errors::FetchError;
pub use types::*;
