//! # Shop API
//!
//! This crate provides a client for the Amul online shop API: a retrying HTTP
//! layer, the session bootstrap that selects a delivery region, and the product
//! availability lookup.

/// Snapshot model and error types shared by the API client.
mod types;
pub use types::*;

/// Outbound request execution with bounded retries and jittered backoff.
mod retry_client;
pub use retry_client::*;

/// Session bootstrap and the per-request integrity header.
mod session_manager;
pub use session_manager::*;

/// Product availability lookup and response normalisation.
mod product_client;
pub use product_client::*;

#[cfg(test)]
mod test_support;
