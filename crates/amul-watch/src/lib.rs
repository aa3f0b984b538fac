//! # Amul Watch
//!
//! This crate runs one availability check against the Amul shop: it opens a
//! region-scoped session, fetches a snapshot per watched product, compares it
//! with the persisted state, alerts on products that became available and
//! writes the new state back.

/// Alert decision and dispatch
mod alert_engine;
pub use alert_engine::*;

/// Notification channel assembly
mod channels;
pub use channels::*;

/// Environment configuration
mod config;
pub use config::*;

/// Run orchestration
mod executor;
pub use executor::*;

/// Persisted state file
mod state_store;
pub use state_store::*;

/// Shared types and errors
mod watch_types;
pub use watch_types::*;
