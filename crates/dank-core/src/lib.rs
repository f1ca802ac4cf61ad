//! dankchat core - client logic for anonymous, end-to-end encrypted messaging
//! over a public relay.
//!
//! This crate implements:
//! - The relay client contract and an HTTP implementation
//! - The reconciliation engine that scans the relay for messages addressed to us
//! - The local outbox and scan watermark storage
//! - The send pipeline with publish retry
//! - A single-writer contact timeline and a periodic scan scheduler

#![forbid(unsafe_code)]

// Relay access
pub mod wire;
pub mod relay;
pub mod harness;

// Client services
pub mod reconcile;
pub mod messenger;
pub mod scheduler;
pub mod timeline;
pub mod contacts;

// Infrastructure
pub mod store;
pub mod keystore;
pub mod directory;

// Supporting modules
pub mod errors;

// Optional transport implementations
#[cfg(feature = "http-relay")]
pub mod http_relay;

// Optional storage implementations
#[cfg(feature = "sqlite")]
pub mod sqlite_store;

pub use errors::CoreError;
