//! dank-relay: the public append-only relay for dankchat
//!
//! The relay stores ephemeral public keys and ciphertexts under blind
//! search indices. It never sees plaintext, senders or recipients.

#![forbid(unsafe_code)]

pub mod api;
pub mod config;
pub mod server;
pub mod store;

pub use config::ServerConfig;
pub use server::RelayServer;
