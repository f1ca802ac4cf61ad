//! Error types for dankchat core.

use std::path::PathBuf;

use thiserror::Error;

use dank_crypto::{EnvelopeError, KeyError};

use crate::directory::DirectoryError;
use crate::relay::RelayError;
use crate::store::StoreError;
use crate::wire::WireError;

/// Aggregate error for client operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No identity key on this device; the client must register first.
    #[error("not registered: no identity key found")]
    NotRegistered,

    #[error("identity already exists at {0}")]
    AlreadyRegistered(PathBuf),

    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("unknown recipient: {0}")]
    UnknownRecipient(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] EnvelopeError),

    #[error("invalid key: {0}")]
    Key(#[from] KeyError),

    #[error("wire format error: {0}")]
    Wire(#[from] WireError),

    #[error("timeline actor has stopped")]
    TimelineClosed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// True when the relay could not be reached or answered with an error.
    pub fn is_relay_failure(&self) -> bool {
        matches!(self, CoreError::Relay(_))
    }
}
