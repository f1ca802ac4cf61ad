//! Client-side contract of the public relay.
//!
//! The relay is an untrusted append-only store. It never learns who talks to
//! whom: it sees ephemeral keys, blind search indices and ciphertext.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::wire::{PublishMessageRequest, PublishedKey, StoredMessage};

#[derive(Debug, Clone, thiserror::Error)]
pub enum RelayError {
    /// Connection-level failure (DNS, refused, timeout).
    #[error("http error: {0}")]
    Http(String),
    /// The relay answered with an unexpected status.
    #[error("bad response: {0}")]
    BadResponse(String),
    /// The relay refused the request (4xx); retrying will not help.
    #[error("rejected by relay: {0}")]
    Rejected(String),
    #[error("relay unavailable: {0}")]
    Unavailable(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl RelayError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayError::Http(_) | RelayError::BadResponse(_) | RelayError::Unavailable(_)
        )
    }
}

#[async_trait]
pub trait Relay: Send + Sync {
    /// Append one envelope to the public store.
    async fn publish(&self, request: &PublishMessageRequest) -> Result<(), RelayError>;

    /// Ephemeral keys published strictly after `since`, oldest first, at most
    /// `limit` of them.
    async fn list_keys(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<PublishedKey>, RelayError>;

    /// All ciphertexts stored under a blind search index, oldest first.
    async fn fetch_messages(&self, search_index: &[u8; 32]) -> Result<Vec<StoredMessage>, RelayError>;
}
