//! Local persistence for sent messages and the scan watermark.
//!
//! The relay only holds ciphertext the sender can no longer decrypt (the
//! ephemeral key is gone), so the sender's own copy of every message lives
//! here. Each entry also keeps the exact publish request so that an entry
//! that never reached the relay can be republished unchanged.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::wire::PublishMessageRequest;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during store operations.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("storage operation failed: {0}")]
    OperationFailed(String),

    #[error("data corruption detected: {0}")]
    DataCorruption(String),
}

// ============================================================================
// Data Models
// ============================================================================

/// Where a sent message stands with respect to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryStatus {
    /// Recorded locally, publish not yet confirmed.
    Pending,
    Published,
    /// Last publish attempt failed; eligible for retry.
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Published => "published",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryStatus::Published)
    }
}

impl FromStr for DeliveryStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "published" => Ok(DeliveryStatus::Published),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(StoreError::DataCorruption(format!("unknown delivery status {other:?}"))),
        }
    }
}

/// One locally sent message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxRecord {
    /// Logical send identity: the envelope's search index in hex.
    pub send_id: String,
    /// Recipient identity public key (128 hex chars).
    pub recipient: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    /// Completed publish attempts (successful or not).
    pub attempts: u32,
    pub last_error: Option<String>,
    pub request: PublishMessageRequest,
}

impl OutboxRecord {
    /// A fresh entry for a message about to be published.
    pub fn pending(
        recipient: impl Into<String>,
        text: impl Into<String>,
        sent_at: DateTime<Utc>,
        request: PublishMessageRequest,
    ) -> Self {
        Self {
            send_id: request.search_index.clone(),
            recipient: recipient.into(),
            text: text.into(),
            sent_at,
            status: DeliveryStatus::Pending,
            attempts: 0,
            last_error: None,
            request,
        }
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Storage abstraction for the client's local state.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    // -------------------------------------------------------------------------
    // Outbox Operations
    // -------------------------------------------------------------------------

    /// Record a sent message.
    ///
    /// # Arguments
    /// * `record` - The outbox entry to save
    ///
    /// # Returns
    /// * `Ok(true)` if the entry was inserted
    /// * `Ok(false)` if an entry with the same `send_id` already exists (left untouched)
    /// * `Err(StoreError)` if the operation fails
    async fn append_sent_message(&self, record: OutboxRecord) -> Result<bool, StoreError>;

    /// List every sent message, oldest first.
    ///
    /// # Returns
    /// * `Ok(records)` - All outbox entries
    /// * `Err(StoreError)` if the operation fails
    async fn list_sent_messages(&self) -> Result<Vec<OutboxRecord>, StoreError>;

    /// List entries not yet confirmed by the relay (`Pending` or `Failed`), oldest first.
    ///
    /// # Returns
    /// * `Ok(records)` - Undelivered outbox entries
    /// * `Err(StoreError)` if the operation fails
    async fn list_undelivered(&self) -> Result<Vec<OutboxRecord>, StoreError>;

    /// Record the outcome of a publish attempt.
    ///
    /// # Arguments
    /// * `send_id` - The entry to update
    /// * `status` - New delivery status
    /// * `last_error` - Error text of a failed attempt, `None` otherwise
    ///
    /// # Returns
    /// * `Ok(())` on success
    /// * `Err(StoreError::NotFound)` if the entry doesn't exist
    async fn update_delivery_status(
        &self,
        send_id: &str,
        status: DeliveryStatus,
        last_error: Option<String>,
    ) -> Result<(), StoreError>;

    // -------------------------------------------------------------------------
    // Scan Watermark
    // -------------------------------------------------------------------------

    /// Load the scan high-watermark.
    ///
    /// # Returns
    /// * `Ok(Some(ts))` if a previous cycle completed
    /// * `Ok(None)` if no cycle has completed yet
    /// * `Err(StoreError)` if the operation fails
    async fn load_watermark(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Persist the scan high-watermark.
    async fn save_watermark(&self, watermark: DateTime<Utc>) -> Result<(), StoreError>;
}

// ============================================================================
// In-Memory Store Implementation
// ============================================================================

/// In-memory store for tests and ephemeral sessions.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    /// Entries indexed by send_id
    outbox: Arc<RwLock<HashMap<String, OutboxRecord>>>,
    watermark: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_by_time(mut records: Vec<OutboxRecord>) -> Vec<OutboxRecord> {
    records.sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then_with(|| a.send_id.cmp(&b.send_id)));
    records
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn append_sent_message(&self, record: OutboxRecord) -> Result<bool, StoreError> {
        let mut outbox = self.outbox.write().await;
        if outbox.contains_key(&record.send_id) {
            return Ok(false);
        }
        outbox.insert(record.send_id.clone(), record);
        Ok(true)
    }

    async fn list_sent_messages(&self) -> Result<Vec<OutboxRecord>, StoreError> {
        let outbox = self.outbox.read().await;
        Ok(sorted_by_time(outbox.values().cloned().collect()))
    }

    async fn list_undelivered(&self) -> Result<Vec<OutboxRecord>, StoreError> {
        let outbox = self.outbox.read().await;
        Ok(sorted_by_time(
            outbox
                .values()
                .filter(|r| !r.status.is_delivered())
                .cloned()
                .collect(),
        ))
    }

    async fn update_delivery_status(
        &self,
        send_id: &str,
        status: DeliveryStatus,
        last_error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut outbox = self.outbox.write().await;
        let record = outbox
            .get_mut(send_id)
            .ok_or_else(|| StoreError::NotFound(send_id.to_string()))?;
        record.status = status;
        record.last_error = last_error;
        if status != DeliveryStatus::Pending {
            record.attempts += 1;
        }
        Ok(())
    }

    async fn load_watermark(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(*self.watermark.read().await)
    }

    async fn save_watermark(&self, watermark: DateTime<Utc>) -> Result<(), StoreError> {
        *self.watermark.write().await = Some(watermark);
        Ok(())
    }
}
