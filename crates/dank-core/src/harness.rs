//! In-process relay for tests and demos.
//!
//! `MemoryRelay` follows the same contract as the HTTP relay: append-only,
//! server-assigned submit times that strictly increase, idempotent on
//! `(search_index, iv)`. It can be switched offline to exercise failure paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::RwLock;

use crate::relay::{Relay, RelayError};
use crate::wire::{truncate_millis, PublishMessageRequest, PublishedKey, StoredMessage};

#[derive(Default)]
struct Inner {
    keys: Vec<PublishedKey>,
    messages: HashMap<String, Vec<StoredMessage>>,
    last_time: Option<DateTime<Utc>>,
}

impl Inner {
    fn next_submit_time(&mut self) -> DateTime<Utc> {
        let now = truncate_millis(Utc::now());
        let ts = match self.last_time {
            Some(last) if now <= last => last + TimeDelta::milliseconds(1),
            _ => now,
        };
        self.last_time = Some(ts);
        ts
    }
}

#[derive(Clone, Default)]
pub struct MemoryRelay {
    inner: Arc<RwLock<Inner>>,
    offline: Arc<AtomicBool>,
    publish_calls: Arc<AtomicUsize>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with [`RelayError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of publish attempts, including failed ones.
    pub fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    pub async fn key_count(&self) -> usize {
        self.inner.read().await.keys.len()
    }

    pub async fn message_count(&self) -> usize {
        self.inner.read().await.messages.values().map(Vec::len).sum()
    }

    /// Append a key without any message, e.g. garbage from another client.
    pub async fn inject_key(&self, ephemeral_pubkey: impl Into<String>) {
        let mut inner = self.inner.write().await;
        let submit_time = inner.next_submit_time();
        inner.keys.push(PublishedKey::new(ephemeral_pubkey, submit_time));
    }

    /// Append a raw stored message under an index, bypassing validation.
    pub async fn inject_message(&self, search_index_hex: &str, message: String, iv: Option<String>) {
        let mut inner = self.inner.write().await;
        let submit_time = inner.next_submit_time();
        inner
            .messages
            .entry(search_index_hex.to_string())
            .or_default()
            .push(StoredMessage {
                message,
                iv,
                submit_time,
            });
    }

    fn check_online(&self) -> Result<(), RelayError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RelayError::Unavailable("memory relay is offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Relay for MemoryRelay {
    async fn publish(&self, request: &PublishMessageRequest) -> Result<(), RelayError> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let mut inner = self.inner.write().await;
        let duplicate = inner
            .messages
            .get(&request.search_index)
            .is_some_and(|msgs| msgs.iter().any(|m| m.iv.as_deref() == Some(request.iv.as_str())));
        if duplicate {
            return Ok(());
        }

        let submit_time = inner.next_submit_time();
        inner
            .keys
            .push(PublishedKey::new(request.ephemeral_pubkey.clone(), submit_time));
        inner
            .messages
            .entry(request.search_index.clone())
            .or_default()
            .push(StoredMessage {
                message: request.message.clone(),
                iv: Some(request.iv.clone()),
                submit_time,
            });
        Ok(())
    }

    async fn list_keys(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<PublishedKey>, RelayError> {
        self.check_online()?;
        let inner = self.inner.read().await;
        Ok(inner
            .keys
            .iter()
            .filter(|k| k.submit_time.is_some_and(|t| t > since))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn fetch_messages(&self, search_index: &[u8; 32]) -> Result<Vec<StoredMessage>, RelayError> {
        self.check_online()?;
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .get(&hex::encode(search_index))
            .cloned()
            .unwrap_or_default())
    }
}
