//! Send pipeline.
//!
//! The outbox entry is written before anything goes to the relay, so a
//! message is never published without a local copy. Publish failures are
//! recorded on the entry and returned to the caller; [`Messenger::retry_unpublished`]
//! republishes the stored request of every undelivered entry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use dank_crypto::{generate_ephemeral_keypair, pack_outgoing, parse_public_key, IdentityKeyPair, KeyError, PublicKey};

use crate::contacts::MergeOp;
use crate::directory::{display_name_for, NameDirectory};
use crate::errors::CoreError;
use crate::relay::{Relay, RelayError};
use crate::store::{DeliveryStatus, OutboxRecord, OutboxStore};
use crate::timeline::TimelineHandle;
use crate::wire::{truncate_millis, PublishMessageRequest};

/// Exponential backoff for relay calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// No retries: one attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based), capped at `max_backoff`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt.min(64) as i32);
        Duration::from_secs_f64(secs.min(self.max_backoff.as_secs_f64()).max(0.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub send_id: String,
    pub recipient: String,
    pub status: DeliveryStatus,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetryReport {
    pub republished: usize,
    /// `(send_id, error)` for entries that are still undelivered.
    pub failed: Vec<(String, String)>,
}

pub struct Messenger {
    identity: Arc<IdentityKeyPair>,
    relay: Arc<dyn Relay>,
    store: Arc<dyn OutboxStore>,
    directory: Arc<dyn NameDirectory>,
    timeline: Option<TimelineHandle>,
    retry: RetryPolicy,
}

impl Messenger {
    pub fn new(
        identity: Arc<IdentityKeyPair>,
        relay: Arc<dyn Relay>,
        store: Arc<dyn OutboxStore>,
        directory: Arc<dyn NameDirectory>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            identity,
            relay,
            store,
            directory,
            timeline: None,
            retry,
        }
    }

    /// Also merge sent messages into `timeline` right away.
    pub fn with_timeline(mut self, timeline: TimelineHandle) -> Self {
        self.timeline = Some(timeline);
        self
    }

    /// Accepts a public key in hex or a directory name.
    pub async fn resolve_recipient(&self, recipient: &str) -> Result<PublicKey, CoreError> {
        match parse_public_key(recipient) {
            Ok(pk) => return Ok(pk),
            // A well-formed but off-curve key is never a name
            Err(KeyError::InvalidPoint) => return Err(CoreError::Key(KeyError::InvalidPoint)),
            Err(_) => {}
        }
        self.directory
            .resolve_name(recipient)
            .await?
            .ok_or_else(|| CoreError::UnknownRecipient(recipient.to_string()))
    }

    /// Encrypt `text` for `recipient`, record it, then publish.
    ///
    /// On a publish failure the entry stays in the outbox as `Failed` and the
    /// relay error is returned.
    pub async fn send(&self, recipient: &str, text: &str) -> Result<SendReceipt, CoreError> {
        let recipient_key = self.resolve_recipient(recipient).await?;
        let envelope = pack_outgoing(text, &self.identity, generate_ephemeral_keypair(), &recipient_key)?;
        let request = PublishMessageRequest::from(&envelope);

        let record = OutboxRecord::pending(
            dank_crypto::public_key_hex(&recipient_key),
            text,
            truncate_millis(Utc::now()),
            request,
        );
        let send_id = record.send_id.clone();
        let recipient_hex = record.recipient.clone();
        let (request, sent_at) = (record.request.clone(), record.sent_at);

        self.store.append_sent_message(record).await?;
        debug!(send_id = %send_id, "outbox entry recorded");

        if let Some(timeline) = &self.timeline {
            let display_name = display_name_for(self.directory.as_ref(), &recipient_key).await;
            timeline
                .merge(MergeOp::Outbox {
                    recipient: recipient_hex.clone(),
                    display_name,
                    text: text.to_string(),
                    time: sent_at,
                })
                .await?;
        }

        self.publish_and_record(&send_id, &request).await?;
        info!(send_id = %send_id, "message published");

        Ok(SendReceipt {
            send_id,
            recipient: recipient_hex,
            status: DeliveryStatus::Published,
        })
    }

    /// Republish every `Pending` or `Failed` outbox entry.
    ///
    /// Uses the stored request, so the relay sees the same envelope and no
    /// new outbox entry is created.
    pub async fn retry_unpublished(&self) -> Result<RetryReport, CoreError> {
        let mut report = RetryReport::default();
        for record in self.store.list_undelivered().await? {
            match self.publish_and_record(&record.send_id, &record.request).await {
                Ok(()) => report.republished += 1,
                Err(CoreError::Relay(e)) => report.failed.push((record.send_id, e.to_string())),
                Err(e) => return Err(e),
            }
        }
        if !report.failed.is_empty() {
            warn!(failed = report.failed.len(), "some messages are still undelivered");
        }
        Ok(report)
    }

    async fn publish_and_record(&self, send_id: &str, request: &PublishMessageRequest) -> Result<(), CoreError> {
        match self.publish_with_retry(request).await {
            Ok(()) => {
                self.store
                    .update_delivery_status(send_id, DeliveryStatus::Published, None)
                    .await?;
                Ok(())
            }
            Err(e) => {
                warn!(send_id = %send_id, error = %e, "publish failed");
                self.store
                    .update_delivery_status(send_id, DeliveryStatus::Failed, Some(e.to_string()))
                    .await?;
                Err(CoreError::Relay(e))
            }
        }
    }

    async fn publish_with_retry(&self, request: &PublishMessageRequest) -> Result<(), RelayError> {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.relay.publish(request).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    let delay = self.retry.backoff_delay(attempt);
                    debug!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %e, "publish failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
