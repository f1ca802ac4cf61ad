//! Reconciliation engine: find, decrypt and merge messages addressed to us.
//!
//! A scan cycle lists every ephemeral key published since the watermark and
//! treats each one as a candidate: derive the ECDH secret with our identity
//! key, look up ciphertexts under the resulting blind index, and try to open
//! them. Almost every candidate belongs to someone else; those fail at point
//! validation, find no ciphertexts, or fail the GCM tag check, and are
//! skipped quietly.
//!
//! Verified messages are merged into the timeline as soon as they are found,
//! so progress made before a transport failure is kept. The watermark only
//! moves after a cycle in which every relay call succeeded.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures_util::stream::{self, StreamExt};
use tracing::{debug, info, trace, warn};

use dank_crypto::ecdh::derive_shared_secret_hex;
use dank_crypto::{open_incoming, IdentityKeyPair};

use crate::contacts::MergeOp;
use crate::directory::{display_name_for, truncate_address, NameDirectory};
use crate::errors::CoreError;
use crate::relay::Relay;
use crate::store::OutboxStore;
use crate::timeline::{TimelineEvent, TimelineHandle};
use crate::wire::PublishedKey;

/// Tunables for a scan cycle.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Candidates processed in parallel.
    pub concurrency: usize,
    /// Page size for key listing.
    pub keys_limit: usize,
    /// How far behind the cycle start the watermark is set, to absorb clock
    /// skew between client and relay and late relay writes.
    pub rescan_overlap: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            keys_limit: 1000,
            rescan_overlap: Duration::from_secs(60),
        }
    }
}

/// Outcome of one scan cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Another cycle was already running; nothing was done.
    pub skipped: bool,
    /// Ephemeral keys examined.
    pub candidates: usize,
    /// Pages requested from the relay.
    pub pages: usize,
    /// Candidates whose key was not a valid curve point.
    pub invalid_keys: usize,
    /// Ciphertexts fetched under our derived indices.
    pub ciphertexts: usize,
    /// Ciphertexts that decrypted and verified.
    pub verified: usize,
    /// Ciphertexts rejected (tag, signature or payload failure, missing IV).
    pub rejected: usize,
    /// Messages that were new to the timeline, inbound and outbox combined.
    pub new_messages: usize,
    /// Watermark stored at the end of the cycle.
    pub watermark: Option<DateTime<Utc>>,
    /// Inbound messages this cycle added to the timeline, oldest first.
    pub inbound: Vec<TimelineEvent>,
}

#[derive(Debug, Default)]
struct CandidateStats {
    invalid_key: bool,
    ciphertexts: usize,
    verified: usize,
    rejected: usize,
    new_messages: usize,
    inbound: Vec<TimelineEvent>,
}

pub struct Reconciler {
    identity: Arc<IdentityKeyPair>,
    relay: Arc<dyn Relay>,
    store: Arc<dyn OutboxStore>,
    directory: Arc<dyn NameDirectory>,
    config: ScanConfig,
    running: AtomicBool,
}

/// Clears the running flag however the cycle ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Reconciler {
    pub fn new(
        identity: Arc<IdentityKeyPair>,
        relay: Arc<dyn Relay>,
        store: Arc<dyn OutboxStore>,
        directory: Arc<dyn NameDirectory>,
        config: ScanConfig,
    ) -> Self {
        Self {
            identity,
            relay,
            store,
            directory,
            config,
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Run one full cycle against `timeline`.
    ///
    /// Returns a `skipped` report if a cycle is already in flight. A relay or
    /// store failure is returned as an error after whatever was verified so
    /// far has been merged; the watermark is left where it was.
    pub async fn scan_cycle(&self, timeline: &TimelineHandle) -> Result<ScanReport, CoreError> {
        self.run_cycle(timeline, false).await
    }

    /// Like [`Reconciler::scan_cycle`], but lists every key from the epoch
    /// regardless of the stored watermark. A fresh process starts with an
    /// empty timeline and uses this to rebuild its conversations.
    pub async fn full_rescan(&self, timeline: &TimelineHandle) -> Result<ScanReport, CoreError> {
        self.run_cycle(timeline, true).await
    }

    async fn run_cycle(&self, timeline: &TimelineHandle, from_epoch: bool) -> Result<ScanReport, CoreError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!("scan cycle already running, skipping");
            return Ok(ScanReport {
                skipped: true,
                ..ScanReport::default()
            });
        }
        let _guard = RunningGuard(&self.running);

        let cycle_start = Utc::now();
        let previous = self.store.load_watermark().await?;
        let since = match previous {
            Some(watermark) if !from_epoch => watermark,
            _ => DateTime::<Utc>::UNIX_EPOCH,
        };

        let mut report = ScanReport::default();
        let keys = self.list_all_keys(since, &mut report).await?;
        report.candidates = keys.len();

        let results: Vec<Result<CandidateStats, CoreError>> = stream::iter(keys)
            .map(|key| self.scan_candidate(key, timeline))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut first_error = None;
        for result in results {
            match result {
                Ok(stats) => {
                    report.invalid_keys += usize::from(stats.invalid_key);
                    report.ciphertexts += stats.ciphertexts;
                    report.verified += stats.verified;
                    report.rejected += stats.rejected;
                    report.new_messages += stats.new_messages;
                    report.inbound.extend(stats.inbound);
                }
                Err(e) => {
                    warn!(error = %e, "candidate scan failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        report
            .inbound
            .sort_by(|a, b| a.message.time.cmp(&b.message.time).then_with(|| a.contact.cmp(&b.contact)));
        report.new_messages += self.merge_outbox(timeline).await?;

        if let Some(e) = first_error {
            return Err(e);
        }

        let overlap = TimeDelta::from_std(self.config.rescan_overlap).unwrap_or(TimeDelta::zero());
        let mut watermark = cycle_start - overlap;
        if let Some(prev) = previous {
            watermark = watermark.max(prev);
        }
        self.store.save_watermark(watermark).await?;
        report.watermark = Some(watermark);

        info!(
            candidates = report.candidates,
            verified = report.verified,
            new = report.new_messages,
            "scan cycle complete"
        );
        Ok(report)
    }

    /// Page through `GET /keys` until a short page, or a page without
    /// submit times to continue from.
    async fn list_all_keys(
        &self,
        since: DateTime<Utc>,
        report: &mut ScanReport,
    ) -> Result<Vec<PublishedKey>, CoreError> {
        let limit = self.config.keys_limit.max(1);
        let mut cursor = since;
        let mut seen = HashSet::new();
        let mut keys = Vec::new();

        loop {
            let page = self.relay.list_keys(cursor, limit).await?;
            report.pages += 1;
            let full = page.len() >= limit;

            let Some(last) = page.last().map(|k| k.submit_time) else {
                break;
            };
            for key in page {
                if seen.insert(key.ephemeral_pubkey.clone()) {
                    keys.push(key);
                }
            }
            if !full {
                break;
            }
            let Some(last) = last else {
                debug!("key listing carries no submit times, treating it as complete");
                break;
            };
            if last <= cursor {
                warn!(cursor = %cursor, "relay returned a full page without advancing, stopping");
                break;
            }
            cursor = last;
        }

        debug!(since = %since, keys = keys.len(), pages = report.pages, "listed candidate keys");
        Ok(keys)
    }

    async fn scan_candidate(&self, key: PublishedKey, timeline: &TimelineHandle) -> Result<CandidateStats, CoreError> {
        let mut stats = CandidateStats::default();

        let secret = match derive_shared_secret_hex(self.identity.secret_key(), &key.ephemeral_pubkey) {
            Ok(secret) => secret,
            Err(e) => {
                trace!(key = %key.ephemeral_pubkey, error = %e, "skipping candidate");
                stats.invalid_key = true;
                return Ok(stats);
            }
        };

        let index = secret.search_index();
        let stored = self.relay.fetch_messages(&index).await?;
        if stored.is_empty() {
            return Ok(stats);
        }
        debug!(index = %hex::encode(index), count = stored.len(), "ciphertexts under derived index");

        let mut seen_ivs = HashSet::new();
        for entry in stored {
            stats.ciphertexts += 1;

            let Some(iv_hex) = entry.iv.as_deref() else {
                trace!("stored message has no iv, skipping");
                stats.rejected += 1;
                continue;
            };
            if !seen_ivs.insert(iv_hex.to_string()) {
                continue;
            }
            let (ciphertext, iv) = match (entry.ciphertext(), entry.iv_bytes()) {
                (Ok(ct), Ok(Some(iv))) => (ct, iv),
                _ => {
                    trace!("undecodable stored message, skipping");
                    stats.rejected += 1;
                    continue;
                }
            };

            let opened = match open_incoming(&ciphertext, &iv, &secret) {
                Ok(opened) => opened,
                Err(e) if e.is_not_for_us() => {
                    trace!(error = %e, "ciphertext rejected");
                    stats.rejected += 1;
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "unexpected failure opening ciphertext");
                    stats.rejected += 1;
                    continue;
                }
            };
            stats.verified += 1;

            let display_name = display_name_for(self.directory.as_ref(), &opened.sender).await;
            let event = timeline
                .merge_event(MergeOp::Inbound {
                    sender: opened.sender_hex(),
                    display_name,
                    text: opened.message,
                    time: entry.submit_time,
                })
                .await?;
            if let Some(event) = event {
                stats.new_messages += 1;
                stats.inbound.push(event);
            }
        }

        Ok(stats)
    }

    /// Fold every locally sent message into the timeline.
    async fn merge_outbox(&self, timeline: &TimelineHandle) -> Result<usize, CoreError> {
        let mut added = 0;
        for record in self.store.list_sent_messages().await? {
            let display_name = match dank_crypto::parse_public_key(&record.recipient) {
                Ok(pk) => display_name_for(self.directory.as_ref(), &pk).await,
                Err(_) => truncate_address(&record.recipient),
            };
            let op = MergeOp::Outbox {
                recipient: record.recipient,
                display_name,
                text: record.text,
                time: record.sent_at,
            };
            if timeline.merge(op).await? {
                added += 1;
            }
        }
        Ok(added)
    }
}
