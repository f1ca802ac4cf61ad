//! Integration tests for dankchat core flows.
//!
//! These tests drive the full send → publish → scan → merge path over the
//! in-memory relay:
//! - Delivery to the intended recipient and nobody else
//! - Offline sends and later republishing
//! - Idempotent rescans and partial progress on relay failures

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use dank_core::{
    directory::StaticDirectory,
    errors::CoreError,
    harness::MemoryRelay,
    keystore::IdentityFile,
    messenger::{Messenger, RetryPolicy},
    reconcile::{Reconciler, ScanConfig},
    relay::{Relay, RelayError},
    store::{DeliveryStatus, InMemoryStore, OutboxStore},
    timeline::TimelineHandle,
    wire::{PublishMessageRequest, PublishedKey, StoredMessage},
};
use dank_crypto::{generate_identity_keypair, IdentityKeyPair};

/// One user's client: identity, local store and both services.
struct Peer {
    identity: Arc<IdentityKeyPair>,
    store: InMemoryStore,
    messenger: Messenger,
    reconciler: Reconciler,
    timeline: TimelineHandle,
}

impl Peer {
    fn new(relay: Arc<dyn Relay>, directory: StaticDirectory) -> Self {
        Self::with_identity(generate_identity_keypair(), relay, directory)
    }

    fn with_identity(identity: IdentityKeyPair, relay: Arc<dyn Relay>, directory: StaticDirectory) -> Self {
        let identity = Arc::new(identity);
        let store = InMemoryStore::new();
        let directory = Arc::new(directory);
        let (timeline, _task) = TimelineHandle::spawn();

        let messenger = Messenger::new(
            identity.clone(),
            relay.clone(),
            Arc::new(store.clone()),
            directory.clone(),
            RetryPolicy::none(),
        );
        let reconciler = Reconciler::new(
            identity.clone(),
            relay,
            Arc::new(store.clone()),
            directory,
            ScanConfig::default(),
        );
        Self {
            identity,
            store,
            messenger,
            reconciler,
            timeline,
        }
    }

    fn pubkey(&self) -> String {
        self.identity.public_key_hex()
    }
}

/// Test: Alice sends "hello" to Bob; Bob's scan finds it as unread from Alice
#[tokio::test]
async fn integration_alice_to_bob() {
    let relay = Arc::new(MemoryRelay::new());
    let alice = Peer::new(relay.clone(), StaticDirectory::new());
    let bob = Peer::new(relay.clone(), StaticDirectory::new());

    alice.messenger.send(&bob.pubkey(), "hello").await.unwrap();

    let report = bob.reconciler.scan_cycle(&bob.timeline).await.unwrap();
    assert_eq!(report.verified, 1);

    let contacts = bob.timeline.snapshot().await.unwrap();
    assert_eq!(contacts.len(), 1);
    let from_alice = &contacts[0];
    assert_eq!(from_alice.public_key, alice.pubkey());
    assert_eq!(from_alice.messages.len(), 1);
    assert_eq!(from_alice.messages[0].text, "hello");
    assert!(from_alice.messages[0].unread);
    assert!(!from_alice.messages[0].from_me);
}

/// Test: Eve scans the same relay and recovers nothing
#[tokio::test]
async fn integration_eve_sees_nothing() {
    let relay = Arc::new(MemoryRelay::new());
    let alice = Peer::new(relay.clone(), StaticDirectory::new());
    let bob = Peer::new(relay.clone(), StaticDirectory::new());
    let eve = Peer::new(relay.clone(), StaticDirectory::new());

    alice.messenger.send(&bob.pubkey(), "for bob only").await.unwrap();

    let report = eve.reconciler.scan_cycle(&eve.timeline).await.unwrap();
    assert_eq!(report.candidates, 1);
    assert_eq!(report.verified, 0);
    assert!(eve.timeline.snapshot().await.unwrap().is_empty());
}

/// Test: Directory names are used for display and for addressing
#[tokio::test]
async fn integration_names_from_directory() {
    let relay = Arc::new(MemoryRelay::new());
    let alice_identity = generate_identity_keypair();
    let bob_identity = generate_identity_keypair();

    let mut dir = StaticDirectory::new();
    dir.insert("alice", *alice_identity.public_key());
    dir.insert("bob", *bob_identity.public_key());

    let alice = Peer::with_identity(alice_identity, relay.clone(), dir.clone());
    let bob = Peer::with_identity(bob_identity, relay.clone(), dir);

    alice.messenger.send("bob", "hi").await.unwrap();
    bob.reconciler.scan_cycle(&bob.timeline).await.unwrap();

    let contacts = bob.timeline.snapshot().await.unwrap();
    assert_eq!(contacts[0].display_name, "alice");
}

/// Test: A send while the relay is down is kept locally and republished once
#[tokio::test]
async fn integration_offline_send_then_retry() {
    let relay = Arc::new(MemoryRelay::new());
    let alice = Peer::new(relay.clone(), StaticDirectory::new());
    let bob = Peer::new(relay.clone(), StaticDirectory::new());

    relay.set_offline(true);
    let err = alice.messenger.send(&bob.pubkey(), "sent offline").await.unwrap_err();
    assert!(matches!(err, CoreError::Relay(RelayError::Unavailable(_))));

    let outbox = alice.store.list_sent_messages().await.unwrap();
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].status, DeliveryStatus::Failed);

    relay.set_offline(false);
    let retry = alice.messenger.retry_unpublished().await.unwrap();
    assert_eq!(retry.republished, 1);

    // Retrying again is a no-op
    assert_eq!(alice.messenger.retry_unpublished().await.unwrap().republished, 0);

    let outbox = alice.store.list_sent_messages().await.unwrap();
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].status, DeliveryStatus::Published);
    assert_eq!(relay.message_count().await, 1);

    bob.reconciler.scan_cycle(&bob.timeline).await.unwrap();
    let contacts = bob.timeline.snapshot().await.unwrap();
    assert_eq!(contacts[0].messages[0].text, "sent offline");
}

/// Test: Scanning twice over the same data adds nothing the second time
#[tokio::test]
async fn integration_rescan_is_idempotent() {
    let relay = Arc::new(MemoryRelay::new());
    let alice = Peer::new(relay.clone(), StaticDirectory::new());
    let bob = Peer::new(relay.clone(), StaticDirectory::new());

    for text in ["one", "two", "three"] {
        alice.messenger.send(&bob.pubkey(), text).await.unwrap();
    }

    let first = bob.reconciler.scan_cycle(&bob.timeline).await.unwrap();
    assert_eq!(first.new_messages, 3);
    let snapshot = bob.timeline.snapshot().await.unwrap();

    // Reset the watermark so the second cycle sees every key again
    bob.store.save_watermark(DateTime::<Utc>::UNIX_EPOCH).await.unwrap();
    let second = bob.reconciler.scan_cycle(&bob.timeline).await.unwrap();
    assert_eq!(second.verified, 3);
    assert_eq!(second.new_messages, 0);
    assert_eq!(bob.timeline.snapshot().await.unwrap(), snapshot);
}

/// Test: A conversation interleaves sent and received messages in time order
#[tokio::test]
async fn integration_conversation_order() {
    let relay = Arc::new(MemoryRelay::new());
    let alice = Peer::new(relay.clone(), StaticDirectory::new());
    let bob = Peer::new(relay.clone(), StaticDirectory::new());

    alice.messenger.send(&bob.pubkey(), "ping").await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    bob.messenger.send(&alice.pubkey(), "pong").await.unwrap();

    alice.reconciler.scan_cycle(&alice.timeline).await.unwrap();
    let contacts = alice.timeline.snapshot().await.unwrap();
    assert_eq!(contacts.len(), 1);

    let convo = &contacts[0];
    assert_eq!(convo.public_key, bob.pubkey());
    let lines: Vec<(bool, &str)> = convo.messages.iter().map(|m| (m.from_me, m.text.as_str())).collect();
    assert_eq!(lines, [(true, "ping"), (false, "pong")]);
}

/// Test: Without an identity file the client reports that it is not registered
#[tokio::test]
async fn integration_not_registered() {
    let dir = tempfile::tempdir().unwrap();
    let file = IdentityFile::new(dir.path().join("identity.key"));
    assert!(matches!(file.load(), Err(CoreError::NotRegistered)));

    let created = file.create(false).unwrap();
    assert_eq!(file.load().unwrap().public_key(), created.public_key());
}

/// Relay whose `fetch_messages` fails for one index.
struct FlakyRelay {
    inner: MemoryRelay,
    broken_index: [u8; 32],
}

#[async_trait]
impl Relay for FlakyRelay {
    async fn publish(&self, request: &PublishMessageRequest) -> Result<(), RelayError> {
        self.inner.publish(request).await
    }

    async fn list_keys(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<PublishedKey>, RelayError> {
        self.inner.list_keys(since, limit).await
    }

    async fn fetch_messages(&self, search_index: &[u8; 32]) -> Result<Vec<StoredMessage>, RelayError> {
        if *search_index == self.broken_index {
            return Err(RelayError::BadResponse("status=500 body=None".into()));
        }
        self.inner.fetch_messages(search_index).await
    }
}

/// Test: A failed fetch keeps the messages already merged and holds the watermark
#[tokio::test]
async fn integration_partial_progress_on_fetch_failure() {
    let memory = MemoryRelay::new();
    let alice = Peer::new(Arc::new(memory.clone()), StaticDirectory::new());
    let bob_identity = Arc::new(generate_identity_keypair());

    let first = alice.messenger.send(&bob_identity.public_key_hex(), "arrives").await.unwrap();
    let second = alice.messenger.send(&bob_identity.public_key_hex(), "stuck").await.unwrap();
    assert_ne!(first.send_id, second.send_id);

    let mut broken_index = [0u8; 32];
    hex::decode_to_slice(&second.send_id, &mut broken_index).unwrap();
    let flaky: Arc<dyn Relay> = Arc::new(FlakyRelay {
        inner: memory.clone(),
        broken_index,
    });

    let store = InMemoryStore::new();
    let reconciler = Reconciler::new(
        bob_identity,
        flaky,
        Arc::new(store.clone()),
        Arc::new(StaticDirectory::new()),
        ScanConfig::default(),
    );
    let (timeline, _task) = TimelineHandle::spawn();

    let err = reconciler.scan_cycle(&timeline).await.unwrap_err();
    assert!(err.is_relay_failure());
    assert_eq!(store.load_watermark().await.unwrap(), None);

    let contacts = timeline.snapshot().await.unwrap();
    let texts: Vec<_> = contacts[0].messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, ["arrives"]);
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use dank_core::sqlite_store::SqliteStore;

    /// Test: Outbox and watermark survive a restart
    #[tokio::test]
    async fn integration_sqlite_restart() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("client.db");
        let relay = Arc::new(MemoryRelay::new());
        let bob = generate_identity_keypair();
        let alice = Arc::new(generate_identity_keypair());

        {
            let store = Arc::new(SqliteStore::new(&db).unwrap());
            let messenger = Messenger::new(
                alice.clone(),
                relay.clone(),
                store.clone(),
                Arc::new(StaticDirectory::new()),
                RetryPolicy::none(),
            );
            relay.set_offline(true);
            assert!(messenger.send(&bob.public_key_hex(), "later").await.is_err());
            relay.set_offline(false);
        }

        let store = Arc::new(SqliteStore::new(&db).unwrap());
        let messenger = Messenger::new(
            alice,
            relay.clone(),
            store.clone(),
            Arc::new(StaticDirectory::new()),
            RetryPolicy::none(),
        );
        assert_eq!(messenger.retry_unpublished().await.unwrap().republished, 1);
        assert_eq!(store.list_sent_messages().await.unwrap().len(), 1);
        assert_eq!(relay.message_count().await, 1);
    }
}
