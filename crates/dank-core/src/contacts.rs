//! Per-contact message timelines.
//!
//! `ContactBook` is a pure reducer: it folds [`MergeOp`]s one at a time and
//! holds two invariants for every contact: no two messages share a
//! timestamp, and messages are ordered by time ascending.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub from_me: bool,
    pub text: String,
    pub time: DateTime<Utc>,
    pub unread: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contact {
    /// Counterparty identity public key (128 hex chars).
    pub public_key: String,
    pub display_name: String,
    pub messages: Vec<Message>,
}

impl Contact {
    fn new(public_key: String, display_name: String) -> Self {
        Self {
            public_key,
            display_name,
            messages: Vec::new(),
        }
    }

    pub fn unread_count(&self) -> usize {
        self.messages.iter().filter(|m| m.unread).count()
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.messages.last().map(|m| m.time)
    }
}

/// One unit of work for the reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOp {
    /// A decrypted, signature-verified message from `sender`.
    Inbound {
        sender: String,
        display_name: String,
        text: String,
        time: DateTime<Utc>,
    },
    /// A locally sent message to `recipient`.
    Outbox {
        recipient: String,
        display_name: String,
        text: String,
        time: DateTime<Utc>,
    },
}

impl MergeOp {
    pub fn contact(&self) -> &str {
        match self {
            MergeOp::Inbound { sender, .. } => sender,
            MergeOp::Outbox { recipient, .. } => recipient,
        }
    }

    pub fn time(&self) -> DateTime<Utc> {
        match self {
            MergeOp::Inbound { time, .. } | MergeOp::Outbox { time, .. } => *time,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ContactBook {
    contacts: HashMap<String, Contact>,
}

impl ContactBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one operation in. Returns `false` if the contact already had a
    /// message at that timestamp, in which case nothing changes.
    pub fn apply(&mut self, op: MergeOp) -> bool {
        let (key, display_name, message, authoritative_name) = match op {
            MergeOp::Inbound {
                sender,
                display_name,
                text,
                time,
            } => (
                sender,
                display_name,
                Message {
                    from_me: false,
                    text,
                    time,
                    unread: true,
                },
                true,
            ),
            MergeOp::Outbox {
                recipient,
                display_name,
                text,
                time,
            } => (
                recipient,
                display_name,
                Message {
                    from_me: true,
                    text,
                    time,
                    unread: false,
                },
                false,
            ),
        };

        let contact = self
            .contacts
            .entry(key.clone())
            .or_insert_with(|| Contact::new(key, display_name.clone()));
        // Names from verified inbound lookups are fresher than the sender's own guess
        if authoritative_name {
            contact.display_name = display_name;
        }

        let pos = contact.messages.partition_point(|m| m.time < message.time);
        if contact.messages.get(pos).is_some_and(|m| m.time == message.time) {
            return false;
        }
        contact.messages.insert(pos, message);
        true
    }

    /// Clear the unread flag on every message from `contact`. Returns how many
    /// were cleared.
    pub fn mark_read(&mut self, contact: &str) -> usize {
        let Some(c) = self.contacts.get_mut(contact) else {
            return 0;
        };
        let mut cleared = 0;
        for m in c.messages.iter_mut().filter(|m| m.unread) {
            m.unread = false;
            cleared += 1;
        }
        cleared
    }

    pub fn contact(&self, public_key: &str) -> Option<&Contact> {
        self.contacts.get(public_key)
    }

    /// All contacts, most recently active first.
    pub fn contacts(&self) -> Vec<Contact> {
        let mut all: Vec<Contact> = self.contacts.values().cloned().collect();
        all.sort_by(|a, b| {
            b.last_activity()
                .cmp(&a.last_activity())
                .then_with(|| a.public_key.cmp(&b.public_key))
        });
        all
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn unread_total(&self) -> usize {
        self.contacts.values().map(Contact::unread_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn inbound(sender: &str, text: &str, secs: i64) -> MergeOp {
        MergeOp::Inbound {
            sender: sender.into(),
            display_name: format!("{sender}-name"),
            text: text.into(),
            time: ts(secs),
        }
    }

    fn outbox(recipient: &str, text: &str, secs: i64) -> MergeOp {
        MergeOp::Outbox {
            recipient: recipient.into(),
            display_name: "guess".into(),
            text: text.into(),
            time: ts(secs),
        }
    }

    #[test]
    fn test_inbound_creates_unread_contact() {
        let mut book = ContactBook::new();
        assert!(book.apply(inbound("alice", "hello", 1)));

        let c = book.contact("alice").unwrap();
        assert_eq!(c.display_name, "alice-name");
        assert_eq!(c.messages.len(), 1);
        assert!(c.messages[0].unread);
        assert!(!c.messages[0].from_me);
    }

    #[test]
    fn test_same_timestamp_deduplicated() {
        let mut book = ContactBook::new();
        assert!(book.apply(inbound("alice", "hello", 1)));
        assert!(!book.apply(inbound("alice", "hello", 1)));
        // Same time from a different contact is a different key
        assert!(book.apply(inbound("bob", "hello", 1)));

        assert_eq!(book.contact("alice").unwrap().messages.len(), 1);
    }

    #[test]
    fn test_messages_sorted_and_interleaved() {
        let mut book = ContactBook::new();
        book.apply(inbound("alice", "third", 30));
        book.apply(outbox("alice", "first", 10));
        book.apply(inbound("alice", "second", 20));

        let texts: Vec<_> = book
            .contact("alice")
            .unwrap()
            .messages
            .iter()
            .map(|m| m.text.as_str())
            .collect();
        assert_eq!(texts, ["first", "second", "third"]);
    }

    #[test]
    fn test_outbox_name_does_not_override_inbound() {
        let mut book = ContactBook::new();
        book.apply(inbound("alice", "hi", 1));
        book.apply(outbox("alice", "yo", 2));
        assert_eq!(book.contact("alice").unwrap().display_name, "alice-name");
    }

    #[test]
    fn test_mark_read() {
        let mut book = ContactBook::new();
        book.apply(inbound("alice", "a", 1));
        book.apply(inbound("alice", "b", 2));
        book.apply(outbox("alice", "c", 3));
        assert_eq!(book.unread_total(), 2);

        assert_eq!(book.mark_read("alice"), 2);
        assert_eq!(book.mark_read("alice"), 0);
        assert_eq!(book.mark_read("nobody"), 0);
        assert_eq!(book.unread_total(), 0);
    }

    #[test]
    fn test_contacts_most_recent_first() {
        let mut book = ContactBook::new();
        book.apply(inbound("alice", "a", 5));
        book.apply(inbound("bob", "b", 9));
        let order: Vec<_> = book.contacts().into_iter().map(|c| c.public_key).collect();
        assert_eq!(order, ["bob", "alice"]);
    }

    proptest! {
        #[test]
        fn test_merge_twice_is_idempotent(times in proptest::collection::vec(0i64..50, 0..40)) {
            let ops: Vec<_> = times.iter().map(|t| inbound("alice", "m", *t)).collect();

            let mut book = ContactBook::new();
            for op in ops.iter().cloned() {
                book.apply(op);
            }
            let once = book.contacts();
            for op in ops {
                prop_assert!(!book.apply(op));
            }
            prop_assert_eq!(book.contacts(), once);

            if let Some(c) = book.contact("alice") {
                prop_assert!(c.messages.windows(2).all(|w| w[0].time < w[1].time));
            }
        }
    }
}
