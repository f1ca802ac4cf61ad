//! Single-writer actor owning the [`ContactBook`].
//!
//! Scanning, sending and the UI all talk to the book through a
//! [`TimelineHandle`]; commands are applied strictly in arrival order by one
//! task, so there is no shared mutable state and no lock.

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::contacts::{Contact, ContactBook, Message, MergeOp};
use crate::errors::CoreError;

const COMMAND_BUFFER: usize = 256;
const EVENT_BUFFER: usize = 256;

/// Emitted whenever a merge adds a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEvent {
    pub contact: String,
    pub display_name: String,
    pub message: Message,
}

enum Command {
    Merge {
        op: MergeOp,
        reply: oneshot::Sender<Option<TimelineEvent>>,
    },
    MarkRead {
        contact: String,
        reply: oneshot::Sender<usize>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<Contact>>,
    },
}

#[derive(Clone)]
pub struct TimelineHandle {
    tx: mpsc::Sender<Command>,
    events: broadcast::Sender<TimelineEvent>,
}

impl TimelineHandle {
    /// Start the actor with an empty book.
    ///
    /// The task ends once every handle is dropped and yields the final book.
    pub fn spawn() -> (Self, JoinHandle<ContactBook>) {
        Self::spawn_with(ContactBook::new())
    }

    pub fn spawn_with(book: ContactBook) -> (Self, JoinHandle<ContactBook>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let task = tokio::spawn(run(book, rx, events.clone()));
        (Self { tx, events }, task)
    }

    /// Apply a merge. Returns `true` if a message was added.
    pub async fn merge(&self, op: MergeOp) -> Result<bool, CoreError> {
        Ok(self.merge_event(op).await?.is_some())
    }

    /// Apply a merge and return the event for the added message, if any.
    ///
    /// Unlike [`TimelineHandle::subscribe`], this cannot lag.
    pub async fn merge_event(&self, op: MergeOp) -> Result<Option<TimelineEvent>, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Merge { op, reply }).await?;
        rx.await.map_err(|_| CoreError::TimelineClosed)
    }

    pub async fn mark_read(&self, contact: impl Into<String>) -> Result<usize, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::MarkRead {
            contact: contact.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| CoreError::TimelineClosed)
    }

    /// Copy of every contact, most recently active first.
    pub async fn snapshot(&self) -> Result<Vec<Contact>, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| CoreError::TimelineClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimelineEvent> {
        self.events.subscribe()
    }

    async fn send(&self, cmd: Command) -> Result<(), CoreError> {
        self.tx.send(cmd).await.map_err(|_| CoreError::TimelineClosed)
    }
}

async fn run(
    mut book: ContactBook,
    mut rx: mpsc::Receiver<Command>,
    events: broadcast::Sender<TimelineEvent>,
) -> ContactBook {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Merge { op, reply } => {
                let contact = op.contact().to_string();
                let time = op.time();
                let added = book.apply(op);
                let event = if added {
                    book.contact(&contact).and_then(|c| {
                        c.messages.iter().find(|m| m.time == time).map(|message| TimelineEvent {
                            contact: contact.clone(),
                            display_name: c.display_name.clone(),
                            message: message.clone(),
                        })
                    })
                } else {
                    None
                };
                if let Some(event) = &event {
                    // No subscribers is fine
                    let _ = events.send(event.clone());
                }
                let _ = reply.send(event);
            }
            Command::MarkRead { contact, reply } => {
                let _ = reply.send(book.mark_read(&contact));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(book.contacts());
            }
        }
    }
    debug!(contacts = book.len(), "timeline actor stopped");
    book
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn inbound(sender: &str, secs: i64) -> MergeOp {
        MergeOp::Inbound {
            sender: sender.into(),
            display_name: sender.into(),
            text: format!("msg {secs}"),
            time: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_merge_event_returns_added_message() {
        let (timeline, _task) = TimelineHandle::spawn();
        let event = timeline.merge_event(inbound("alice", 3)).await.unwrap().unwrap();
        assert_eq!(event.contact, "alice");
        assert_eq!(event.message.text, "msg 3");
        assert!(event.message.unread);
        assert_eq!(timeline.merge_event(inbound("alice", 3)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_merge_and_snapshot() {
        let (timeline, _task) = TimelineHandle::spawn();
        assert!(timeline.merge(inbound("alice", 1)).await.unwrap());
        assert!(!timeline.merge(inbound("alice", 1)).await.unwrap());

        let snap = timeline.snapshot().await.unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].messages.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_merges_are_serialized() {
        let (timeline, task) = TimelineHandle::spawn();

        let mut joins = Vec::new();
        for i in 0..50 {
            let t = timeline.clone();
            // Every message is merged twice from different tasks
            joins.push(tokio::spawn(async move { t.merge(inbound("alice", i % 25)).await }));
        }
        let mut added = 0;
        for j in joins {
            if j.await.unwrap().unwrap() {
                added += 1;
            }
        }
        assert_eq!(added, 25);

        drop(timeline);
        let book = task.await.unwrap();
        assert_eq!(book.contact("alice").unwrap().messages.len(), 25);
    }

    #[tokio::test]
    async fn test_events_only_for_new_messages() {
        let (timeline, _task) = TimelineHandle::spawn();
        let mut events = timeline.subscribe();

        timeline.merge(inbound("alice", 7)).await.unwrap();
        timeline.merge(inbound("alice", 7)).await.unwrap();
        timeline.merge(inbound("bob", 8)).await.unwrap();

        let first = events.recv().await.unwrap();
        assert_eq!(first.contact, "alice");
        assert_eq!(first.message.text, "msg 7");
        let second = events.recv().await.unwrap();
        assert_eq!(second.contact, "bob");
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mark_read_through_handle() {
        let (timeline, _task) = TimelineHandle::spawn();
        timeline.merge(inbound("alice", 1)).await.unwrap();
        timeline.merge(inbound("alice", 2)).await.unwrap();

        assert_eq!(timeline.mark_read("alice").await.unwrap(), 2);
        let snap = timeline.snapshot().await.unwrap();
        assert_eq!(snap[0].unread_count(), 0);
    }
}
