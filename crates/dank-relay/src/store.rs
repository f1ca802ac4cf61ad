//! SQLite-based append-only message storage

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use thiserror::Error;

use dank_core::wire::{PublishedKey, StoredMessage};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Storage task failed: {0}")]
    Task(String),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// A validated publish, ready to append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    /// Base64 ciphertext as received.
    pub message: String,
    /// Lowercase hex, 12 bytes.
    pub iv: String,
    /// Lowercase hex, 64 bytes (X‖Y).
    pub ephemeral_pubkey: String,
    /// Lowercase hex, 32 bytes.
    pub search_index: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Appended with this server-assigned submit time.
    Stored(DateTime<Utc>),
    /// The same `(search_index, iv)` was already stored; nothing changed.
    Duplicate,
}

/// Append-only relay store
#[async_trait]
pub trait RelayStore: Send + Sync {
    /// Append one message and its ephemeral key under a single submit time.
    async fn insert_message(&self, message: &NewMessage) -> Result<InsertOutcome, StoreError>;

    /// Ephemeral keys with `submit_time > since`, oldest first.
    async fn list_keys(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<PublishedKey>, StoreError>;

    /// All messages stored under `search_index` (lowercase hex), oldest first.
    async fn messages_for(&self, search_index: &str) -> Result<Vec<StoredMessage>, StoreError>;
}

/// SQLite-based relay store
pub struct SqliteRelayStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRelayStore {
    /// Open (or create) the relay database
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory database for tests
    pub async fn new_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS ephemeral_keys (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ephemeral_pubkey TEXT NOT NULL,
                    submit_time INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_keys_submit_time
                ON ephemeral_keys (submit_time);

                CREATE TABLE IF NOT EXISTS messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    search_index TEXT NOT NULL,
                    iv TEXT NOT NULL,
                    message TEXT NOT NULL,
                    submit_time INTEGER NOT NULL,
                    UNIQUE (search_index, iv)
                );

                CREATE INDEX IF NOT EXISTS idx_messages_index
                ON messages (search_index, submit_time);
                "#,
            )?;
            Ok(())
        })
        .await
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| StoreError::Task("connection lock poisoned".to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

/// Next submit time: now, or one millisecond past the newest stored row
/// when the clock has not moved (or went backwards).
fn next_submit_millis(conn: &Connection) -> Result<i64, StoreError> {
    let last = conn.query_row("SELECT MAX(submit_time) FROM messages", [], |row| {
        row.get::<_, Option<i64>>(0)
    })?;
    let now = Utc::now().timestamp_millis();
    Ok(match last {
        Some(last) if last >= now => last + 1,
        _ => now,
    })
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| StoreError::Corrupt(format!("submit_time {}", ms)))
}

#[async_trait]
impl RelayStore for SqliteRelayStore {
    async fn insert_message(&self, message: &NewMessage) -> Result<InsertOutcome, StoreError> {
        let message = message.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let submit_time = next_submit_millis(&tx)?;

            let inserted = tx.execute(
                r#"
                INSERT OR IGNORE INTO messages (search_index, iv, message, submit_time)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![message.search_index, message.iv, message.message, submit_time],
            )?;
            if inserted == 0 {
                return Ok(InsertOutcome::Duplicate);
            }

            tx.execute(
                "INSERT INTO ephemeral_keys (ephemeral_pubkey, submit_time) VALUES (?1, ?2)",
                params![message.ephemeral_pubkey, submit_time],
            )?;
            tx.commit()?;

            Ok(InsertOutcome::Stored(from_millis(submit_time)?))
        })
        .await
    }

    async fn list_keys(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<PublishedKey>, StoreError> {
        let since = since.timestamp_millis();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT ephemeral_pubkey, submit_time FROM ephemeral_keys
                WHERE submit_time > ?1
                ORDER BY submit_time, id
                LIMIT ?2
                "#,
            )?;
            let rows = stmt.query_map(params![since, limit], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;

            let mut keys = Vec::new();
            for row in rows {
                let (ephemeral_pubkey, submit_time) = row?;
                keys.push(PublishedKey::new(ephemeral_pubkey, from_millis(submit_time)?));
            }
            Ok(keys)
        })
        .await
    }

    async fn messages_for(&self, search_index: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let search_index = search_index.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT message, iv, submit_time FROM messages
                WHERE search_index = ?1
                ORDER BY submit_time, id
                "#,
            )?;
            let rows = stmt.query_map(params![search_index], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;

            let mut messages = Vec::new();
            for row in rows {
                let (message, iv, submit_time) = row?;
                messages.push(StoredMessage {
                    message,
                    iv: Some(iv),
                    submit_time: from_millis(submit_time)?,
                });
            }
            Ok(messages)
        })
        .await
    }
}
