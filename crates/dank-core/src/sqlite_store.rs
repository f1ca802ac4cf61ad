//! SQLite-based persistent storage for the client outbox and scan watermark.
//!
//! The connection is opened synchronously and shared behind an async mutex;
//! every statement is short, so holding the lock across it is fine.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;

use crate::store::{DeliveryStatus, OutboxRecord, OutboxStore, StoreError};
use crate::wire::{format_timestamp, parse_timestamp, PublishMessageRequest};

// ============================================================================
// Schema Version
// ============================================================================

/// Current schema version for migrations.
/// Increment this when adding new migrations.
const SCHEMA_VERSION: i32 = 1;

// ============================================================================
// SQLite Store Implementation
// ============================================================================

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

const OUTBOX_COLUMNS: &str = "send_id, recipient, text, sent_at, status, attempts, last_error, \
     ciphertext, iv, ephemeral_pubkey, search_index";

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    ///
    /// # Arguments
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    /// * `Ok(SqliteStore)` on success
    /// * `Err(StoreError)` if database creation or migration fails
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| {
            StoreError::OperationFailed(format!("failed to open database: {}", e))
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| StoreError::OperationFailed(format!("failed to set pragmas: {}", e)))?;

        Self::run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database, mostly for tests.
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            StoreError::OperationFailed(format!("failed to open in-memory database: {}", e))
        })?;

        Self::run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            [],
        )
        .map_err(|e| StoreError::OperationFailed(format!("failed to create schema_version: {}", e)))?;

        let current_version: i32 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
                row.get(0)
            })
            .map_err(|e| StoreError::OperationFailed(format!("failed to read schema version: {}", e)))?;

        if current_version > SCHEMA_VERSION {
            return Err(StoreError::DataCorruption(format!(
                "database schema v{} is newer than supported v{}",
                current_version, SCHEMA_VERSION
            )));
        }

        if current_version < 1 {
            Self::migrate_v1(conn)?;
        }

        Ok(())
    }

    /// Migration to schema version 1 - initial schema.
    fn migrate_v1(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            -- Locally sent messages with the publish request kept for retry
            CREATE TABLE IF NOT EXISTS outbox (
                send_id TEXT PRIMARY KEY,
                recipient TEXT NOT NULL,
                text TEXT NOT NULL,
                sent_at TEXT NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                ciphertext TEXT NOT NULL,
                iv TEXT NOT NULL,
                ephemeral_pubkey TEXT NOT NULL,
                search_index TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_outbox_status ON outbox(status);
            CREATE INDEX IF NOT EXISTS idx_outbox_sent_at ON outbox(sent_at);

            -- Single-row scan cursor
            CREATE TABLE IF NOT EXISTS scan_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                watermark TEXT NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);
            "#,
        )
        .map_err(|e| StoreError::OperationFailed(format!("migration v1 failed: {}", e)))?;

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Row mapping
    // -------------------------------------------------------------------------

    fn row_to_record(row: &Row<'_>) -> rusqlite::Result<Result<OutboxRecord, StoreError>> {
        let sent_at: String = row.get(3)?;
        let status: String = row.get(4)?;
        let attempts: i64 = row.get(5)?;

        let send_id: String = row.get(0)?;
        let recipient: String = row.get(1)?;
        let text: String = row.get(2)?;
        let last_error: Option<String> = row.get(6)?;
        let request = PublishMessageRequest {
            message: row.get(7)?,
            iv: row.get(8)?,
            ephemeral_pubkey: row.get(9)?,
            search_index: row.get(10)?,
        };

        Ok(Self::decode_record(
            send_id, recipient, text, &sent_at, &status, attempts, last_error, request,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn decode_record(
        send_id: String,
        recipient: String,
        text: String,
        sent_at: &str,
        status: &str,
        attempts: i64,
        last_error: Option<String>,
        request: PublishMessageRequest,
    ) -> Result<OutboxRecord, StoreError> {
        Ok(OutboxRecord {
            send_id,
            recipient,
            text,
            sent_at: parse_timestamp(sent_at)
                .ok_or_else(|| StoreError::DataCorruption(format!("bad sent_at {sent_at:?}")))?,
            status: status.parse()?,
            attempts: u32::try_from(attempts)
                .map_err(|_| StoreError::DataCorruption(format!("bad attempts {attempts}")))?,
            last_error,
            request,
        })
    }

    fn query_records(conn: &Connection, where_clause: &str) -> Result<Vec<OutboxRecord>, StoreError> {
        let sql = format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox {where_clause} ORDER BY sent_at ASC, send_id ASC"
        );
        let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
        let rows = stmt.query_map([], Self::row_to_record).map_err(sql_err)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(sql_err)??);
        }
        Ok(out)
    }
}

fn sql_err(e: rusqlite::Error) -> StoreError {
    StoreError::OperationFailed(e.to_string())
}

// ============================================================================
// Store Trait Implementation
// ============================================================================

#[async_trait]
impl OutboxStore for SqliteStore {
    async fn append_sent_message(&self, record: OutboxRecord) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let inserted = conn
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO outbox ({OUTBOX_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    record.send_id,
                    record.recipient,
                    record.text,
                    format_timestamp(&record.sent_at),
                    record.status.as_str(),
                    record.attempts,
                    record.last_error,
                    record.request.message,
                    record.request.iv,
                    record.request.ephemeral_pubkey,
                    record.request.search_index,
                ],
            )
            .map_err(sql_err)?;
        Ok(inserted == 1)
    }

    async fn list_sent_messages(&self) -> Result<Vec<OutboxRecord>, StoreError> {
        let conn = self.conn.lock().await;
        Self::query_records(&conn, "")
    }

    async fn list_undelivered(&self) -> Result<Vec<OutboxRecord>, StoreError> {
        let conn = self.conn.lock().await;
        Self::query_records(&conn, "WHERE status != 'published'")
    }

    async fn update_delivery_status(
        &self,
        send_id: &str,
        status: DeliveryStatus,
        last_error: Option<String>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let bump: i64 = if status == DeliveryStatus::Pending { 0 } else { 1 };
        let changed = conn
            .execute(
                "UPDATE outbox SET status = ?1, last_error = ?2, attempts = attempts + ?3
                 WHERE send_id = ?4",
                params![status.as_str(), last_error, bump, send_id],
            )
            .map_err(sql_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound(send_id.to_string()));
        }
        Ok(())
    }

    async fn load_watermark(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.conn.lock().await;
        let raw: Option<String> = conn
            .query_row("SELECT watermark FROM scan_state WHERE id = 1", [], |row| row.get(0))
            .optional()
            .map_err(sql_err)?;

        raw.map(|s| {
            parse_timestamp(&s).ok_or_else(|| StoreError::DataCorruption(format!("bad watermark {s:?}")))
        })
        .transpose()
    }

    async fn save_watermark(&self, watermark: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO scan_state (id, watermark) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET watermark = excluded.watermark",
            params![format_timestamp(&watermark)],
        )
        .map_err(sql_err)?;
        Ok(())
    }
}
