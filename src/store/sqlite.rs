//! SQLite-backed store.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::debug;

use super::{MessageId, MessageStore, QueuedMessage, Result, Session, SessionId, StoreError};

type MessageRow = (i64, String, String, i64, bool);

/// Durable [`MessageStore`] on a SQLite database.
///
/// Sessions are unique by token; messages carry a composite
/// `(session_id, processed)` index for the unprocessed lookup.
/// Timestamps are stored as Unix milliseconds.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database file and run migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_millis(5000));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Private in-memory database. Uses a single connection that is never
    /// recycled, since the database lives and dies with it.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mcp_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                last_seen_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS by_session_id ON mcp_sessions(session_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mcp_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                processed INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS by_session ON mcp_messages(session_id, processed)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn to_message((id, session_id, message, created_at, processed): MessageRow) -> Result<QueuedMessage> {
    Ok(QueuedMessage {
        id: MessageId(id),
        session_id: SessionId::from(session_id),
        payload: serde_json::from_str(&message)?,
        created_at: from_millis(created_at),
        processed,
    })
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn create_session(&self, session_id: &SessionId) -> Result<Session> {
        let session = Session::new(session_id.clone());
        let result = sqlx::query(
            "INSERT INTO mcp_sessions (session_id, created_at, last_seen_at) VALUES (?, ?, ?)",
        )
        .bind(session_id.as_str())
        .bind(to_millis(session.created_at))
        .bind(to_millis(session.last_seen_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(%session_id, "session created");
                Ok(session)
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::SessionExists(session_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_session(&self, session_id: &SessionId) -> Result<Option<Session>> {
        let row = sqlx::query_as::<_, (String, i64, i64)>(
            "SELECT session_id, created_at, last_seen_at FROM mcp_sessions WHERE session_id = ?",
        )
        .bind(session_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(session_id, created_at, last_seen_at)| Session {
            session_id: SessionId::from(session_id),
            created_at: from_millis(created_at),
            last_seen_at: from_millis(last_seen_at),
        }))
    }

    async fn insert_message(&self, session_id: &SessionId, payload: Value) -> Result<MessageId> {
        let message = serde_json::to_string(&payload)?;
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM mcp_sessions WHERE session_id = ?")
            .bind(session_id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StoreError::SessionNotFound(session_id.clone()));
        }

        let result = sqlx::query(
            "INSERT INTO mcp_messages (session_id, message, created_at, processed) VALUES (?, ?, ?, 0)",
        )
        .bind(session_id.as_str())
        .bind(message)
        .bind(to_millis(Utc::now()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(MessageId(result.last_insert_rowid()))
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<QueuedMessage>> {
        let row = sqlx::query_as::<_, MessageRow>(
            "SELECT id, session_id, message, created_at, processed FROM mcp_messages WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(to_message).transpose()
    }

    async fn list_unprocessed(&self, session_id: &SessionId) -> Result<Vec<QueuedMessage>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, session_id, message, created_at, processed
            FROM mcp_messages
            WHERE session_id = ? AND processed = 0
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(session_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(to_message).collect()
    }

    async fn mark_processed(&self, ids: &[MessageId]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            let result = sqlx::query("UPDATE mcp_messages SET processed = 1 WHERE id = ?")
                .bind(id.0)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 0 {
                // Dropping the transaction rolls back earlier updates.
                return Err(StoreError::MessageNotFound(*id));
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn purge_processed(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM mcp_messages WHERE processed = 1 AND created_at < ?")
                .bind(to_millis(older_than))
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
