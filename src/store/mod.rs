//! Session table and inbound message queue.
//!
//! The relay never talks to a database directly. Everything goes through the
//! [`MessageStore`] trait so the queue can live in memory, in SQLite, or in
//! any other store that can look up unprocessed messages by session and patch
//! single rows.

mod memory;
mod model;
#[cfg(feature = "sqlite")]
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Notify;

pub use memory::InMemoryStore;
pub use model::{MessageId, QueuedMessage, Session, SessionId};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Errors returned by store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Session {0} not found")]
    SessionNotFound(SessionId),

    #[error("Session {0} already exists")]
    SessionExists(SessionId),

    #[error("Message {0} not found")]
    MessageNotFound(MessageId),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable session table plus per-session inbound queue.
///
/// Each call is atomic on its own; no operation spans sessions and no
/// cross-call transactions are required.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert a new session row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SessionExists`] if the token is already taken.
    async fn create_session(&self, session_id: &SessionId) -> Result<Session>;

    async fn get_session(&self, session_id: &SessionId) -> Result<Option<Session>>;

    /// Queue a message for a session.
    ///
    /// The session must exist at insert time; otherwise
    /// [`StoreError::SessionNotFound`] is returned and nothing is written.
    async fn insert_message(&self, session_id: &SessionId, payload: Value) -> Result<MessageId>;

    async fn get_message(&self, id: MessageId) -> Result<Option<QueuedMessage>>;

    /// Unprocessed messages of one session, ordered by `created_at` and then
    /// by insertion order.
    async fn list_unprocessed(&self, session_id: &SessionId) -> Result<Vec<QueuedMessage>>;

    /// Flip `processed` to `true` for every id in one call.
    async fn mark_processed(&self, ids: &[MessageId]) -> Result<()>;

    /// Delete processed messages created before `older_than`.
    ///
    /// Returns the number of rows removed. Unprocessed rows are never purged.
    async fn purge_processed(&self, older_than: DateTime<Utc>) -> Result<u64>;

    /// Wake-up handle signalled whenever a message is queued for the session.
    ///
    /// Stores without change notifications return `None` and consumers fall
    /// back to interval polling.
    fn watch(&self, _session_id: &SessionId) -> Option<Arc<Notify>> {
        None
    }

    /// Release the handle returned by [`watch`](Self::watch) once the
    /// session's consumer has stopped.
    fn unwatch(&self, _session_id: &SessionId) {}
}
