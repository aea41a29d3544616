//! Records persisted by a [`MessageStore`](super::MessageStore).

use std::{borrow::Borrow, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Opaque token correlating one SSE stream with its inbound queue.
///
/// Generated tokens are random UUIDs (version 4, RFC 4122 variant) in the
/// hyphenated lowercase form. Tokens received from clients are taken as-is.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Arc<str>);

impl SessionId {
    /// Generate a fresh session token from 128 random bits.
    ///
    /// # Example
    ///
    /// ```rust
    /// use mcp_relay::SessionId;
    ///
    /// let id = SessionId::generate();
    /// assert_eq!(id.as_str().len(), 36);
    /// assert_eq!(id.as_str().as_bytes()[14], b'4');
    /// ```
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::random();
        let uuid = uuid::Builder::from_random_bytes(bytes).into_uuid();
        Self(Arc::from(uuid.hyphenated().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Serialize for SessionId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Identifier of a queued message, assigned by the store on insert.
///
/// Ids increase with insertion order within one store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A session row. Created once per opened stream and never mutated.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            created_at: now,
            last_seen_at: now,
        }
    }
}

/// An inbound protocol message waiting for (or past) delivery.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub id: MessageId,
    pub session_id: SessionId,
    /// Raw JSON exactly as posted by the client.
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    /// Flips from `false` to `true` once, after delivery.
    pub processed: bool,
}
