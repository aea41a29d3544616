use thiserror::Error;

use crate::store::StoreError;

/// Errors raised by a [`SessionTransport`](super::SessionTransport).
#[derive(Error, Debug)]
pub enum TransportError {
    /// `start()` was called a second time on the same transport.
    #[error("transport already started")]
    AlreadyStarted,

    /// `send()` before `start()`, after `close()`, or after the client went away.
    #[error("not connected")]
    NotConnected,

    #[error("failed to create session: {0}")]
    Session(#[source] StoreError),

    /// Store failure inside the poll loop. Ends that session's loop.
    #[error("polling failed: {0}")]
    Polling(#[source] StoreError),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid endpoint path: {0}")]
    Endpoint(#[from] url::ParseError),
}
