//! SSE transport backed by the inbound message queue.
//!
//! - [`SessionTransport`]: per-session adapter (start/send/close + callbacks)
//! - [`RelayServer`]: axum routes for the SSE stream and ingress POSTs
//! - [`RelayTransport`]: adapter exposed as an rmcp server transport

mod bridge;
mod error;
mod frame;
mod session;
mod sse;

pub use bridge::RelayTransport;
pub use error::TransportError;
pub use frame::{endpoint_uri, SseFrame};
pub use session::{OutboundStream, SessionOptions, SessionTransport, TransportHandler};
pub use sse::{IngressError, RelayServer, SESSION_ID_HEADER};
