//! MCP Relay - MCP over Server-Sent Events, bridged through a message queue.
//!
//! A client opens an SSE stream and receives an `endpoint` event naming the URL
//! to POST its JSON-RPC messages to. POSTed messages are not handed to the
//! server in-process: they are queued in a [`MessageStore`] and the session's
//! transport polls that queue, forwarding each message to the protocol engine.
//! Replies go back out on the SSE stream.
//!
//! - **store**: session table and inbound queue ([`MessageStore`], in-memory and SQLite)
//! - **transport**: per-session SSE transport, HTTP routes and rmcp bridge
//! - **config**: configuration from environment variables
//! - **bootstrap**: tracing initialization
//!
//! # Features
//!
//! - `transport` - SSE transport and routes (enabled by default)
//! - `config` - Configuration utilities (enabled by default)
//! - `bootstrap` - Tracing setup (enabled by default)
//! - `sqlite` - Durable SQLite store
//! - `full` - All features
//!
//! # Example
//!
//! ```rust,ignore
//! use mcp_relay::{init_tracing, InMemoryStore, RelayConfig, RelayServer, RelayTransport};
//! use rmcp::ServiceExt;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RelayConfig::from_env();
//!     init_tracing("mcp_relay=info", config.log_format);
//!
//!     let (mut relay, router) = RelayServer::new(Arc::new(InMemoryStore::new()), &config);
//!     tokio::spawn(async move {
//!         while let Some(transport) = relay.next_transport().await {
//!             let transport = RelayTransport::attach(transport, 64).await?;
//!             tokio::spawn(MyServer::default().serve(transport));
//!         }
//!     });
//!
//!     let listener = tokio::net::TcpListener::bind(config.socket_addr()).await?;
//!     axum::serve(listener, router).await?;
//!     Ok(())
//! }
//! ```

pub mod store;

#[cfg(feature = "config")]
pub mod config;

#[cfg(feature = "transport")]
pub mod transport;

#[cfg(feature = "bootstrap")]
pub mod bootstrap;

// Re-exports for convenience
pub use store::{
    InMemoryStore, MessageId, MessageStore, QueuedMessage, Session, SessionId, StoreError,
};

#[cfg(feature = "sqlite")]
pub use store::SqliteStore;

#[cfg(feature = "config")]
pub use config::{ConfigError, LogFormat, RelayConfig};

#[cfg(feature = "transport")]
pub use transport::{
    IngressError, OutboundStream, RelayServer, RelayTransport, SessionOptions, SessionTransport,
    TransportError, TransportHandler,
};

#[cfg(feature = "bootstrap")]
pub use bootstrap::init_tracing;
