//! `mcp-relay`: serve a bare MCP server over the queue-backed SSE relay.
//!
//! The served handler only answers the protocol handshake and `ping`; real
//! deployments embed the library and attach their own server.

use std::sync::Arc;

use anyhow::Context as _;
use mcp_relay::{
    init_tracing, InMemoryStore, MessageStore, RelayConfig, RelayServer, RelayTransport,
    SessionTransport,
};
use rmcp::{ServerHandler, ServiceExt};

#[derive(Clone, Debug, Default)]
struct BareServer;

impl ServerHandler for BareServer {}

async fn open_store(config: &RelayConfig) -> anyhow::Result<Arc<dyn MessageStore>> {
    #[cfg(feature = "sqlite")]
    if let Some(path) = &config.database_path {
        let store = mcp_relay::SqliteStore::open(path)
            .await
            .with_context(|| format!("failed to open database {}", path.display()))?;
        tracing::info!(path = %path.display(), "using sqlite store");
        return Ok(Arc::new(store));
    }

    #[cfg(not(feature = "sqlite"))]
    if config.database_path.is_some() {
        tracing::warn!("DATABASE_PATH is set but the sqlite feature is disabled; using in-memory store");
    }

    tracing::info!("using in-memory store");
    Ok(Arc::new(InMemoryStore::new()))
}

async fn serve_session(transport: SessionTransport, buffer: usize) {
    let session_id = transport.session_id().clone();
    let transport = match RelayTransport::attach(transport, buffer).await {
        Ok(transport) => transport,
        Err(error) => {
            tracing::error!(%session_id, %error, "failed to start session");
            return;
        }
    };

    match BareServer.serve(transport).await {
        Ok(service) => {
            if let Err(error) = service.waiting().await {
                tracing::warn!(%session_id, %error, "session task failed");
            }
        }
        Err(error) => tracing::warn!(%session_id, %error, "session ended during handshake"),
    }
    tracing::debug!(%session_id, "session finished");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env();
    init_tracing("mcp_relay=info,tower_http=info", config.log_format);
    config.validate().context("invalid configuration")?;

    let store = open_store(&config).await?;
    let (mut relay, router) = RelayServer::new(store, &config);

    let buffer = config.outbound_buffer;
    tokio::spawn(async move {
        while let Some(transport) = relay.next_transport().await {
            tokio::spawn(serve_session(transport, buffer));
        }
    });

    let listener = tokio::net::TcpListener::bind(config.socket_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.socket_addr()))?;
    tracing::info!(
        addr = %config.socket_addr(),
        sse = %config.sse_path,
        messages = %config.message_path,
        "relay listening"
    );

    axum::serve(listener, router).await?;
    Ok(())
}
