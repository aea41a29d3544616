//! HTTP surface of the relay: the SSE stream and the ingress endpoint.
//!
//! Unlike an in-process channel, POSTs never reach a live transport directly.
//! They are written to the [`MessageStore`] and picked up by the owning
//! session's poll loop, so any relay instance sharing the store can accept
//! them.

use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Router,
};
use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tower_http::trace::TraceLayer;

use super::session::{SessionOptions, SessionTransport};
use crate::{
    config::RelayConfig,
    store::{MessageStore, SessionId, StoreError},
};

/// Diagnostic header carrying the session token on the SSE response.
pub const SESSION_ID_HEADER: HeaderName = HeaderName::from_static("x-session-id");

/// Failures of the ingress endpoint. Every variant is reported to the poster
/// as a non-2xx status with the error message as body.
#[derive(Error, Debug)]
pub enum IngressError {
    #[error("Missing {0} parameter")]
    MissingParameter(&'static str),

    #[error("Malformed payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),

    #[error("Session {0} not found")]
    SessionNotFound(SessionId),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for IngressError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::SessionNotFound(session_id) => Self::SessionNotFound(session_id),
            other => Self::Store(other),
        }
    }
}

impl IngressError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingParameter(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "error handling message");
        } else {
            tracing::debug!(error = %self, "rejected message");
        }
        (status, self.to_string()).into_response()
    }
}

/// Shared application state for the relay routes.
#[derive(Clone)]
struct RelayApp {
    store: Arc<dyn MessageStore>,
    options: SessionOptions,
    keep_alive: Option<Duration>,
    transport_tx: mpsc::UnboundedSender<SessionTransport>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostEventQuery {
    session_id: Option<String>,
}

async fn post_event_handler(
    State(app): State<RelayApp>,
    Query(PostEventQuery { session_id }): Query<PostEventQuery>,
    body: Bytes,
) -> Result<StatusCode, IngressError> {
    let session_id = session_id
        .filter(|id| !id.is_empty())
        .map(SessionId::from)
        .ok_or(IngressError::MissingParameter("sessionId"))?;
    tracing::debug!(%session_id, bytes = body.len(), "received client message");

    let message: Value = serde_json::from_slice(&body).map_err(IngressError::MalformedPayload)?;
    let id = app.store.insert_message(&session_id, message).await?;
    tracing::debug!(%session_id, %id, "message queued");

    Ok(StatusCode::ACCEPTED)
}

async fn sse_handler(State(app): State<RelayApp>) -> Response {
    let (transport, stream) = SessionTransport::new(app.store.clone(), app.options.clone());
    let session_id = transport.session_id().clone();
    tracing::info!(%session_id, "new SSE connection");

    if app.transport_tx.send(transport).is_err() {
        tracing::warn!("failed to hand over transport - server may be closing");
        return (StatusCode::INTERNAL_SERVER_ERROR, "server is closing").into_response();
    }

    let events = stream.map(|frame| Ok::<_, Infallible>(frame.into_event()));
    let sse = match app.keep_alive.filter(|interval| !interval.is_zero()) {
        Some(interval) => Sse::new(events).keep_alive(KeepAlive::new().interval(interval)),
        None => Sse::new(events),
    };

    let mut response = sse.into_response();
    if let Ok(value) = HeaderValue::from_str(session_id.as_str()) {
        response.headers_mut().insert(SESSION_ID_HEADER, value);
    }
    response
}

async fn echo_handler(body: String) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain")], body)
}

/// Periodically delete processed messages older than `retention`.
fn spawn_janitor(store: Arc<dyn MessageStore>, retention: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        if retention.is_zero() {
            tracing::warn!("zero retention window, janitor disabled");
            return;
        }
        let Ok(window) = chrono::Duration::from_std(retention) else {
            tracing::warn!(?retention, "retention window out of range, janitor disabled");
            return;
        };
        let mut ticker = tokio::time::interval(retention);
        loop {
            ticker.tick().await;
            match store.purge_processed(Utc::now() - window).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "purged processed messages"),
                Err(error) => tracing::warn!(%error, "failed to purge processed messages"),
            }
        }
    })
}

/// SSE relay whose sessions are handed to the application as they connect.
///
/// # Example
///
/// ```rust,ignore
/// use mcp_relay::{InMemoryStore, RelayConfig, RelayServer};
///
/// let (mut relay, router) = RelayServer::new(Arc::new(InMemoryStore::new()), &RelayConfig::from_env());
///
/// tokio::spawn(async move {
///     while let Some(transport) = relay.next_transport().await {
///         transport.set_handler(engine_for(&transport));
///         transport.start().await?;
///     }
/// });
/// axum::serve(listener, router).await?;
/// ```
pub struct RelayServer {
    transport_rx: mpsc::UnboundedReceiver<SessionTransport>,
    janitor: Option<JoinHandle<()>>,
}

impl RelayServer {
    /// Create the relay and the router serving its routes.
    ///
    /// When `config.message_retention` is set a background purge task is
    /// spawned, so this must run inside a tokio runtime in that case.
    pub fn new(store: Arc<dyn MessageStore>, config: &RelayConfig) -> (Self, Router) {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();

        let janitor = config
            .message_retention
            .map(|retention| spawn_janitor(store.clone(), retention));

        let app = RelayApp {
            store,
            options: config.session_options(),
            keep_alive: config.keep_alive,
            transport_tx,
        };

        let router = Router::new()
            .route(&config.sse_path, get(sse_handler))
            .route(&config.message_path, post(post_event_handler))
            .route("/echo", post(echo_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(app);

        (
            Self {
                transport_rx,
                janitor,
            },
            router,
        )
    }

    /// Wait for the next SSE connection. The transport is not started yet:
    /// register a handler, then call [`SessionTransport::start`].
    ///
    /// Returns `None` when all router clones have been dropped.
    pub async fn next_transport(&mut self) -> Option<SessionTransport> {
        self.transport_rx.recv().await
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        if let Some(janitor) = self.janitor.take() {
            janitor.abort();
        }
    }
}
