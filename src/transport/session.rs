//! Per-session transport: one outbound SSE stream fed by `send`, one poll loop
//! draining the inbound queue.

use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Duration,
};

use futures::{Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::{
    frame::{endpoint_uri, SseFrame},
    TransportError,
};
use crate::store::{MessageId, MessageStore, SessionId};

/// Callbacks a protocol engine registers on a [`SessionTransport`].
///
/// `on_message` is called from the poll loop, in queue order. Implementations
/// should hand the message off quickly (e.g. into a channel); the next message
/// of the batch is not delivered until the call returns.
pub trait TransportHandler: Send + Sync + 'static {
    fn on_message(&self, message: Value);

    fn on_error(&self, _error: &TransportError) {}

    /// Called once, when the transport closes for any reason.
    fn on_close(&self) {}
}

/// Settings shared by every session of a relay.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Ingress path advertised in the `endpoint` event.
    pub message_path: String,
    /// Wait between two queue polls.
    pub poll_interval: Duration,
    /// Frames buffered on the outbound stream before `send` waits.
    pub outbound_buffer: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            message_path: "/messages".to_string(),
            poll_interval: Duration::from_secs(1),
            outbound_buffer: 64,
        }
    }
}

struct Shared {
    session_id: SessionId,
    started: AtomicBool,
    connected: AtomicBool,
    closed: AtomicBool,
    outbound: Mutex<Option<mpsc::Sender<SseFrame>>>,
    handler: RwLock<Option<Arc<dyn TransportHandler>>>,
    shutdown: CancellationToken,
}

impl Shared {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.shutdown.is_cancelled()
    }

    fn sender(&self) -> Option<mpsc::Sender<SseFrame>> {
        self.outbound.lock().clone()
    }

    fn handler(&self) -> Option<Arc<dyn TransportHandler>> {
        self.handler.read().clone()
    }

    /// Shared by `close()` and stream cancellation.
    fn shut_down(&self) {
        self.connected.store(false, Ordering::Release);
        self.shutdown.cancel();
        // Queued frames still drain; the stream ends once they are read.
        self.outbound.lock().take();

        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(session_id = %self.session_id, "transport closed");
        if let Some(handler) = self.handler() {
            handler.on_close();
        }
    }

    fn report_error(&self, error: &TransportError) {
        if let Some(handler) = self.handler() {
            handler.on_error(error);
        }
    }
}

/// Bidirectional channel for one session over SSE plus the inbound queue.
///
/// Cloning yields another handle to the same transport.
///
/// # Example
///
/// ```rust,ignore
/// let (transport, stream) = SessionTransport::new(store, SessionOptions::default());
/// transport.set_handler(engine);
/// transport.start().await?;
/// // serve `stream` as the SSE response body
/// ```
#[derive(Clone)]
pub struct SessionTransport {
    shared: Arc<Shared>,
    store: Arc<dyn MessageStore>,
    options: SessionOptions,
}

impl SessionTransport {
    /// Create an unstarted transport with a fresh session id, plus the
    /// outbound stream to serve to the client.
    pub fn new(store: Arc<dyn MessageStore>, options: SessionOptions) -> (Self, OutboundStream) {
        let (tx, rx) = mpsc::channel(options.outbound_buffer.max(1));
        let shared = Arc::new(Shared {
            session_id: SessionId::generate(),
            started: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            outbound: Mutex::new(Some(tx)),
            handler: RwLock::new(None),
            shutdown: CancellationToken::new(),
        });

        let stream = OutboundStream {
            frames: ReceiverStream::new(rx),
            shared: shared.clone(),
        };
        (
            Self {
                shared,
                store,
                options,
            },
            stream,
        )
    }

    pub fn session_id(&self) -> &SessionId {
        &self.shared.session_id
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Register the engine callbacks. Replaces any previous handler.
    pub fn set_handler(&self, handler: Arc<dyn TransportHandler>) {
        *self.shared.handler.write() = Some(handler);
    }

    /// Persist the session, announce the ingress endpoint and start polling.
    ///
    /// # Errors
    ///
    /// - [`TransportError::AlreadyStarted`] on a second call
    /// - [`TransportError::Session`] if the session row cannot be created
    /// - [`TransportError::NotConnected`] if the client is already gone
    pub async fn start(&self) -> Result<(), TransportError> {
        if self.shared.started.swap(true, Ordering::AcqRel) {
            return Err(TransportError::AlreadyStarted);
        }

        if self.shared.closed.load(Ordering::Acquire) {
            return Err(TransportError::NotConnected);
        }

        let session_id = self.session_id().clone();
        let endpoint = endpoint_uri(&self.options.message_path, &session_id)?;

        self.store
            .create_session(&session_id)
            .await
            .map_err(TransportError::Session)?;

        let tx = self.shared.sender().ok_or(TransportError::NotConnected)?;
        tx.send(SseFrame::endpoint(endpoint))
            .await
            .map_err(|_| TransportError::NotConnected)?;

        self.shared.connected.store(true, Ordering::Release);
        tracing::info!(%session_id, "transport started");

        tokio::spawn(self.clone().poll_messages());
        Ok(())
    }

    /// Write one `message` event to the outbound stream.
    ///
    /// # Errors
    ///
    /// [`TransportError::NotConnected`] unless the transport is started and
    /// not yet closed.
    pub async fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let frame = SseFrame::message(message)?;
        let tx = self.shared.sender().ok_or(TransportError::NotConnected)?;
        tx.send(frame)
            .await
            .map_err(|_| TransportError::NotConnected)
    }

    /// End the stream and stop polling. Safe to call any number of times;
    /// `on_close` fires only on the first call.
    pub fn close(&self) {
        self.shared.shut_down();
    }

    async fn poll_messages(self) {
        let session_id = self.session_id().clone();
        let watch = self.store.watch(&session_id);
        tracing::info!(%session_id, "starting message polling");

        while self.is_connected() {
            if let Err(error) = self.poll_once().await {
                tracing::error!(%session_id, %error, "error polling messages");
                self.shared.report_error(&error);
                break;
            }

            tokio::select! {
                _ = self.shared.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.options.poll_interval) => {}
                _ = notified(watch.as_deref()) => {}
            }
        }

        tracing::info!(%session_id, "polling stopped");
        if watch.is_some() {
            self.store.unwatch(&session_id);
        }
        self.close();
    }

    /// One poll: deliver the current batch, then mark all of it processed.
    async fn poll_once(&self) -> Result<usize, TransportError> {
        let batch = self
            .store
            .list_unprocessed(self.session_id())
            .await
            .map_err(TransportError::Polling)?;

        // Results that arrive after close are discarded.
        if batch.is_empty() || !self.is_connected() {
            return Ok(0);
        }

        let ids: Vec<MessageId> = batch.iter().map(|message| message.id).collect();
        let handler = self.shared.handler();
        for message in batch {
            tracing::debug!(session_id = %self.session_id(), id = %message.id, "forwarding message");
            if let Some(handler) = &handler {
                handler.on_message(message.payload);
            }
        }

        self.store
            .mark_processed(&ids)
            .await
            .map_err(TransportError::Polling)?;
        Ok(ids.len())
    }
}

async fn notified(watch: Option<&Notify>) {
    match watch {
        Some(notify) => notify.notified().await,
        None => std::future::pending().await,
    }
}

/// Frames destined for the client.
///
/// Dropping the stream (the client disconnected) closes the transport.
pub struct OutboundStream {
    frames: ReceiverStream<SseFrame>,
    shared: Arc<Shared>,
}

impl Stream for OutboundStream {
    type Item = SseFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.frames.poll_next_unpin(cx)
    }
}

impl Drop for OutboundStream {
    fn drop(&mut self) {
        if !self.shared.closed.load(Ordering::Acquire) {
            tracing::debug!(session_id = %self.shared.session_id, "client stream cancelled");
        }
        self.shared.shut_down();
    }
}
