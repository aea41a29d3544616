//! Serve an rmcp server over a relay session.
//!
//! [`RelayTransport`] implements both `Sink` and `Stream` with rmcp's server
//! message types, so it can be passed straight to `ServiceExt::serve`.

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use rmcp::{
    model::ClientJsonRpcMessage,
    service::{RxJsonRpcMessage, TxJsonRpcMessage},
    RoleServer,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::PollSender;

use super::{SessionTransport, TransportError, TransportHandler};
use crate::store::SessionId;

/// Decodes delivered queue payloads into MCP client messages.
struct BridgeHandler {
    session_id: SessionId,
    inbound: Mutex<Option<mpsc::UnboundedSender<RxJsonRpcMessage<RoleServer>>>>,
}

impl TransportHandler for BridgeHandler {
    fn on_message(&self, message: Value) {
        match serde_json::from_value::<ClientJsonRpcMessage>(message) {
            Ok(message) => {
                if let Some(tx) = self.inbound.lock().as_ref() {
                    let _ = tx.send(message);
                }
            }
            Err(error) => {
                tracing::warn!(session_id = %self.session_id, %error, "skipping message that is not an MCP client message");
            }
        }
    }

    fn on_error(&self, error: &TransportError) {
        tracing::error!(session_id = %self.session_id, %error, "relay session failed");
    }

    fn on_close(&self) {
        // Ends the inbound stream, which stops the service.
        self.inbound.lock().take();
    }
}

/// rmcp transport for a single relay session.
pub struct RelayTransport {
    stream: UnboundedReceiverStream<RxJsonRpcMessage<RoleServer>>,
    sink: PollSender<TxJsonRpcMessage<RoleServer>>,
    session_id: SessionId,
}

impl RelayTransport {
    /// Register on `transport`, start it, and return the rmcp-facing side.
    ///
    /// Server messages are forwarded to the SSE stream by a background task
    /// with room for `buffer` pending messages. Closing or dropping the sink
    /// closes the session.
    pub async fn attach(transport: SessionTransport, buffer: usize) -> Result<Self, TransportError> {
        let session_id = transport.session_id().clone();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        transport.set_handler(Arc::new(BridgeHandler {
            session_id: session_id.clone(),
            inbound: Mutex::new(Some(inbound_tx)),
        }));

        transport.start().await?;

        let (outbound_tx, mut outbound_rx) =
            mpsc::channel::<TxJsonRpcMessage<RoleServer>>(buffer.max(1));
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(error) = transport.send(&message).await {
                    tracing::debug!(session_id = %transport.session_id(), %error, "dropping server message");
                    break;
                }
            }
            transport.close();
        });

        Ok(Self {
            stream: UnboundedReceiverStream::new(inbound_rx),
            sink: PollSender::new(outbound_tx),
            session_id,
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

impl Sink<TxJsonRpcMessage<RoleServer>> for RelayTransport {
    type Error = std::io::Error;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.sink
            .poll_ready_unpin(cx)
            .map_err(std::io::Error::other)
    }

    fn start_send(
        mut self: Pin<&mut Self>,
        item: TxJsonRpcMessage<RoleServer>,
    ) -> Result<(), Self::Error> {
        self.sink
            .start_send_unpin(item)
            .map_err(std::io::Error::other)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.sink
            .poll_flush_unpin(cx)
            .map_err(std::io::Error::other)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.sink
            .poll_close_unpin(cx)
            .map_err(std::io::Error::other)
    }
}

impl Stream for RelayTransport {
    type Item = RxJsonRpcMessage<RoleServer>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.poll_next_unpin(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, MessageStore};
    use crate::transport::{OutboundStream, SessionOptions};
    use serde_json::json;
    use std::time::Duration;

    async fn attached() -> (Arc<InMemoryStore>, RelayTransport, OutboundStream) {
        let store = Arc::new(InMemoryStore::new());
        let (transport, stream) = SessionTransport::new(store.clone(), SessionOptions::default());
        let relay = RelayTransport::attach(transport, 8).await.unwrap();
        (store, relay, stream)
    }

    #[tokio::test]
    async fn queued_client_messages_reach_the_stream() {
        let (store, mut relay, _stream) = attached().await;

        store
            .insert_message(
                relay.session_id(),
                json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            )
            .await
            .unwrap();

        let message = tokio::time::timeout(Duration::from_secs(5), relay.next())
            .await
            .expect("message should be delivered")
            .expect("stream should stay open");
        let encoded = serde_json::to_value(&message).unwrap();
        assert_eq!(encoded["method"], "notifications/initialized");
    }

    #[tokio::test]
    async fn non_mcp_payloads_are_skipped() {
        let (store, mut relay, _stream) = attached().await;

        store
            .insert_message(relay.session_id(), json!(["not", "a", "message"]))
            .await
            .unwrap();
        store
            .insert_message(
                relay.session_id(),
                json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            )
            .await
            .unwrap();

        let message = tokio::time::timeout(Duration::from_secs(5), relay.next())
            .await
            .unwrap()
            .unwrap();
        let encoded = serde_json::to_value(&message).unwrap();
        assert_eq!(encoded["method"], "notifications/initialized");
    }

    #[tokio::test]
    async fn server_messages_are_framed_on_the_stream() {
        let (_store, mut relay, mut stream) = attached().await;
        assert_eq!(stream.next().await.unwrap().event(), "endpoint");

        let reply: TxJsonRpcMessage<RoleServer> =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 7, "result": {}})).unwrap();
        relay.send(reply).await.unwrap();

        let frame = stream.next().await.unwrap();
        assert_eq!(frame.event(), "message");
        let data: Value = serde_json::from_str(frame.data()).unwrap();
        assert_eq!(data["id"], 7);
    }

    #[tokio::test]
    async fn closing_the_session_ends_the_stream() {
        let (_store, mut relay, stream) = attached().await;

        drop(stream);

        let next = tokio::time::timeout(Duration::from_secs(5), relay.next())
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn dropping_the_sink_closes_the_session() {
        let (_store, relay, mut stream) = attached().await;
        assert_eq!(stream.next().await.unwrap().event(), "endpoint");

        drop(relay);

        let next = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap();
        assert!(next.is_none());
    }
}
