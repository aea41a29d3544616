//! Outbound SSE frames.

use axum::response::sse::Event;
use serde::Serialize;
use url::Url;

use crate::store::SessionId;

/// Base used only to resolve and percent-encode the ingress path.
const ENDPOINT_BASE: &str = "http://relay.invalid/";

/// One complete event on the outbound stream.
///
/// Frames are built whole before they are queued, so concurrent writers never
/// interleave partial events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseFrame {
    event: &'static str,
    data: String,
}

impl SseFrame {
    /// The discovery event telling the client where to POST.
    pub fn endpoint(uri: String) -> Self {
        Self {
            event: "endpoint",
            data: uri,
        }
    }

    /// A protocol message, serialized compactly on a single line.
    pub fn message<T: Serialize + ?Sized>(message: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event: "message",
            data: serde_json::to_string(message)?,
        })
    }

    pub fn event(&self) -> &str {
        self.event
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    /// Wire form: `event: <name>\ndata: <data>\n\n`.
    pub fn encode(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event, self.data)
    }

    pub fn into_event(self) -> Event {
        Event::default().event(self.event).data(self.data)
    }
}

/// Build the `endpoint` event payload: the URI-encoded ingress path followed by
/// `?sessionId=<token>`.
pub fn endpoint_uri(path: &str, session_id: &SessionId) -> Result<String, url::ParseError> {
    let mut url = Url::parse(ENDPOINT_BASE)?.join(path)?;
    url.set_query(None);
    url.set_fragment(None);
    url.query_pairs_mut()
        .append_pair("sessionId", session_id.as_str());
    Ok(format!("{}?{}", url.path(), url.query().unwrap_or_default()))
}
