//! WebSocket push channel for live thing updates.
//!
//! Connects to the gateway's per-thing WebSocket endpoint, sends a single
//! batched event subscription, and streams parsed push messages through a
//! [`tokio::sync::broadcast`] channel.
//!
//! There is deliberately no reconnection here: one connection per model,
//! terminal on close or error. The embedding layer decides whether a
//! replacement model should be constructed.
//!
//! # Example
//!
//! ```rust,ignore
//! use thingly_api::stream::ThingStream;
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let ws_url = thingly_api::stream::ws_url(&base, "/things/lamp", &token)?;
//!
//! let stream = ThingStream::connect(ws_url, vec!["overheated".into()], cancel.clone()).await?;
//! let mut rx = stream.subscribe();
//!
//! while let Ok(msg) = rx.recv().await {
//!     println!("{msg:?}");
//! }
//!
//! stream.shutdown();
//! ```

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::JsonMap;

// ── Broadcast channel capacity ───────────────────────────────────────

const MESSAGE_CHANNEL_CAPACITY: usize = 256;

// ── StreamMessage ────────────────────────────────────────────────────

/// A parsed push message from the gateway WebSocket.
///
/// The wire discriminator is `messageType`; anything other than
/// `propertyStatus` and `event` is dropped before reaching consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    /// Partial property-value update: `{<propName>: value, ...}`.
    PropertyStatus(JsonMap),
    /// Event occurrence: `{<eventName>: data, ...}`.
    Event(JsonMap),
}

// ── URL derivation ───────────────────────────────────────────────────

/// Derive the push-channel URL for a thing resource.
///
/// Swaps the scheme to its stream-capable variant (`http` → `ws`,
/// `https` → `wss`) and appends the bearer token as the `jwt` query
/// parameter, which is how the gateway authenticates WebSocket upgrades.
pub fn ws_url(base: &Url, thing_href: &str, token: &SecretString) -> Result<Url, Error> {
    let mut url = base.join(thing_href)?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|()| Error::WebSocketConnect(format!("cannot derive ws scheme for {url}")))?;
    url.query_pairs_mut()
        .append_pair("jwt", token.expose_secret());

    Ok(url)
}

// ── ThingStream ──────────────────────────────────────────────────────

/// Handle to a running push-channel connection.
///
/// Dropping the handle does not close the connection; call
/// [`shutdown`](Self::shutdown) (or cancel the token passed to
/// [`connect`](Self::connect)) to tear down the read task.
pub struct ThingStream {
    message_rx: broadcast::Receiver<Arc<StreamMessage>>,
    cancel: CancellationToken,
}

impl ThingStream {
    /// Connect to the thing's WebSocket endpoint and spawn the read task.
    ///
    /// If `subscribe_events` is non-empty, a single batched
    /// `addEventSubscription` frame enumerating every event name is sent
    /// before any messages are read -- one frame total, never one per
    /// event.
    pub async fn connect(
        ws_url: Url,
        subscribe_events: Vec<String>,
        cancel: CancellationToken,
    ) -> Result<Self, Error> {
        tracing::info!(url = %ws_url, "Connecting to thing WebSocket");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(ws_url.as_str())
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        tracing::info!("WebSocket connected");

        let (mut write, read) = ws_stream.split();

        if !subscribe_events.is_empty() {
            let frame = subscription_frame(&subscribe_events);
            write
                .send(tungstenite::Message::text(frame))
                .await
                .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
            tracing::debug!(count = subscribe_events.len(), "Sent event subscription");
        }

        let (message_tx, message_rx) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            read_loop(read, message_tx, task_cancel).await;
        });

        Ok(Self { message_rx, cancel })
    }

    /// Get a new broadcast receiver for the push messages.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<StreamMessage>> {
        self.message_rx.resubscribe()
    }

    /// Signal the read task to shut down.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Read loop ────────────────────────────────────────────────────────

type WsRead = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

/// Read frames until the connection drops or the token is cancelled.
///
/// Terminal either way: the broadcast sender is dropped on exit, which
/// detaches every subscriber.
async fn read_loop(
    mut read: WsRead,
    message_tx: broadcast::Sender<Arc<StreamMessage>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        if let Some(msg) = parse_message(&text) {
                            // Send errors just mean no active subscribers
                            let _ = message_tx.send(Arc::new(msg));
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite handles pong replies automatically
                        tracing::trace!("WebSocket ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(code = %cf.code, reason = %cf.reason, "WebSocket closed");
                        } else {
                            tracing::info!("WebSocket closed (no payload)");
                        }
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "WebSocket error, stream is terminal");
                        break;
                    }
                    None => {
                        tracing::info!("WebSocket stream ended");
                        break;
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }

    tracing::debug!("WebSocket read loop exiting");
}

// ── Message codec ────────────────────────────────────────────────────

/// Wire envelope for every push-channel frame, both directions.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "messageType")]
    message_type: String,
    data: Value,
}

/// Build the single batched `addEventSubscription` frame.
///
/// Each event name maps to an empty object -- the subscription carries no
/// per-event payload.
fn subscription_frame(event_names: &[String]) -> String {
    let data: JsonMap = event_names
        .iter()
        .map(|name| (name.clone(), Value::Object(serde_json::Map::new())))
        .collect();

    let envelope = Envelope {
        message_type: "addEventSubscription".to_string(),
        data: serde_json::to_value(data).unwrap_or(Value::Null),
    };

    // Envelope is plain data; serialization cannot fail.
    serde_json::to_string(&envelope).unwrap_or_default()
}

/// Parse an inbound text frame.
///
/// Returns `None` for malformed frames and for `messageType`s other than
/// `propertyStatus` / `event`, which are logged and dropped.
fn parse_message(text: &str) -> Option<StreamMessage> {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to parse push-channel frame");
            return None;
        }
    };

    let data: JsonMap = match serde_json::from_value(envelope.data) {
        Ok(map) => map,
        Err(e) => {
            tracing::debug!(error = %e, message_type = %envelope.message_type,
                "Push-channel frame data is not an object");
            return None;
        }
    };

    match envelope.message_type.as_str() {
        "propertyStatus" => Some(StreamMessage::PropertyStatus(data)),
        "event" => Some(StreamMessage::Event(data)),
        other => {
            tracing::trace!(message_type = other, "Ignoring push-channel frame");
            None
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn token() -> SecretString {
        SecretString::from("tok123".to_string())
    }

    #[test]
    fn ws_url_swaps_scheme_and_appends_token() {
        let base = Url::parse("https://gateway.local/").unwrap();
        let url = ws_url(&base, "/things/lamp", &token()).unwrap();

        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/things/lamp");
        assert_eq!(url.query(), Some("jwt=tok123"));
    }

    #[test]
    fn ws_url_plain_http_becomes_ws() {
        let base = Url::parse("http://127.0.0.1:8080/").unwrap();
        let url = ws_url(&base, "/things/lamp", &token()).unwrap();
        assert_eq!(url.scheme(), "ws");
    }

    #[test]
    fn subscription_frame_is_one_batched_message() {
        let frame = subscription_frame(&["overheated".into(), "motion".into()]);
        let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();

        assert_eq!(parsed["messageType"], "addEventSubscription");
        assert_eq!(parsed["data"]["overheated"], json!({}));
        assert_eq!(parsed["data"]["motion"], json!({}));
        assert_eq!(parsed["data"].as_object().unwrap().len(), 2);
    }

    #[test]
    fn parse_property_status_frame() {
        let text = r#"{"messageType":"propertyStatus","data":{"level":42,"on":true}}"#;
        let msg = parse_message(text).unwrap();

        let StreamMessage::PropertyStatus(map) = msg else {
            panic!("expected PropertyStatus");
        };
        assert_eq!(map["level"], json!(42));
        assert_eq!(map["on"], json!(true));
        // Wire key order preserved
        let keys: Vec<_> = map.keys().collect();
        assert_eq!(keys, ["level", "on"]);
    }

    #[test]
    fn parse_event_frame() {
        let text = r#"{"messageType":"event","data":{"motion":{}}}"#;
        let msg = parse_message(text).unwrap();

        let StreamMessage::Event(map) = msg else {
            panic!("expected Event");
        };
        assert_eq!(map["motion"], json!({}));
    }

    #[test]
    fn unknown_message_type_is_dropped() {
        let text = r#"{"messageType":"connected","data":{"connected":true}}"#;
        assert!(parse_message(text).is_none());
    }

    #[test]
    fn malformed_frame_is_dropped() {
        assert!(parse_message("not json at all").is_none());
        assert!(parse_message(r#"{"messageType":"event","data":[1,2]}"#).is_none());
    }
}
