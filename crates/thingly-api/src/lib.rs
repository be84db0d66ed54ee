// thingly-api: Async Rust client for a Web of Things gateway
// (HTTP resource protocol + WebSocket push channel)

pub mod client;
pub mod error;
pub mod stream;
pub mod transport;

pub use client::ThingsClient;
pub use error::Error;
pub use stream::{StreamMessage, ThingStream};
pub use transport::{TlsMode, TransportConfig};

/// JSON object with wire key order preserved.
///
/// Property-status and event payloads are processed in encounter order,
/// which `serde_json::Map` does not guarantee.
pub type JsonMap = indexmap::IndexMap<String, serde_json::Value>;
