// ── Core error types ──
//
// Domain-level errors from thingly-core. Consumers never see HTTP status
// codes or JSON parse failures directly; the `From<thingly_api::Error>`
// impl translates transport-layer errors into domain variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Local validation ─────────────────────────────────────────────
    #[error("Unknown property: {name}")]
    UnknownProperty { name: String },

    #[error("Invalid value for property {name}: {reason}")]
    InvalidPropertyValue { name: String, reason: String },

    // ── Remote operations ────────────────────────────────────────────
    #[error("Failed to write property {name}: {message}")]
    PropertyWriteFailed { name: String, message: String },

    #[error("Failed to read properties: {message}")]
    PropertyReadFailed { message: String },

    #[error("Failed to read events: {message}")]
    EventsReadFailed { message: String },

    #[error("Thing update rejected: {message}")]
    UpdateRejected { message: String },

    #[error("Thing removal rejected: {message}")]
    RemoveRejected { message: String },

    // ── Push channel ─────────────────────────────────────────────────
    #[error("Push channel failed: {reason}")]
    StreamFailed { reason: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("Gateway API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<thingly_api::Error> for CoreError {
    fn from(err: thingly_api::Error) -> Self {
        match err {
            thingly_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            thingly_api::Error::Tls(msg) => CoreError::Config {
                message: format!("TLS error: {msg}"),
            },
            thingly_api::Error::WebSocketConnect(reason) => CoreError::StreamFailed { reason },
            thingly_api::Error::Status { status, message } => CoreError::Api {
                message,
                status: Some(status),
            },
            thingly_api::Error::Transport(ref e) => CoreError::Api {
                message: e.to_string(),
                status: e.status().map(|s| s.as_u16()),
            },
            thingly_api::Error::Deserialization { message, body: _ } => CoreError::Api {
                message: format!("Deserialization error: {message}"),
                status: None,
            },
        }
    }
}
