// thingly-core: Live-state layer between thingly-api and UI consumers.

pub mod binding;
pub mod config;
pub mod description;
pub mod error;
pub mod model;
pub mod notifier;

// ── Primary re-exports ──────────────────────────────────────────────
pub use binding::{control_id_for, PropertyBinding};
pub use config::{GatewayConfig, TlsVerification};
pub use description::{
    thing_id_from_href, EventDescriptor, Link, PropertyDescriptor, PropertyType, ThingDescription,
};
pub use error::CoreError;
pub use model::ThingModel;
pub use notifier::{ModelEventKind, Notifier};

/// JSON object with wire key order preserved (re-export from thingly-api).
pub use thingly_api::JsonMap;
