// ── Runtime connection configuration ──
//
// Describes *how* to reach a gateway: base URL, bearer token, TLS, and
// timeout. The embedding application constructs a `GatewayConfig` and
// hands it in -- core never reads config files and never consults any
// ambient global for the credential.

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use thingly_api::{TlsMode, TransportConfig};

/// TLS verification strategy.
#[derive(Debug, Clone, Default)]
pub enum TlsVerification {
    /// System CA store (strict).
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification (self-signed gateways). Default for local gateways.
    #[default]
    DangerAcceptInvalid,
}

impl PartialEq for TlsVerification {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::SystemDefaults, Self::SystemDefaults) => true,
            (Self::CustomCa(a), Self::CustomCa(b)) => a == b,
            (Self::DangerAcceptInvalid, Self::DangerAcceptInvalid) => true,
            _ => false,
        }
    }
}

impl Eq for TlsVerification {}

/// Configuration for connecting to a single gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway base URL (e.g., `https://gateway.local`).
    pub url: Url,
    /// Bearer token for HTTP calls and WebSocket upgrades.
    pub token: SecretString,
    /// TLS verification strategy.
    pub tls: TlsVerification,
    /// Request timeout.
    pub timeout: Duration,
}

impl GatewayConfig {
    pub fn new(url: Url, token: SecretString) -> Self {
        Self {
            url,
            token,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Translate into the api crate's transport configuration.
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: match &self.tls {
                TlsVerification::SystemDefaults => TlsMode::System,
                TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
                TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
            },
            timeout: self.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_maps_tls_mode() {
        let mut config = GatewayConfig::new(
            Url::parse("https://gateway.local").unwrap(),
            SecretString::from("tok".to_string()),
        );
        config.tls = TlsVerification::SystemDefaults;

        let transport = config.transport();
        assert!(matches!(transport.tls, TlsMode::System));
        assert_eq!(transport.timeout, Duration::from_secs(30));
    }
}
