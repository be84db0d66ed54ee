// Gateway HTTP client
//
// Wraps `reqwest::Client` with gateway-relative href resolution and the
// JSON resource protocol: properties, event collections, and the thing
// resource itself. Thing descriptions carry gateway-relative hrefs
// (`/things/lamp/properties/level`), so every call joins its href against
// the gateway base URL.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::JsonMap;

/// Raw HTTP client for the gateway's thing resources.
///
/// Success is determined by HTTP status alone; response bodies are bare
/// JSON objects (no envelope). Rejected operations surface the status'
/// canonical reason phrase.
#[derive(Debug, Clone)]
pub struct ThingsClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ThingsClient {
    /// Create a client from a base URL and a pre-built `reqwest::Client`.
    ///
    /// The client is expected to carry the gateway bearer token as a
    /// default header -- see [`TransportConfig::build_authorized_client`]
    /// (crate::transport::TransportConfig::build_authorized_client).
    pub fn new(base_url: Url, http: reqwest::Client) -> Self {
        Self { http, base_url }
    }

    /// Create a client from a string base URL (test convenience).
    pub fn from_base_url(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
        })
    }

    /// The gateway base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a gateway-relative href against the base URL.
    pub fn resource_url(&self, href: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(href)?)
    }

    // ── Property resources ───────────────────────────────────────────

    /// `GET <propertyHref>` -- fetch one property's current value.
    ///
    /// The body is a single-key object (`{"level": 42}`); key order is
    /// preserved for reconciliation.
    pub async fn get_property(&self, href: &str) -> Result<JsonMap, Error> {
        let url = self.resource_url(href)?;
        debug!("GET {url}");

        let resp = self.http.get(url).send().await.map_err(Error::Transport)?;
        Self::parse_json(resp).await
    }

    /// `PUT <propertyHref>` with body `{name: value}` -- write one property.
    ///
    /// Returns the gateway's echo of the updated values.
    pub async fn put_property(
        &self,
        href: &str,
        name: &str,
        value: &Value,
    ) -> Result<JsonMap, Error> {
        let url = self.resource_url(href)?;
        debug!("PUT {url}");

        let mut body = JsonMap::new();
        body.insert(name.to_string(), value.clone());

        let resp = self
            .http
            .put(url)
            .json(&body)
            .send()
            .await
            .map_err(Error::Transport)?;
        Self::parse_json(resp).await
    }

    // ── Event collection ─────────────────────────────────────────────

    /// `GET <eventsHref>` -- fetch the full event log for a thing.
    ///
    /// Each entry is a single-key object mapping event name to its data.
    pub async fn get_events(&self, href: &str) -> Result<Vec<JsonMap>, Error> {
        let url = self.resource_url(href)?;
        debug!("GET {url}");

        let resp = self.http.get(url).send().await.map_err(Error::Transport)?;
        Self::parse_json(resp).await
    }

    // ── Thing resource ───────────────────────────────────────────────

    /// `PUT <thingHref>` -- replace thing metadata (name, layout, etc.).
    ///
    /// Properties are not written through this call. The response body is
    /// discarded; only the status matters.
    pub async fn update_thing(&self, href: &str, updates: &impl Serialize) -> Result<(), Error> {
        let url = self.resource_url(href)?;
        debug!("PUT {url}");

        let resp = self
            .http
            .put(url)
            .json(updates)
            .send()
            .await
            .map_err(Error::Transport)?;
        Self::check_status(&resp)
    }

    /// `DELETE <thingHref>` -- remove the thing from the gateway.
    pub async fn remove_thing(&self, href: &str) -> Result<(), Error> {
        let url = self.resource_url(href)?;
        debug!("DELETE {url}");

        let resp = self
            .http
            .delete(url)
            .send()
            .await
            .map_err(Error::Transport)?;
        Self::check_status(&resp)
    }

    // ── Response handling ────────────────────────────────────────────

    fn check_status(resp: &reqwest::Response) -> Result<(), Error> {
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::Status {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("unknown status")
                    .to_string(),
            })
        }
    }

    async fn parse_json<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, Error> {
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("unknown status")
                    .to_string(),
            });
        }

        let body = resp.text().await.map_err(Error::Transport)?;
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}
