// ── ThingModel ──
//
// Owns one remote thing's live state: the property cache, the event log,
// and the push-channel subscription. Mediates between the HTTP control
// channel and the WebSocket push channel; both feed the same
// reconciliation routine, so widgets see a single notification stream.
//
// Concurrency: state lives behind one Mutex and every mutation runs to
// completion under the lock before notifying. Cross-call ordering between
// an in-flight write and an inbound push is last-writer-wins; there is no
// versioning and no cancellation of in-flight requests.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::try_join_all;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use thingly_api::stream::{ws_url, StreamMessage, ThingStream};
use thingly_api::{JsonMap, ThingsClient};

use crate::config::GatewayConfig;
use crate::description::{EventDescriptor, PropertyDescriptor, PropertyType, ThingDescription};
use crate::error::CoreError;
use crate::notifier::{ModelEventKind, Notifier};

struct ModelState {
    /// Last-known property values. Keys are always a subset of the schema.
    properties: JsonMap,
    /// Append-only log of observed events, oldest first. Unbounded.
    events: Vec<(String, Value)>,
}

/// Live-state model for one remote thing.
///
/// Constructed from the gateway's description document. Schemas are
/// immutable after construction; the property cache and event log are
/// mutated only through reconciliation.
pub struct ThingModel {
    id: String,
    name: String,
    href: String,
    events_href: Option<String>,
    property_schema: indexmap::IndexMap<String, PropertyDescriptor>,
    event_schema: indexmap::IndexMap<String, EventDescriptor>,
    state: Mutex<ModelState>,
    notifier: Notifier,
    client: ThingsClient,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ThingModel {
    /// Build the model state machine without opening the push channel or
    /// issuing the initial fetches.
    ///
    /// Embedders that want the full lifecycle should use
    /// [`start`](Self::start); this constructor exists so the
    /// reconciliation machinery can be driven directly.
    pub fn new(description: ThingDescription, client: ThingsClient) -> Arc<Self> {
        let events_href = description.events_href().map(str::to_string);

        Arc::new(Self {
            id: description.id(),
            name: description.name,
            href: description.href,
            events_href,
            property_schema: description.properties,
            event_schema: description.events,
            state: Mutex::new(ModelState {
                properties: JsonMap::new(),
                events: Vec::new(),
            }),
            notifier: Notifier::new(),
            client,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Construct the model and bring it live: open the push channel and
    /// kick off the two initial reconciliations (event log, property
    /// values).
    ///
    /// Returns as soon as the background tasks are spawned -- the fetches
    /// resolve lazily and fold into state whenever they complete. A push
    /// channel that fails to open is logged and left closed (no retry).
    pub fn start(
        config: &GatewayConfig,
        description: ThingDescription,
    ) -> Result<Arc<Self>, CoreError> {
        let http = config.transport().build_authorized_client(&config.token)?;
        let client = ThingsClient::new(config.url.clone(), http);

        let model = Self::new(description, client);
        model.open_stream(config);
        model.spawn_initial_refresh();
        Ok(model)
    }

    // ── Accessors ────────────────────────────────────────────────────

    /// Stable identity, derived from the final path segment of the
    /// resource address.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn href(&self) -> &str {
        &self.href
    }

    pub fn property_schema(&self) -> &indexmap::IndexMap<String, PropertyDescriptor> {
        &self.property_schema
    }

    pub fn event_schema(&self) -> &indexmap::IndexMap<String, EventDescriptor> {
        &self.event_schema
    }

    /// Snapshot of the current property cache.
    pub fn properties(&self) -> JsonMap {
        self.state().properties.clone()
    }

    /// Snapshot of the event log, oldest first.
    pub fn events(&self) -> Vec<(String, Value)> {
        self.state().events.clone()
    }

    /// Register a handler for model notifications.
    pub fn subscribe<F>(&self, kind: ModelEventKind, handler: F)
    where
        F: Fn(&JsonMap) + Send + Sync + 'static,
    {
        self.notifier.subscribe(kind, handler);
    }

    // ── Property operations ──────────────────────────────────────────

    /// Write one property to the remote thing.
    ///
    /// Rejects before any network call if `name` is not in the schema.
    /// The value is coerced per the schema's declared type; the gateway's
    /// echo of the updated values is folded through the standard
    /// reconciliation on success.
    pub async fn set_property(&self, name: &str, value: Value) -> Result<(), CoreError> {
        let Some(descriptor) = self.property_schema.get(name) else {
            return Err(CoreError::UnknownProperty {
                name: name.to_string(),
            });
        };

        let coerced = coerce_value(name, descriptor.kind, value)?;

        match self.client.put_property(&descriptor.href, name, &coerced).await {
            Ok(echoed) => {
                debug!(property = name, "Property write accepted");
                self.handle_property_status(&echoed);
                Ok(())
            }
            Err(e) => {
                warn!(property = name, error = %e, "Property write failed");
                Err(CoreError::PropertyWriteFailed {
                    name: name.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Re-read every property from the gateway, one GET per property, all
    /// in parallel.
    ///
    /// All-or-nothing: if any single read fails the whole batch fails and
    /// nothing is folded in. On success every response is merged into one
    /// map and reconciled in a single pass.
    pub async fn update_properties(&self) -> Result<(), CoreError> {
        let fetches: Vec<_> = self
            .property_schema
            .values()
            .map(|descriptor| self.client.get_property(&descriptor.href))
            .collect();

        match try_join_all(fetches).await {
            Ok(responses) => {
                let mut merged = JsonMap::new();
                for map in responses {
                    merged.extend(map);
                }
                self.handle_property_status(&merged);
                Ok(())
            }
            Err(e) => {
                warn!(thing = %self.id, error = %e, "Property refresh failed");
                Err(CoreError::PropertyReadFailed {
                    message: e.to_string(),
                })
            }
        }
    }

    /// Re-read the event log from the gateway, replacing the in-memory
    /// list wholesale (a full resync, unlike live event reconciliation).
    ///
    /// No-op when the description carried no events link.
    pub async fn update_events(&self) -> Result<(), CoreError> {
        let Some(href) = &self.events_href else {
            return Ok(());
        };

        match self.client.get_events(href).await {
            Ok(entries) => {
                let log: Vec<(String, Value)> = entries.into_iter().flatten().collect();
                self.state().events = log;
                Ok(())
            }
            Err(e) => {
                warn!(thing = %self.id, error = %e, "Event refresh failed");
                Err(CoreError::EventsReadFailed {
                    message: e.to_string(),
                })
            }
        }
    }

    // ── Reconciliation ───────────────────────────────────────────────

    /// Fold an incoming partial property map into the cache.
    ///
    /// Keys absent from the schema are silently dropped; a `null` value
    /// is "no information", never a clear. Subscribers then receive the
    /// ENTIRE current property map, not the delta -- widgets are expected
    /// to skip values that did not change.
    pub fn handle_property_status(&self, incoming: &JsonMap) {
        let snapshot = {
            let mut state = self.state();
            for (key, value) in incoming {
                if !self.property_schema.contains_key(key) {
                    debug!(thing = %self.id, property = %key, "Dropping unknown property");
                    continue;
                }
                if value.is_null() {
                    continue;
                }
                state.properties.insert(key.clone(), value.clone());
            }
            state.properties.clone()
        };

        self.notifier.notify(ModelEventKind::PropertyStatus, &snapshot);
    }

    /// Append incoming events to the log and notify with the delta.
    ///
    /// Only schema-known event names are kept, in encounter order. The
    /// notification payload is the delta alone -- deliberately asymmetric
    /// with property status, which emits full state.
    pub fn handle_event(&self, incoming: &JsonMap) {
        let delta = {
            let mut state = self.state();
            let mut delta = JsonMap::new();
            for (key, value) in incoming {
                if !self.event_schema.contains_key(key) {
                    continue;
                }
                state.events.push((key.clone(), value.clone()));
                delta.insert(key.clone(), value.clone());
            }
            delta
        };

        self.notifier.notify(ModelEventKind::EventOccurred, &delta);
    }

    // ── Thing lifecycle ──────────────────────────────────────────────

    /// Replace thing metadata (name, layout, etc. -- not properties).
    ///
    /// Local state is untouched on success; callers refresh separately.
    pub async fn update_thing(&self, updates: &Value) -> Result<(), CoreError> {
        self.client
            .update_thing(&self.href, updates)
            .await
            .map_err(|e| {
                warn!(thing = %self.id, error = %e, "Thing update rejected");
                CoreError::UpdateRejected {
                    message: status_text(&e),
                }
            })
    }

    /// Delete the thing from the gateway, then tear the model down.
    ///
    /// On failure local state is left untouched and the push channel
    /// stays open -- callers must not assume cleanup happened.
    pub async fn remove_thing(&self) -> Result<(), CoreError> {
        match self.client.remove_thing(&self.href).await {
            Ok(()) => {
                self.stop();
                Ok(())
            }
            Err(e) => {
                warn!(thing = %self.id, error = %e, "Thing removal rejected");
                Err(CoreError::RemoveRejected {
                    message: status_text(&e),
                })
            }
        }
    }

    /// Tear down: close the push channel, stop background tasks, and
    /// release all subscribers. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
        for task in self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
        self.notifier.cleanup();
    }

    // ── Background tasks ─────────────────────────────────────────────

    /// Open the push channel and forward its messages into reconciliation.
    ///
    /// A connect failure is terminal: logged, never retried.
    fn open_stream(self: &Arc<Self>, config: &GatewayConfig) {
        let url = match ws_url(&config.url, &self.href, &config.token) {
            Ok(url) => url,
            Err(e) => {
                warn!(thing = %self.id, error = %e, "Cannot derive push-channel URL");
                return;
            }
        };

        let event_names: Vec<String> = self.event_schema.keys().cloned().collect();
        let model = Arc::clone(self);
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            let stream = match ThingStream::connect(url, event_names, cancel.clone()).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(thing = %model.id, error = %e, "Push channel failed to open");
                    return;
                }
            };

            let mut rx = stream.subscribe();
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Ok(msg) => match msg.as_ref() {
                            StreamMessage::PropertyStatus(map) => {
                                model.handle_property_status(map);
                            }
                            StreamMessage::Event(map) => model.handle_event(map),
                        },
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(thing = %model.id, skipped, "Push channel consumer lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Kick off the two independent, unordered initial reconciliations.
    fn spawn_initial_refresh(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);

        let model = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            // Failures are logged inside; initial refresh is best-effort.
            let _ = model.update_events().await;
        }));

        let model = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let _ = model.update_properties().await;
        }));
    }

    fn state(&self) -> MutexGuard<'_, ModelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ThingModel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for ThingModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThingModel")
            .field("id", &self.id)
            .field("href", &self.href)
            .field("properties", &self.property_schema.len())
            .field("events", &self.event_schema.len())
            .finish()
    }
}

/// The remote status text behind an api error, for rejection messages.
fn status_text(err: &thingly_api::Error) -> String {
    match err {
        thingly_api::Error::Status { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

// ── Value coercion ───────────────────────────────────────────────────

/// Coerce a value according to the property's declared type.
///
/// Unparseable numeric coercions are rejected with
/// [`CoreError::InvalidPropertyValue`] rather than silently shipping NaN.
/// Boolean coercion follows JS truthiness (`false`, `0`, `""`, `null` are
/// false; everything else is true). String and untyped properties pass
/// through unchanged.
fn coerce_value(name: &str, kind: PropertyType, value: Value) -> Result<Value, CoreError> {
    match kind {
        PropertyType::Number => coerce_number(name, &value),
        PropertyType::Integer => coerce_integer(name, &value),
        PropertyType::Boolean => Ok(Value::Bool(truthy(&value))),
        PropertyType::String | PropertyType::Other => Ok(value),
    }
}

fn coerce_number(name: &str, value: &Value) -> Result<Value, CoreError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    parsed
        .filter(|f| f.is_finite())
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| CoreError::InvalidPropertyValue {
            name: name.to_string(),
            reason: format!("{value} is not a number"),
        })
}

fn coerce_integer(name: &str, value: &Value) -> Result<Value, CoreError> {
    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
        }
        _ => None,
    };

    parsed
        .map(|i| Value::Number(i.into()))
        .ok_or_else(|| CoreError::InvalidPropertyValue {
            name: name.to_string(),
            reason: format!("{value} is not an integer"),
        })
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ── Tests ────────────────────────────────────────────────────────────
