// ── Property bindings ──
//
// The widget-side contract: one binding per rendered property control.
// User edits are debounced (rapid changes coalesce into the last one)
// before being written through `ThingModel::set_property`; model updates
// are applied to the control only when the value actually changed, which
// breaks the write -> echo -> re-render feedback loop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::model::ThingModel;
use crate::notifier::ModelEventKind;

/// Quiet period after the last user edit before the write is issued.
const EDIT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Derive a stable, HTML-identifier-safe control id from a property name.
///
/// Every byte outside `[_A-Za-z0-9-]` becomes `_`; a leading digit or `-`
/// gets an extra `_` prefix. Deterministic, so the same property always
/// renders to the same id.
pub fn control_id_for(name: &str) -> String {
    let mut id: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if id.starts_with(|c: char| c.is_ascii_digit() || c == '-') || id.is_empty() {
        id.insert(0, '_');
    }
    id
}

/// Binds one UI control to one property of a [`ThingModel`].
pub struct PropertyBinding {
    name: String,
    label: String,
    control_id: String,
    value: Arc<Mutex<Option<Value>>>,
    applied: Arc<AtomicUsize>,
    edits_tx: mpsc::UnboundedSender<Value>,
    cancel: CancellationToken,
}

impl PropertyBinding {
    /// Create a binding for `name` and attach it to the model.
    ///
    /// The display label comes from the descriptor's `title` when present,
    /// otherwise the property name is used as-is. Subscribes to property
    /// status and spawns the debounced write task.
    pub fn attach(name: &str, model: &Arc<ThingModel>) -> Self {
        let label = model
            .property_schema()
            .get(name)
            .and_then(|d| d.title.clone())
            .unwrap_or_else(|| name.to_string());

        let value = Arc::new(Mutex::new(None));
        let applied = Arc::new(AtomicUsize::new(0));
        let (edits_tx, edits_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        // Model -> control: apply only when the value differs from what
        // the control already shows.
        {
            let value = Arc::clone(&value);
            let applied = Arc::clone(&applied);
            let property = name.to_string();
            model.subscribe(ModelEventKind::PropertyStatus, move |payload| {
                let Some(incoming) = payload.get(&property) else {
                    return;
                };
                let mut current = value.lock().unwrap_or_else(PoisonError::into_inner);
                if current.as_ref() != Some(incoming) {
                    *current = Some(incoming.clone());
                    applied.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        tokio::spawn(debounced_writes(
            name.to_string(),
            Arc::clone(model),
            edits_rx,
            cancel.clone(),
        ));

        Self {
            name: name.to_string(),
            label,
            control_id: control_id_for(name),
            value,
            applied,
            edits_tx,
            cancel,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn control_id(&self) -> &str {
        &self.control_id
    }

    /// The control's current value, if any update or edit has set one.
    pub fn value(&self) -> Option<Value> {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many model updates were actually applied to the control
    /// (redundant values are skipped and not counted).
    pub fn updates_applied(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }

    /// Record a user edit.
    ///
    /// The control reflects the edit immediately; the remote write fires
    /// once the edits go quiet for the debounce window, carrying only the
    /// last value of the burst.
    pub fn set_value(&self, value: Value) {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = Some(value.clone());
        // Receiver only drops after detach; a send error then is moot.
        let _ = self.edits_tx.send(value);
    }

    /// Stop the write task. The binding keeps its last value.
    pub fn detach(&self) {
        self.cancel.cancel();
    }
}

impl Drop for PropertyBinding {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Debounce loop: wait for an edit, coalesce the burst, write the last
/// value. Write failures are logged and swallowed -- the next edit
/// simply tries again.
async fn debounced_writes(
    name: String,
    model: Arc<ThingModel>,
    mut edits_rx: mpsc::UnboundedReceiver<Value>,
    cancel: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            edit = edits_rx.recv() => edit,
        };
        let Some(mut latest) = first else { return };

        // Trailing debounce: each further edit restarts the quiet window.
        let mut channel_open = true;
        while channel_open {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                edit = edits_rx.recv() => match edit {
                    Some(v) => latest = v,
                    None => channel_open = false,
                },
                () = tokio::time::sleep(EDIT_DEBOUNCE) => break,
            }
        }

        if let Err(e) = model.set_property(&name, latest).await {
            warn!(property = %name, error = %e, "Debounced property write failed");
        }

        if !channel_open {
            return;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
