// ── Model event notifier ──
//
// Minimal publish/subscribe component held by the ThingModel (composition,
// not a base class). Dispatch is synchronous and in registration order.

use std::sync::Mutex;

use thingly_api::JsonMap;

/// The two kinds of model notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelEventKind {
    /// Full current property map after a reconciliation pass.
    PropertyStatus,
    /// Delta of newly observed events (schema-known keys only).
    EventOccurred,
}

type Handler = Box<dyn Fn(&JsonMap) + Send + Sync>;

/// Subscriber registry for model notifications.
///
/// Subscription is permissive -- any kind is accepted -- but dispatch only
/// fires handlers registered for the notified kind, synchronously, in
/// registration order.
#[derive(Default)]
pub struct Notifier {
    handlers: Mutex<Vec<(ModelEventKind, Handler)>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind.
    pub fn subscribe<F>(&self, kind: ModelEventKind, handler: F)
    where
        F: Fn(&JsonMap) + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((kind, Box::new(handler)));
    }

    /// Invoke every handler registered for `kind`, in registration order.
    ///
    /// Runs under the registry lock: handlers must not subscribe or notify
    /// from inside a handler.
    pub fn notify(&self, kind: ModelEventKind, payload: &JsonMap) {
        let handlers = self
            .handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for (registered, handler) in handlers.iter() {
            if *registered == kind {
                handler(payload);
            }
        }
    }

    /// Drop all registrations.
    pub fn cleanup(&self) {
        self.handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }

    /// Number of registered handlers (all kinds).
    pub fn handler_count(&self) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("handlers", &self.handler_count())
            .finish()
    }
}
