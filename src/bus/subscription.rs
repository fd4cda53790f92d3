//! Subscription registry
//!
//! Holds the `{pattern -> handlers}` bindings behind a lock of its own,
//! independent from the store lock, so dispatch never contends with
//! persistence. Handles are opaque ids; the registry keeps no ownership
//! over subscriber lifetimes beyond the handler trait object itself.

use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use super::EventHandler;

/// Opaque handle identifying one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(Uuid);

impl SubscriptionHandle {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Match an event type against a subscription pattern.
///
/// Supported patterns: an exact type, the global wildcard `*`, or a
/// trailing segment wildcard like `task.*` (matching `task.created` but
/// not `taskforce.created`).
pub fn pattern_matches(pattern: &str, event_type: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return event_type
            .strip_prefix(prefix)
            .map(|rest| rest.starts_with('.'))
            .unwrap_or(false);
    }
    pattern == event_type
}

struct SubscriptionEntry {
    handle: SubscriptionHandle,
    pattern: String,
    handler: Arc<dyn EventHandler>,
}

/// Thread-safe registry of active subscriptions
///
/// Entries are kept in subscription order, which is the delivery order.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<Vec<SubscriptionEntry>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; subscription order is the delivery order
    pub fn add(&self, pattern: &str, handler: Arc<dyn EventHandler>) -> SubscriptionHandle {
        let handle = SubscriptionHandle::new();
        self.entries.write().push(SubscriptionEntry {
            handle,
            pattern: pattern.to_string(),
            handler,
        });
        handle
    }

    /// Remove a subscription; idempotent, returns whether it was present
    pub fn remove(&self, handle: SubscriptionHandle) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.handle != handle);
        entries.len() < before
    }

    /// Whether a subscription is still active
    pub fn contains(&self, handle: SubscriptionHandle) -> bool {
        self.entries.read().iter().any(|e| e.handle == handle)
    }

    /// Handlers matching an event type, in subscription order
    pub fn matching(
        &self,
        event_type: &str,
    ) -> Vec<(SubscriptionHandle, Arc<dyn EventHandler>)> {
        self.entries
            .read()
            .iter()
            .filter(|e| pattern_matches(&e.pattern, event_type))
            .map(|e| (e.handle, e.handler.clone()))
            .collect()
    }

    /// Number of active subscriptions
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
