//! Message Bus
//!
//! Publish/subscribe dispatch layered on the [`EventStore`]. The contract
//! is durability precedes delivery: `publish` appends through the store
//! first and only then fans the event out to matching subscribers, so a
//! handler is never invoked for an event that failed to persist.
//!
//! Dispatch runs synchronously within the publish call, in subscription
//! order, with a per-handler timeout. Handler failures are isolated: they
//! are reported through the incident hook (and `tracing`), never back to
//! the publisher, and never stop delivery to the remaining handlers.

mod subscription;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::event_store::{EventStore, EventStoreError};
use crate::types::{Event, NewEvent};
use crate::utils::detect_agent_identity;

pub use subscription::{pattern_matches, SubscriptionHandle, SubscriptionRegistry};

/// Result type handlers return; errors are isolated by the bus
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A subscriber callback
///
/// Handlers must be cheap to clone behind an `Arc` and tolerant of
/// at-least-once delivery. A handler that errors or exceeds the bus
/// timeout is reported and skipped, not unsubscribed.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_event(&self, event: &Event) -> HandlerResult;

    /// Name used in logs and incident reports
    fn name(&self) -> &str {
        "handler"
    }
}

/// Adapter turning a plain closure into an [`EventHandler`]
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Event) -> HandlerResult + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Event) -> HandlerResult + Send + Sync,
{
    async fn on_event(&self, event: &Event) -> HandlerResult {
        (self.f)(event)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Errors surfaced to `publish` callers
///
/// Only persistence failures fail a publish; handler failures flow through
/// the incident hook instead.
#[derive(Debug, Error)]
pub enum BusError {
    #[error(transparent)]
    Store(#[from] EventStoreError),
}

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;

/// A dispatch failure, reported through the incident hook
#[derive(Debug, Clone)]
pub enum BusIncident {
    /// A handler returned an error
    HandlerError {
        event_id: u64,
        event_type: String,
        handler: String,
        message: String,
    },
    /// A handler exceeded the per-handler timeout; it stays subscribed
    HandlerTimeout {
        event_id: u64,
        event_type: String,
        handler: String,
        timeout: Duration,
    },
}

impl fmt::Display for BusIncident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusIncident::HandlerError {
                event_type,
                handler,
                message,
                ..
            } => write!(f, "handler '{}' failed on {}: {}", handler, event_type, message),
            BusIncident::HandlerTimeout {
                event_type,
                handler,
                timeout,
                ..
            } => write!(
                f,
                "handler '{}' timed out after {:?} on {}",
                handler, timeout, event_type
            ),
        }
    }
}

/// Fire-and-forget side channel for dispatch failures; must never block
pub type IncidentHook = Arc<dyn Fn(&BusIncident) + Send + Sync>;

/// Configuration for the MessageBus
#[derive(Clone)]
pub struct BusConfig {
    /// Identity stamped on events published through this bus
    pub source_agent: String,
    /// Per-handler delivery timeout
    pub handler_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            source_agent: detect_agent_identity(),
            handler_timeout: Duration::from_secs(5),
        }
    }
}

/// Publish/subscribe dispatch over a shared [`EventStore`]
pub struct MessageBus {
    store: Arc<EventStore>,
    subscriptions: SubscriptionRegistry,
    config: BusConfig,
    incident_hook: RwLock<Option<IncidentHook>>,
}

impl MessageBus {
    /// Create a bus over a shared store with default configuration
    pub fn new(store: Arc<EventStore>) -> Self {
        Self::with_config(store, BusConfig::default())
    }

    /// Create a bus with explicit configuration
    pub fn with_config(store: Arc<EventStore>, config: BusConfig) -> Self {
        Self {
            store,
            subscriptions: SubscriptionRegistry::new(),
            config,
            incident_hook: RwLock::new(None),
        }
    }

    /// Install the telemetry side channel for dispatch failures
    pub fn set_incident_hook(&self, hook: IncidentHook) {
        *self.incident_hook.write() = Some(hook);
    }

    /// The store this bus persists through
    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    /// Register a handler for an event type or wildcard pattern.
    ///
    /// Delivery order across handlers of one event follows subscription
    /// order.
    pub fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionHandle {
        let handle = self.subscriptions.add(pattern, handler);
        debug!(pattern, "subscribed handler");
        handle
    }

    /// Remove a subscription; idempotent.
    ///
    /// A handler mid-execution is not interrupted, but receives nothing
    /// further - not even later deliveries of a publish already in flight.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.subscriptions.remove(handle)
    }

    /// Number of active subscriptions
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Persist and dispatch an event.
    ///
    /// Returns once the append is durable and every matching handler has
    /// been offered the event (or timed out). An append failure surfaces
    /// to the caller and nothing is dispatched; it is never retried
    /// silently.
    pub async fn publish(&self, event_type: &str, data: Value) -> BusResult<Event> {
        self.publish_draft(
            NewEvent::new(event_type, data).with_source(self.config.source_agent.clone()),
        )
        .await
    }

    /// Persist and dispatch an event carrying a correlation id
    pub async fn publish_correlated(
        &self,
        event_type: &str,
        data: Value,
        correlation_id: Uuid,
    ) -> BusResult<Event> {
        self.publish_draft(
            NewEvent::new(event_type, data)
                .with_source(self.config.source_agent.clone())
                .with_correlation(correlation_id),
        )
        .await
    }

    /// Publish a fully prepared draft (callers that manage their own
    /// source identity)
    pub async fn publish_draft(&self, draft: NewEvent) -> BusResult<Event> {
        // Durability precedes delivery
        let event = self.store.append(draft)?;
        self.dispatch(&event).await;
        Ok(event)
    }

    /// Replay persisted events for late joiners, optionally filtered by
    /// type and lower-bound timestamp
    pub fn history(
        &self,
        event_type: Option<&str>,
        since: Option<i64>,
    ) -> impl Iterator<Item = Event> {
        let event_type = event_type.map(|s| s.to_string());
        self.store
            .replay(since)
            .filter(move |e| event_type.as_deref().map_or(true, |t| e.event_type == t))
    }

    async fn dispatch(&self, event: &Event) {
        // Snapshot of matching subscribers; no lock held across awaits
        let targets = self.subscriptions.matching(&event.event_type);

        for (handle, handler) in targets {
            // Unsubscribes issued while this publish is in flight take
            // effect for every not-yet-invoked handler
            if !self.subscriptions.contains(handle) {
                continue;
            }

            match timeout(self.config.handler_timeout, handler.on_event(event)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        event_id = event.event_id,
                        event_type = %event.event_type,
                        handler = handler.name(),
                        error = %e,
                        "handler failed; continuing dispatch"
                    );
                    self.report(BusIncident::HandlerError {
                        event_id: event.event_id,
                        event_type: event.event_type.clone(),
                        handler: handler.name().to_string(),
                        message: e.to_string(),
                    });
                }
                Err(_) => {
                    warn!(
                        event_id = event.event_id,
                        event_type = %event.event_type,
                        handler = handler.name(),
                        timeout = ?self.config.handler_timeout,
                        "handler timed out; continuing dispatch"
                    );
                    self.report(BusIncident::HandlerTimeout {
                        event_id: event.event_id,
                        event_type: event.event_type.clone(),
                        handler: handler.name().to_string(),
                        timeout: self.config.handler_timeout,
                    });
                }
            }
        }
    }

    fn report(&self, incident: BusIncident) {
        if let Some(hook) = self.incident_hook.read().clone() {
            hook(&incident);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::EventStoreConfig;
    use parking_lot::Mutex;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_bus() -> (Arc<MessageBus>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(
            EventStore::open(EventStoreConfig::new(temp_dir.path().join("data"))).unwrap(),
        );
        let config = BusConfig {
            source_agent: "test-agent".to_string(),
            handler_timeout: Duration::from_millis(200),
        };
        (Arc::new(MessageBus::with_config(store, config)), temp_dir)
    }

    fn recording_handler(log: Arc<Mutex<Vec<String>>>, tag: &str) -> Arc<dyn EventHandler> {
        let tag = tag.to_string();
        Arc::new(FnHandler::new(tag.clone(), move |event: &Event| {
            log.lock().push(format!("{}:{}", tag, event.event_type));
            Ok(())
        }))
    }

    #[tokio::test]
    async fn test_publish_delivers_exactly_once_in_order() {
        let (bus, _temp_dir) = test_bus();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe("task.created", recording_handler(log.clone(), "first"));
        bus.subscribe("task.created", recording_handler(log.clone(), "second"));
        bus.subscribe("task.done", recording_handler(log.clone(), "other"));

        bus.publish("task.created", json!({"id": 1})).await.unwrap();

        let delivered = log.lock().clone();
        assert_eq!(delivered, vec!["first:task.created", "second:task.created"]);
    }

    #[tokio::test]
    async fn test_wildcard_subscription() {
        let (bus, _temp_dir) = test_bus();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe("*", recording_handler(log.clone(), "all"));
        bus.subscribe("task.*", recording_handler(log.clone(), "tasks"));

        bus.publish("task.created", json!({})).await.unwrap();
        bus.publish("plan.ready", json!({})).await.unwrap();

        let delivered = log.lock().clone();
        assert_eq!(
            delivered,
            vec!["all:task.created", "tasks:task.created", "all:plan.ready"]
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let (bus, _temp_dir) = test_bus();
        let log = Arc::new(Mutex::new(Vec::new()));

        let handle = bus.subscribe("task.*", recording_handler(log.clone(), "h"));
        bus.publish("task.created", json!({})).await.unwrap();

        assert!(bus.unsubscribe(handle));
        assert!(!bus.unsubscribe(handle));

        bus.publish("task.created", json!({})).await.unwrap();
        assert_eq!(log.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_from_handler_skips_later_delivery() {
        let (bus, _temp_dir) = test_bus();
        let log = Arc::new(Mutex::new(Vec::new()));

        // The first handler removes the second mid-publish; the second must
        // not receive the event that is currently being dispatched
        let victim: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
        {
            let remover_bus = bus.clone();
            let victim = victim.clone();
            let log = log.clone();
            bus.subscribe(
                "task.*",
                Arc::new(FnHandler::new("remover", move |_: &Event| {
                    log.lock().push("remover".to_string());
                    if let Some(handle) = victim.lock().take() {
                        remover_bus.unsubscribe(handle);
                    }
                    Ok(())
                })),
            );
        }
        let handle = bus.subscribe("task.*", recording_handler(log.clone(), "victim"));
        *victim.lock() = Some(handle);

        bus.publish("task.created", json!({})).await.unwrap();

        assert_eq!(log.lock().clone(), vec!["remover"]);
        assert_eq!(bus.subscription_count(), 1);

        // Subsequent publishes only reach the surviving handler
        bus.publish("task.created", json!({})).await.unwrap();
        assert_eq!(log.lock().clone(), vec!["remover", "remover"]);
    }

    #[tokio::test]
    async fn test_handler_error_is_isolated() {
        let (bus, _temp_dir) = test_bus();
        let log = Arc::new(Mutex::new(Vec::new()));
        let incidents = Arc::new(Mutex::new(Vec::new()));

        {
            let incidents = incidents.clone();
            bus.set_incident_hook(Arc::new(move |incident| {
                incidents.lock().push(incident.to_string());
            }));
        }

        bus.subscribe(
            "task.*",
            Arc::new(FnHandler::new("broken", |_: &Event| {
                Err("simulated failure".into())
            })),
        );
        bus.subscribe("task.*", recording_handler(log.clone(), "healthy"));

        let event = bus.publish("task.created", json!({})).await.unwrap();

        // Publish succeeded, healthy handler ran, incident was reported
        assert_eq!(event.event_id, 1);
        assert_eq!(log.lock().clone(), vec!["healthy:task.created"]);
        let reported = incidents.lock().clone();
        assert_eq!(reported.len(), 1);
        assert!(reported[0].contains("simulated failure"));
    }

    #[tokio::test]
    async fn test_handler_timeout_is_isolated_and_keeps_subscription() {
        let (bus, _temp_dir) = test_bus();
        let incidents = Arc::new(Mutex::new(Vec::new()));

        {
            let incidents = incidents.clone();
            bus.set_incident_hook(Arc::new(move |incident| {
                incidents.lock().push(incident.to_string());
            }));
        }

        struct SlowHandler;

        #[async_trait]
        impl EventHandler for SlowHandler {
            async fn on_event(&self, _event: &Event) -> HandlerResult {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            }

            fn name(&self) -> &str {
                "slow"
            }
        }

        bus.subscribe("task.*", Arc::new(SlowHandler));
        bus.publish("task.created", json!({})).await.unwrap();

        assert!(incidents.lock()[0].contains("timed out"));
        // Timed-out handlers are not auto-unsubscribed
        assert_eq!(bus.subscription_count(), 1);

        bus.publish("task.created", json!({})).await.unwrap();
        assert_eq!(incidents.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_append_dispatches_nothing() {
        let (bus, _temp_dir) = test_bus();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe("*", recording_handler(log.clone(), "h"));

        let err = bus.publish("  ", json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            BusError::Store(EventStoreError::InvalidEvent(_))
        ));
        assert!(log.lock().is_empty());
        assert_eq!(bus.store().event_count(), 0);
    }

    #[tokio::test]
    async fn test_history_filters_by_type() {
        let (bus, _temp_dir) = test_bus();

        bus.publish("task.created", json!({"n": 1})).await.unwrap();
        bus.publish("plan.ready", json!({})).await.unwrap();
        bus.publish("task.created", json!({"n": 2})).await.unwrap();

        let tasks: Vec<Event> = bus.history(Some("task.created"), None).collect();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].data["n"], 1);
        assert_eq!(tasks[1].data["n"], 2);

        assert_eq!(bus.history(None, None).count(), 3);
    }

    #[tokio::test]
    async fn test_correlation_id_round_trip() {
        let (bus, _temp_dir) = test_bus();

        let correlation = Uuid::new_v4();
        bus.publish_correlated("task.claimed", json!({}), correlation)
            .await
            .unwrap();

        let replayed: Vec<Event> = bus.history(None, None).collect();
        assert_eq!(replayed[0].correlation_id, Some(correlation));
    }
}
