//! Integration tests for the agent bus
//!
//! Exercises the bus, registry, and monitor together on a real on-disk
//! store: concurrent publishing, subscription semantics, automatic
//! recovery under a live monitor, and registry-to-bus wiring.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

use agent_bus::{
    Event, EventHandler, EventStore, EventStoreConfig, FnHandler, IntegrityAlert,
    IntegrityMonitor, MessageBus, MonitorConfig, ToolDescriptor, ToolLifecycle, ToolQuery,
    ToolRegistry,
};

/// Route bus and store logs through the test harness; `RUST_LOG` controls
/// verbosity
fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn open_bus(temp_dir: &TempDir) -> MessageBus {
    init_tracing();
    let config = EventStoreConfig::new(temp_dir.path().join("data"));
    MessageBus::new(Arc::new(EventStore::open(config).unwrap()))
}

fn counting_handler(name: &str, counter: Arc<AtomicUsize>) -> Arc<dyn EventHandler> {
    Arc::new(FnHandler::new(name, move |_: &Event| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_publishers_durable_and_delivered() {
    let temp_dir = TempDir::new().unwrap();
    let bus = Arc::new(open_bus(&temp_dir));

    let a_seen = Arc::new(AtomicUsize::new(0));
    let b_seen = Arc::new(AtomicUsize::new(0));
    let all_seen = Arc::new(AtomicUsize::new(0));
    bus.subscribe("load.a", counting_handler("a", a_seen.clone()));
    bus.subscribe("load.b", counting_handler("b", b_seen.clone()));
    bus.subscribe("load.*", counting_handler("all", all_seen.clone()));

    let mut tasks = Vec::new();
    for publisher in 0..50 {
        let bus = bus.clone();
        tasks.push(tokio::spawn(async move {
            let event_type = if publisher % 2 == 0 { "load.a" } else { "load.b" };
            for i in 0..20 {
                bus.publish(event_type, json!({ "publisher": publisher, "i": i }))
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Every event is durable and every subscriber saw exactly its subset
    assert_eq!(bus.store().replay(None).count(), 1000);
    assert_eq!(a_seen.load(Ordering::SeqCst), 500);
    assert_eq!(b_seen.load(Ordering::SeqCst), 500);
    assert_eq!(all_seen.load(Ordering::SeqCst), 1000);

    let report = bus.store().validate().unwrap();
    assert!(report.valid);
    assert_eq!(report.event_count, 1000);
}

#[tokio::test]
async fn test_subscribe_publish_unsubscribe() {
    let temp_dir = TempDir::new().unwrap();
    let bus = open_bus(&temp_dir);

    let seen = Arc::new(AtomicUsize::new(0));
    let handle = bus.subscribe("task.*", counting_handler("counter", seen.clone()));

    bus.publish("task.created", json!({})).await.unwrap();
    bus.publish("plan.updated", json!({})).await.unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    assert!(bus.unsubscribe(handle));
    assert!(!bus.unsubscribe(handle));

    bus.publish("task.created", json!({})).await.unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    // The event was still persisted despite having no subscribers
    assert_eq!(bus.history(Some("task.created"), None).count(), 2);
}

#[tokio::test]
async fn test_handler_failure_does_not_affect_others_or_durability() {
    let temp_dir = TempDir::new().unwrap();
    let bus = open_bus(&temp_dir);

    bus.subscribe(
        "task.*",
        Arc::new(FnHandler::new("flaky", |_: &Event| {
            Err("simulated handler failure".into())
        })),
    );
    let seen = Arc::new(AtomicUsize::new(0));
    bus.subscribe("task.*", counting_handler("steady", seen.clone()));

    let event = bus.publish("task.created", json!({})).await.unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(bus.store().replay(None).count(), 1);
    assert_eq!(event.event_id, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_monitor_recovers_while_bus_stays_up() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let config = EventStoreConfig::new(temp_dir.path().join("data"));
    let store = Arc::new(EventStore::open(config.clone()).unwrap());
    let bus = MessageBus::new(store.clone());

    for i in 0..5 {
        bus.publish("task.created", json!({ "i": i })).await.unwrap();
    }

    // Corrupt the live log out from under the store
    let mut file = OpenOptions::new()
        .append(true)
        .open(config.events_path())
        .unwrap();
    writeln!(file, "}}garbage{{").unwrap();

    let alerts = Arc::new(Mutex::new(Vec::new()));
    let monitor =
        IntegrityMonitor::with_config(store.clone(), MonitorConfig::with_interval(Duration::from_millis(20)));
    {
        let alerts = alerts.clone();
        monitor.set_alert_hook(Arc::new(move |alert: &IntegrityAlert| {
            alerts.lock().push(format!("{:?}", alert));
        }));
    }
    let handle = monitor.spawn();

    tokio::time::sleep(Duration::from_millis(200)).await;

    // The store is healthy again and the bus keeps accepting events
    assert!(store.validate().unwrap().valid);
    bus.publish("task.created", json!({ "post": "recovery" }))
        .await
        .unwrap();

    handle.stop().await;

    let alerts = alerts.lock();
    assert!(alerts.iter().any(|a| a.contains("CorruptionDetected")));
    assert!(alerts.iter().any(|a| a.contains("Recovered")));
}

#[tokio::test]
async fn test_registry_lifecycle_published_to_bus() {
    let temp_dir = TempDir::new().unwrap();
    let bus = Arc::new(open_bus(&temp_dir));
    let registry = ToolRegistry::new();

    // Bridge lifecycle notifications onto the bus through a channel; the
    // hook itself must stay synchronous and non-blocking.
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    registry.set_lifecycle_hook(Arc::new(move |lifecycle: &ToolLifecycle| {
        let _ = tx.send(lifecycle.clone());
    }));

    registry
        .register(ToolDescriptor::new("summarize", "text", "1.0.0"))
        .unwrap();
    registry.record_invocation("summarize", true).unwrap();
    registry.unregister("summarize").unwrap();

    rx.close();
    while let Some(lifecycle) = rx.recv().await {
        let (event_type, data) = match lifecycle {
            ToolLifecycle::Registered { name, category } => {
                ("tool.registered", json!({ "name": name, "category": category }))
            }
            ToolLifecycle::Invoked { name, succeeded } => {
                ("tool.invoked", json!({ "name": name, "succeeded": succeeded }))
            }
            ToolLifecycle::Unregistered { name } => {
                ("tool.unregistered", json!({ "name": name }))
            }
        };
        bus.publish(event_type, data).await.unwrap();
    }

    let history: Vec<_> = bus.history(None, None).collect();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].event_type, "tool.registered");
    assert_eq!(history[1].event_type, "tool.invoked");
    assert_eq!(history[2].event_type, "tool.unregistered");
}

#[test]
fn test_registry_usage_statistics() {
    init_tracing();
    let registry = ToolRegistry::new();
    registry
        .register(
            ToolDescriptor::new("search_code", "code", "2.1.0")
                .with_tags(vec!["search".to_string()]),
        )
        .unwrap();
    registry
        .register(ToolDescriptor::new("format_code", "code", "1.0.0"))
        .unwrap();

    for _ in 0..3 {
        registry.record_invocation("search_code", true).unwrap();
    }
    registry.record_invocation("search_code", false).unwrap();

    let tool = registry.get("search_code").unwrap();
    assert_eq!(tool.usage_count, 4);
    assert!((tool.success_rate - 0.75).abs() < 1e-9);

    let code_tools = registry.find(&ToolQuery::any().category("code"));
    assert_eq!(code_tools.len(), 2);

    let stats = registry.stats();
    assert_eq!(stats.total_tools, 2);
    assert_eq!(stats.total_categories, 1);
    assert!((stats.average_success_rate - 0.375).abs() < 1e-9);
}
