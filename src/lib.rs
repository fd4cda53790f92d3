//! Agent Bus
//!
//! Durable coordination core for multi-agent systems: a corruption-resistant
//! event log, a typed publish/subscribe bus on top of it, a tool capability
//! registry, and a background integrity monitor.
//!
//! # Features
//!
//! - **Durable Event Log**: append-only JSONL with atomic temp-validate-swap
//!   writes; a failed write never touches the live log
//! - **Backups & Recovery**: rotated pre-write backups, newest-valid restore,
//!   quarantine of corrupt logs for forensics
//! - **Pub/Sub Bus**: pattern subscriptions (`task.*`, `*`) with
//!   durability-precedes-delivery ordering and per-handler timeouts
//! - **Tool Registry**: capability catalog with usage statistics
//! - **Integrity Monitor**: periodic validation with automatic recovery
//!
//! # Modules
//!
//! - `types`: Core data structures (Event, ToolDescriptor, queries)
//! - `event_store`: Durable log, backups, validation, stats
//! - `bus`: MessageBus pub/sub layer
//! - `registry`: ToolRegistry capability catalog
//! - `monitor`: IntegrityMonitor background task
//! - `utils`: Atomic file writes, timestamps, agent identity
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use agent_bus::{EventStore, EventStoreConfig, FnHandler, MessageBus};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(EventStore::open(EventStoreConfig::new("./data"))?);
//!     let bus = MessageBus::new(store);
//!
//!     bus.subscribe(
//!         "task.*",
//!         Arc::new(FnHandler::new("logger", |event: &agent_bus::Event| {
//!             println!("{}: {}", event.event_type, event.data);
//!             Ok(())
//!         })),
//!     );
//!
//!     bus.publish("task.created", json!({ "task": "review PR" })).await?;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod event_store;
pub mod monitor;
pub mod registry;
pub mod types;
pub mod utils;

// Re-export commonly used items at crate root
pub use bus::{
    BusConfig, BusError, BusIncident, BusResult, EventHandler, FnHandler, HandlerResult,
    MessageBus, SubscriptionHandle,
};
pub use event_store::{
    CompactionReport, EventStore, EventStoreConfig, EventStoreError, EventStoreResult,
    RecoveryReport, RetentionPolicy, StatsCollector, StoreStats, ValidationReport,
};
pub use monitor::{IntegrityAlert, IntegrityMonitor, MonitorConfig, MonitorHandle};
pub use registry::{RegistryError, RegistryResult, ToolLifecycle, ToolRegistry};
pub use types::{Event, NewEvent, RegistryStats, ToolDescriptor, ToolQuery};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
