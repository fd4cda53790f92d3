//! Event Store Module
//!
//! The durable, corruption-resistant core of the bus:
//! - `EventStore`: append-only log with atomic temp-validate-swap writes
//! - `BackupManager`: rotated pre-write copies of the live log
//! - `validate`: structural checks of a serialized log
//! - `StatsCollector`: on-demand storage metrics
//!
//! # Architecture
//!
//! ```text
//! Write Path (append / compact):
//! ┌─────────┐   ┌───────────┐   ┌──────────────┐   ┌──────────────┐
//! │ backup  │──►│ stage new │──►│ re-read and  │──►│ atomic rename│
//! │ live log│   │ log (.tmp)│   │ validate tmp │   │ over live log│
//! └─────────┘   └───────────┘   └──────────────┘   └──────────────┘
//!
//! Recovery Path:
//! ┌──────────────┐   ┌──────────────────┐   ┌──────────────────┐
//! │ newest backup│──►│ validate; older  │──►│ quarantine live, │
//! │ candidate    │   │ one on failure   │   │ swap backup in   │
//! └──────────────┘   └──────────────────┘   └──────────────────┘
//! ```
//!
//! A failed write at any stage leaves the live log byte-identical to its
//! pre-call state; readers never observe a partially written file.

mod backup;
mod lock;
mod stats;
mod store;
mod validate;

pub use backup::BackupManager;
pub use stats::{StatsCollector, StoreStats};
pub use store::{
    CompactionReport, EventStore, EventStoreConfig, EventStoreError, EventStoreResult,
    RecoveryReport, RetentionPolicy,
};
pub use validate::{validate_log_file, ValidationReport};
