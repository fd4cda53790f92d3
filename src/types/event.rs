//! Event types for the durable event log
//!
//! This module defines the core event record used by the append-only log.
//! Events are immutable: once appended they are never mutated, and their
//! order within the store is the append order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::utils::{detect_agent_identity, now_millis};

/// An immutable event in the event log
///
/// Events are the source of truth: subscribers react to them as they are
/// published, and late joiners rebuild context by replaying them in order.
/// Serialized as one JSON line (JSONL) in the on-disk log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique, auto-incrementing event ID (assigned by the store)
    #[serde(rename = "eventId")]
    pub event_id: u64,

    /// Type of event, dotted identifiers by convention (e.g. `task.created`)
    #[serde(rename = "eventType")]
    pub event_type: String,

    /// Wall-clock milliseconds since the Unix epoch; the store clamps this
    /// to be non-decreasing across appends
    #[serde(rename = "ts")]
    pub timestamp: i64,

    /// Identity of the producing agent
    #[serde(rename = "sourceAgent")]
    pub source_agent: String,

    /// Optional correlation id linking events in a causal chain
    #[serde(rename = "correlationId", skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,

    /// Event-specific payload
    pub data: Value,
}

impl Event {
    /// Parse the event data as a specific type
    pub fn parse_data<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }

    /// Serialize event to JSON string (for JSONL)
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize event from JSON string
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// A not-yet-persisted event, as handed to [`EventStore::append`]
///
/// The store assigns the event id and the (monotonic-safe) timestamp; the
/// producer supplies everything else.
///
/// [`EventStore::append`]: crate::event_store::EventStore::append
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: String,
    pub source_agent: String,
    pub correlation_id: Option<Uuid>,
    pub data: Value,
}

impl NewEvent {
    /// Create a new draft event with the producer identity detected from
    /// the environment
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            source_agent: detect_agent_identity(),
            correlation_id: None,
            data,
        }
    }

    /// Set the producing agent identity
    pub fn with_source(mut self, source_agent: impl Into<String>) -> Self {
        self.source_agent = source_agent.into();
        self
    }

    /// Attach a correlation id for causal chains
    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Materialize into an [`Event`] with a store-assigned id.
    ///
    /// `min_timestamp` is the timestamp of the previous event; the new
    /// timestamp never goes backwards even if the wall clock does.
    pub(crate) fn into_event(self, event_id: u64, min_timestamp: i64) -> Event {
        Event {
            event_id,
            event_type: self.event_type,
            timestamp: now_millis().max(min_timestamp),
            source_agent: self.source_agent,
            correlation_id: self.correlation_id,
            data: self.data,
        }
    }
}
