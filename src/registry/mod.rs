//! Tool Registry
//!
//! Thread-safe catalog of invocable capabilities. Registration, discovery,
//! and invocation bookkeeping all go through a single registry-wide
//! read/write lock: reads run concurrently, any write excludes everything
//! else. Registry traffic is metadata-only and infrequent relative to
//! event traffic, so one lock is enough.
//!
//! The registry is independent of the event store; integrators that want
//! `tool_registered` / `tool_invoked` events on the bus wire the lifecycle
//! hook to `MessageBus::publish` themselves.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info};

use crate::types::{RegistryStats, ToolDescriptor, ToolQuery};
use crate::utils::now_millis;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur in ToolRegistry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A tool with this exact (case-sensitive) name already exists
    #[error("tool '{0}' is already registered")]
    DuplicateName(String),

    /// No tool with this name is registered
    #[error("tool '{0}' not found")]
    NotFound(String),

    /// The descriptor failed input validation
    #[error("invalid tool descriptor: {0}")]
    InvalidDescriptor(String),
}

/// Lifecycle notifications emitted by the registry
#[derive(Debug, Clone)]
pub enum ToolLifecycle {
    Registered { name: String, category: String },
    Unregistered { name: String },
    Invoked { name: String, succeeded: bool },
}

/// Fire-and-forget callback for lifecycle notifications; must never block
pub type LifecycleHook = Arc<dyn Fn(&ToolLifecycle) + Send + Sync>;

/// Thread-safe catalog of named capabilities
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, ToolDescriptor>>,
    lifecycle_hook: RwLock<Option<LifecycleHook>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the lifecycle side channel
    pub fn set_lifecycle_hook(&self, hook: LifecycleHook) {
        *self.lifecycle_hook.write() = Some(hook);
    }

    /// Register a capability.
    ///
    /// The stored descriptor always starts with zeroed usage statistics
    /// and fresh timestamps, whatever the caller passed in.
    pub fn register(&self, descriptor: ToolDescriptor) -> RegistryResult<()> {
        if descriptor.name.trim().is_empty() {
            return Err(RegistryError::InvalidDescriptor(
                "tool name must not be empty".to_string(),
            ));
        }

        let mut descriptor = descriptor;
        descriptor.usage_count = 0;
        descriptor.success_rate = 0.0;
        descriptor.registered_at = now_millis();
        descriptor.updated_at = descriptor.registered_at;

        let name = descriptor.name.clone();
        let category = descriptor.category.clone();

        {
            let mut tools = self.tools.write();
            if tools.contains_key(&name) {
                return Err(RegistryError::DuplicateName(name));
            }
            tools.insert(name.clone(), descriptor);
        }

        info!(tool = %name, category = %category, "registered tool");
        self.notify(ToolLifecycle::Registered { name, category });
        Ok(())
    }

    /// Remove a capability
    pub fn unregister(&self, name: &str) -> RegistryResult<()> {
        {
            let mut tools = self.tools.write();
            if tools.remove(name).is_none() {
                return Err(RegistryError::NotFound(name.to_string()));
            }
        }

        info!(tool = %name, "unregistered tool");
        self.notify(ToolLifecycle::Unregistered {
            name: name.to_string(),
        });
        Ok(())
    }

    /// Fetch one descriptor by exact name
    pub fn get(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools.read().get(name).cloned()
    }

    /// All descriptors matching the query; an empty result is not an error
    pub fn find(&self, query: &ToolQuery) -> Vec<ToolDescriptor> {
        let tools = self.tools.read();
        let mut matches: Vec<ToolDescriptor> = tools
            .values()
            .filter(|d| query.matches(d))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.name.cmp(&b.name));
        matches
    }

    /// Record one invocation outcome.
    ///
    /// `success_rate` is a running weighted average:
    /// `new = (old * count + outcome) / (count + 1)`.
    pub fn record_invocation(&self, name: &str, succeeded: bool) -> RegistryResult<()> {
        {
            let mut tools = self.tools.write();
            let descriptor = tools
                .get_mut(name)
                .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

            let outcome = if succeeded { 1.0 } else { 0.0 };
            let old_count = descriptor.usage_count as f64;
            descriptor.usage_count += 1;
            descriptor.success_rate = (descriptor.success_rate * old_count + outcome)
                / descriptor.usage_count as f64;
            descriptor.success_rate = descriptor.success_rate.clamp(0.0, 1.0);
            descriptor.updated_at = now_millis();
        }

        debug!(tool = %name, succeeded, "recorded invocation");
        self.notify(ToolLifecycle::Invoked {
            name: name.to_string(),
            succeeded,
        });
        Ok(())
    }

    /// Aggregate snapshot, computed on demand
    pub fn stats(&self) -> RegistryStats {
        let tools = self.tools.read();
        let total_tools = tools.len();
        let categories: HashSet<&str> = tools.values().map(|d| d.category.as_str()).collect();
        let average_success_rate = if total_tools == 0 {
            0.0
        } else {
            tools.values().map(|d| d.success_rate).sum::<f64>() / total_tools as f64
        };

        RegistryStats {
            total_tools,
            total_categories: categories.len(),
            average_success_rate,
        }
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn notify(&self, lifecycle: ToolLifecycle) {
        if let Some(hook) = self.lifecycle_hook.read().clone() {
            hook(&lifecycle);
        }
    }
}
