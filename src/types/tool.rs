//! Tool descriptor types for the capability registry

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::now_millis;

/// Metadata describing an invocable capability
///
/// `name` is the unique key (case-sensitive). `usage_count` and
/// `success_rate` are maintained by the registry through
/// [`ToolRegistry::record_invocation`]; `success_rate` always stays
/// within `[0.0, 1.0]`.
///
/// [`ToolRegistry::record_invocation`]: crate::registry::ToolRegistry::record_invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,

    pub category: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    pub version: String,

    /// JSON schema describing accepted input
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,

    /// JSON schema describing produced output
    #[serde(rename = "outputSchema", default)]
    pub output_schema: Value,

    #[serde(rename = "usageCount", default)]
    pub usage_count: u64,

    #[serde(rename = "successRate", default)]
    pub success_rate: f64,

    #[serde(rename = "registeredAt", default)]
    pub registered_at: i64,

    #[serde(rename = "updatedAt", default)]
    pub updated_at: i64,
}

impl ToolDescriptor {
    /// Create a descriptor with empty schemas and zeroed usage statistics
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        let now = now_millis();
        Self {
            name: name.into(),
            category: category.into(),
            tags: Vec::new(),
            version: version.into(),
            input_schema: Value::Null,
            output_schema: Value::Null,
            usage_count: 0,
            success_rate: 0.0,
            registered_at: now,
            updated_at: now,
        }
    }

    /// Set discovery tags
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Set the input schema
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Set the output schema
    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = schema;
        self
    }
}

/// Predicate for [`ToolRegistry::find`]; all set fields must match
///
/// [`ToolRegistry::find`]: crate::registry::ToolRegistry::find
#[derive(Debug, Clone, Default)]
pub struct ToolQuery {
    /// Exact category match
    pub category: Option<String>,
    /// Every listed tag must be present on the descriptor
    pub tags: Vec<String>,
    /// Case-sensitive substring of the tool name
    pub name_pattern: Option<String>,
}

impl ToolQuery {
    /// Query matching every registered tool
    pub fn any() -> Self {
        Self::default()
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn name_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.name_pattern = Some(pattern.into());
        self
    }

    /// Check whether a descriptor satisfies every set predicate
    pub fn matches(&self, descriptor: &ToolDescriptor) -> bool {
        if let Some(category) = &self.category {
            if &descriptor.category != category {
                return false;
            }
        }
        if !self.tags.iter().all(|t| descriptor.tags.contains(t)) {
            return false;
        }
        if let Some(pattern) = &self.name_pattern {
            if !descriptor.name.contains(pattern.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Aggregate registry snapshot, computed on demand
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryStats {
    #[serde(rename = "totalTools")]
    pub total_tools: usize,
    #[serde(rename = "totalCategories")]
    pub total_categories: usize,
    #[serde(rename = "averageSuccessRate")]
    pub average_success_rate: f64,
}
