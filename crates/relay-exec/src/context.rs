//! Per-server mutable state owned by the tool executor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a server's context says about its execution surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextCapabilities {
    #[serde(default)]
    pub supports_rollback: bool,
    #[serde(default = "default_concurrency")]
    pub max_concurrent_calls: u32,
    #[serde(default)]
    pub supported_operations: Vec<String>,
}

fn default_concurrency() -> u32 {
    1
}

impl Default for ContextCapabilities {
    fn default() -> Self {
        Self {
            supports_rollback: false,
            max_concurrent_calls: 1,
            supported_operations: Vec::new(),
        }
    }
}

/// The last tool call recorded against a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastOperation {
    pub tool: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
}

/// Mutable per-server state: a type tag, the free-form default-argument map,
/// and operation bookkeeping.
#[derive(Debug, Clone)]
pub struct ServerContext {
    pub kind: String,
    /// Default arguments. Per-tool defaults may nest under
    /// `tools.<toolName>`; top-level keys apply to every tool.
    pub config: serde_json::Value,
    pub capabilities: ContextCapabilities,
    pub last_accessed: DateTime<Utc>,
    pub last_operation: Option<LastOperation>,
}

impl ServerContext {
    pub fn new(kind: &str, config: serde_json::Value) -> Self {
        Self {
            kind: kind.to_string(),
            config,
            capabilities: ContextCapabilities::default(),
            last_accessed: Utc::now(),
            last_operation: None,
        }
    }

    /// Look up a default for one field: the per-tool map wins over the
    /// server-wide map.
    pub fn default_for(&self, tool: &str, field: &str) -> Option<serde_json::Value> {
        if let Some(value) = self
            .config
            .get("tools")
            .and_then(|tools| tools.get(tool))
            .and_then(|defaults| defaults.get(field))
        {
            return Some(value.clone());
        }
        match self.config.get(field) {
            // The `tools` key is the per-tool namespace, never a default.
            Some(_) if field == "tools" => None,
            Some(value) => Some(value.clone()),
            None => None,
        }
    }

    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
    }

    pub fn record_operation(&mut self, tool: &str, success: bool) {
        self.last_accessed = Utc::now();
        self.last_operation = Some(LastOperation {
            tool: tool.to_string(),
            timestamp: Utc::now(),
            success,
        });
    }
}
