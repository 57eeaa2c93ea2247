//! Configuration types for the relay hub.
//!
//! Discovery and persistence of config files is a caller concern; these types
//! only define the shape an external loader hands to the hub at startup.

use relay_types::DangerLevel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hub-wide cap on simultaneously in-flight tool calls.
pub const DEFAULT_MAX_CONCURRENT_OPERATIONS: usize = 5;

/// Bounded connect attempts before `ensure_connection` refuses to retry.
pub const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 3;

/// Hard cap on one connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT_OPERATIONS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_CONNECT_ATTEMPTS
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

/// Declarative spec of one backend process. Immutable for the hub's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Command to run (e.g., "npx", "python").
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overlay merged over the hub's own environment; overlay
    /// keys take precedence.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Top-level hub configuration: the server map plus supervision knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub servers: HashMap<String, ServerConfig>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_operations: usize,
    #[serde(default = "default_max_attempts")]
    pub max_connect_attempts: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            servers: HashMap::new(),
            max_concurrent_operations: DEFAULT_MAX_CONCURRENT_OPERATIONS,
            max_connect_attempts: DEFAULT_MAX_CONNECT_ATTEMPTS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

/// Tool-executor configuration: retry budget, LLM completion switch, safety
/// policy, and per-server default argument maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_true")]
    pub llm_enabled: bool,
    #[serde(default)]
    pub safety: SafetyConfig,
    /// Free-form per-server defaults. A server's map may nest per-tool
    /// defaults under `tools.<toolName>`.
    #[serde(default)]
    pub server_defaults: HashMap<String, serde_json::Value>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff_ms: 1000,
            llm_enabled: true,
            safety: SafetyConfig::default(),
            server_defaults: HashMap::new(),
        }
    }
}

/// Safety policy: what counts as dangerous and when confirmation is required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Extra name fragments that mark a tool dangerous, on top of the
    /// built-in set.
    #[serde(default)]
    pub dangerous_keywords: Vec<String>,
    /// Required-field names whose presence marks a tool dangerous. Empty
    /// means the built-in verb union applies.
    #[serde(default)]
    pub dangerous_fields: Vec<String>,
    /// Argument fields redacted from debug logs.
    #[serde(default)]
    pub sensitive_fields: Vec<String>,
    /// Whether missing required fields may be filled from server defaults.
    #[serde(default = "default_true")]
    pub auto_fill_defaults: bool,
    /// When set, narrows confirmation to the listed levels/tools/patterns.
    /// When absent, every dangerous tool requires confirmation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<ConfirmationRules>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            dangerous_keywords: Vec::new(),
            dangerous_fields: Vec::new(),
            sensitive_fields: Vec::new(),
            auto_fill_defaults: true,
            confirmation: None,
        }
    }
}

/// Narrowing rules for when a dangerous tool requires user confirmation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfirmationRules {
    /// Danger levels that always require confirmation.
    #[serde(default)]
    pub danger_levels: Vec<DangerLevel>,
    /// Exact tool names that always require confirmation.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Glob patterns over tool names that require confirmation.
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl ConfirmationRules {
    pub fn is_empty(&self) -> bool {
        self.danger_levels.is_empty() && self.tools.is_empty() && self.patterns.is_empty()
    }
}

/// Built-in name fragments that mark a tool dangerous.
pub const BUILTIN_DANGEROUS_KEYWORDS: &[&str] = &[
    "delete", "remove", "drop", "truncate", "push", "write", "modify", "update", "alter", "exec",
    "execute", "format",
];

/// Built-in dangerous field names: the union of the operation-category verbs.
pub const BUILTIN_DANGEROUS_FIELDS: &[&str] = &[
    "delete", "remove", "drop", "write", "create", "push", "modify", "update", "alter", "exec",
    "execute", "run", "format", "clean", "clear",
];
