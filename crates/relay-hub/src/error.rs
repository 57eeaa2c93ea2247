//! Error types for hub operations.

use relay_mcp::McpError;
use relay_types::ServerStatus;
use thiserror::Error;

/// Errors surfaced by the hub facade and its components.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("no server named '{server}' is configured")]
    ConfigMissing { server: String },

    #[error("connection attempt to '{server}' timed out after {timeout_secs}s")]
    ConnectTimeout { server: String, timeout_secs: u64 },

    #[error("server '{server}' failed to connect after {attempts} attempts; reconnect manually to retry")]
    MaxRetriesExceeded { server: String, attempts: u32 },

    #[error("server '{server}' is {status} ({})", .last_error.as_deref().unwrap_or("no recorded error"))]
    NotConnected {
        server: String,
        status: ServerStatus,
        last_error: Option<String>,
    },

    #[error("server '{server}' has no tool '{tool}' (available: {})", .available.join(", "))]
    ToolNotFound {
        server: String,
        tool: String,
        available: Vec<String>,
    },

    #[error("hub is at its concurrency cap ({active}/{cap}); retry later")]
    Overloaded { active: usize, cap: usize },

    #[error("tool call '{tool}' on '{server}' failed: {source}")]
    CallFailed {
        server: String,
        tool: String,
        #[source]
        source: McpError,
    },

    #[error("hub is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Mcp(#[from] McpError),
}

impl HubError {
    /// True for failures that a reconnect-and-retry may clear.
    pub fn is_transient(&self) -> bool {
        match self {
            HubError::ConnectTimeout { .. } | HubError::NotConnected { .. } => true,
            HubError::CallFailed { source, .. } => source.is_transient(),
            HubError::Mcp(source) => source.is_transient(),
            _ => false,
        }
    }
}
