//! Error types for transport and protocol failures.

use thiserror::Error;

/// Errors from backend communication.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("failed to spawn server '{server}': {source}")]
    SpawnFailed {
        server: String,
        source: std::io::Error,
    },

    #[error("transport to server '{server}' is closed")]
    Closed { server: String },

    #[error("JSON-RPC error from '{server}' (code {code}): {message}")]
    JsonRpc {
        server: String,
        code: i64,
        message: String,
    },

    #[error("server '{server}' does not implement '{method}'")]
    MethodNotFound { server: String, method: String },

    #[error("reply from '{server}' did not match the '{method}' schema: {detail}")]
    ProtocolMismatch {
        server: String,
        method: String,
        detail: String,
    },

    #[error("request '{method}' to '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// True for failures worth a reconnect-and-retry at higher layers, as
    /// opposed to protocol or caller mistakes.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            McpError::Closed { .. } | McpError::Timeout { .. } | McpError::Io(_)
        )
    }
}
