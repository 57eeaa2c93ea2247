//! Stdio JSON-RPC transport and MCP client for the relay hub.
//!
//! A backend is a child process speaking newline-delimited JSON-RPC 2.0 on
//! its stdio. The transport owns the process and the framing; the client owns
//! request/response correlation and the typed MCP methods (`initialize`,
//! `tools/list`, `tools/call`, `resources/list`, `resources/templates/list`).

pub mod client;
pub mod error;
pub mod jsonrpc;
mod transport;

pub use client::{InitializeResult, McpClient, ServerInfoData};
pub use error::McpError;
pub use transport::StdioTransport;

/// MCP protocol version we negotiate.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Per-request timeout for the list methods. `tools/call` has no per-request
/// timeout; higher layers bound it.
pub const LIST_TIMEOUT_MS: u64 = 5_000;
