//! The dispatch seam between the hub and the layers above it.
//!
//! The tool executor and the composition executor reach the hub through this
//! object-safe trait so they can be exercised against a scripted backend in
//! tests. `Hub` is the production implementation.

use crate::error::HubError;
use relay_types::{ToolCallResult, ToolDescriptor};
use std::future::Future;
use std::pin::Pin;

/// Catalog lookups plus serialized, admission-controlled tool calls.
pub trait ToolDispatch: Send + Sync {
    /// Descriptor for `(server, tool)`, if the catalog has one.
    fn descriptor(&self, server: &str, tool: &str) -> Option<ToolDescriptor>;

    fn has_tool(&self, server: &str, tool: &str) -> bool;

    /// Known tool names for a server, for diagnostics.
    fn tool_names(&self, server: &str) -> Vec<String>;

    /// One serialized tool call against a backend.
    fn call_tool<'a>(
        &'a self,
        server: &'a str,
        tool: &'a str,
        args: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<ToolCallResult, HubError>> + Send + 'a>>;

    /// Force a fresh connection, resetting the retry budget.
    fn reconnect<'a>(
        &'a self,
        server: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), HubError>> + Send + 'a>>;
}
