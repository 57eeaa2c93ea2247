//! Shared data model for the relay tool-dispatch hub.
//!
//! Tool descriptors arrive from backends at runtime, so the types here keep a
//! typed header (name, required fields, safety hints) around opaque
//! `serde_json` bags that are only interpreted at call time.

pub mod content;
pub mod resource;
pub mod server;
pub mod tool;

pub use content::{ToolCallResult, ToolContent};
pub use resource::{ResourceDescriptor, ResourceTemplateDescriptor};
pub use server::{ConnectionInfo, ServerCapabilities, ServerStatus, StatusEvent};
pub use tool::{DangerLevel, InputSchema, OperationKind, PropertySchema, ToolDescriptor, ToolSafety};
