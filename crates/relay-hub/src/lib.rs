//! Connection supervision, per-server call queueing, the tool catalog, and
//! the hub facade.
//!
//! One supervisor owns each backend connection and publishes its status; the
//! catalog caches tool descriptors per server; the queue serializes calls
//! against one backend while a hub-wide admission gate caps concurrency.

pub mod catalog;
pub mod dispatch;
pub mod error;
pub mod hub;
pub mod queue;
pub mod registry;
pub mod supervisor;

pub use catalog::ToolCatalog;
pub use dispatch::ToolDispatch;
pub use error::HubError;
pub use relay_mcp::McpError;
pub use hub::Hub;
pub use queue::{AdmissionGate, AdmissionPermit, ServerQueue};
pub use supervisor::Supervisor;

/// Client name reported to backends during the `initialize` handshake.
pub const CLIENT_NAME: &str = "relay";
