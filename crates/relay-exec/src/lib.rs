//! Tool executor: argument validation and enrichment, danger classification,
//! the confirmation gate, optional LLM-assisted completion of missing
//! arguments, best-effort rollback, and retry orchestration over the hub.
//!
//! The executor never panics or throws across its boundary: every call
//! resolves to an [`ExecOutcome`] describing what happened.

pub mod completion;
pub mod confirm;
pub mod context;
pub mod error;
pub mod executor;
pub mod registry;
pub mod rollback;
pub mod safety;

pub use completion::{CompletionError, CompletionModel, CompletionReply};
pub use confirm::ConfirmationHandler;
pub use context::ServerContext;
pub use error::ExecError;
pub use executor::{ExecOutcome, ExecRequest, ToolExecutor};
