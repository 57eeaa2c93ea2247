//! Error types for tool execution.

use relay_hub::HubError;
use thiserror::Error;

/// Failures surfaced inside an [`crate::ExecOutcome`]; the executor itself
/// never throws across its boundary.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("user denied '{tool}' on '{server}'")]
    UserDenied { server: String, tool: String },

    #[error("missing required fields: {}", .fields.join(", "))]
    MissingFields { fields: Vec<String> },

    #[error(transparent)]
    Hub(#[from] HubError),
}
