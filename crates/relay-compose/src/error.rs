//! Error types for composed-tool registration and execution.

use thiserror::Error;

/// Failures from registering or executing a composed tool.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("no composed tool named '{name}' is registered")]
    NotRegistered { name: String },

    #[error("composed tool '{tool}': duplicate step name '{step}'")]
    DuplicateStep { tool: String, step: String },

    #[error("step '{step}': tool '{tool}' is not in the catalog for server '{server}'")]
    UnknownTool {
        step: String,
        server: String,
        tool: String,
    },

    #[error("step '{step}' references unknown step '{reference}'")]
    UnknownStep { step: String, reference: String },

    #[error("step '{step}' references '{reference}', which runs later")]
    ForwardReference { step: String, reference: String },

    #[error("circular step references: {}", .path.join(" -> "))]
    CircularDependency { path: Vec<String> },

    #[error("step '{step}' reference '{reference}' does not match the declared output: {detail}")]
    SchemaCompatibility {
        step: String,
        reference: String,
        detail: String,
    },

    #[error("invalid parameters: {detail}")]
    Validation { detail: String },

    #[error("step '{step}': reference '{reference}' is unavailable")]
    ReferenceUnavailable { step: String, reference: String },
}
