//! Composed-tool definitions, as declared by users.

use relay_types::InputSchema;
use serde::{Deserialize, Serialize};

/// A declarative multi-step workflow registered under a unique name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposedTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: Option<String>,
    pub steps: Vec<Step>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: InputSchema,
    #[serde(default, rename = "outputSchema", skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// One step: a single tool call with wired inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub server: String,
    pub tool: String,
    #[serde(default)]
    pub input: serde_json::Map<String, serde_json::Value>,
    /// Key under which the call result lands in the step's outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackSpec>,
}

impl Step {
    /// The input values that are references rather than literals.
    pub fn references(&self) -> Vec<ParamRef> {
        self.input
            .values()
            .filter_map(|value| ParamRef::parse(value))
            .collect()
    }
}

/// A reference to a caller parameter or an earlier step's output. On the
/// wire: `{"source": {"kind": "param", "path": ...}}` or
/// `{"source": {"kind": "output", "stepName": ..., "path": ...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamRef {
    pub source: RefSource,
}

impl ParamRef {
    /// Interpret one input value as a reference, if it has the shape.
    pub fn parse(value: &serde_json::Value) -> Option<ParamRef> {
        if !value.as_object().is_some_and(|obj| obj.contains_key("source")) {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RefSource {
    Param {
        path: String,
    },
    Output {
        #[serde(rename = "stepName")]
        step_name: String,
        path: String,
    },
}

/// When a step runs, decided by the state of earlier steps or an expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Condition {
    Success {
        #[serde(rename = "stepName")]
        step_name: String,
    },
    Failure {
        #[serde(rename = "stepName")]
        step_name: String,
    },
    Expression {
        expression: String,
    },
}

impl Condition {
    pub fn step_name(&self) -> Option<&str> {
        match self {
            Condition::Success { step_name } | Condition::Failure { step_name } => {
                Some(step_name)
            }
            Condition::Expression { .. } => None,
        }
    }
}

/// A compensating call recorded when its step succeeds, replayed LIFO on a
/// later failure. Its input is resolved at capture time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackSpec {
    pub server: String,
    pub tool: String,
    #[serde(default)]
    pub input: serde_json::Map<String, serde_json::Value>,
}
