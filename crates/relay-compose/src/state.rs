//! Transient per-execution state. Nothing here is shared between two
//! executions of the same composed tool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

/// The state of one step within an execution.
#[derive(Debug, Clone)]
pub struct StepState {
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outputs: serde_json::Map<String, serde_json::Value>,
    pub error: Option<String>,
}

impl StepState {
    pub fn new() -> Self {
        Self {
            status: StepStatus::Pending,
            started_at: None,
            finished_at: None,
            outputs: serde_json::Map::new(),
            error: None,
        }
    }

    pub fn start(&mut self) {
        self.status = StepStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn finish(&mut self, status: StepStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    pub fn duration_ms(&self) -> Option<u64> {
        let (start, end) = (self.started_at?, self.finished_at?);
        (end - start).num_milliseconds().try_into().ok()
    }
}

impl Default for StepState {
    fn default() -> Self {
        Self::new()
    }
}

/// A compensating call with its parameters already resolved.
#[derive(Debug, Clone)]
pub struct ResolvedRollback {
    pub server: String,
    pub tool: String,
    pub args: serde_json::Value,
}

/// One execution of a composed tool.
#[derive(Debug)]
pub struct ExecutionState {
    pub id: Uuid,
    pub status: ExecutionStatus,
    pub current_step: Option<String>,
    pub steps: HashMap<String, StepState>,
    pub params: serde_json::Value,
    pub rollback_stack: Vec<ResolvedRollback>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionState {
    pub fn new(step_names: impl IntoIterator<Item = String>, params: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            current_step: None,
            steps: step_names
                .into_iter()
                .map(|name| (name, StepState::new()))
                .collect(),
            params,
            rollback_stack: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn step(&self, name: &str) -> Option<&StepState> {
        self.steps.get(name)
    }

    pub fn step_mut(&mut self, name: &str) -> &mut StepState {
        self.steps.entry(name.to_string()).or_default()
    }
}
