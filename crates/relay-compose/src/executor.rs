//! The composed-tool registry and step engine.

use crate::definition::{ComposedTool, Condition, ParamRef, RefSource};
use crate::error::ComposeError;
use crate::state::{ExecutionState, ExecutionStatus, ResolvedRollback, StepStatus};
use crate::validate;
use chrono::Utc;
use relay_hub::ToolDispatch;
use relay_types::ToolCallResult;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Per-step report in a [`ComposedResult`].
#[derive(Debug, Clone)]
pub struct StepResult {
    pub name: String,
    pub status: StepStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
}

/// What the rollback drain did, if a failure triggered one.
#[derive(Debug, Clone)]
pub struct RollbackInfo {
    pub triggered: bool,
    pub successful: bool,
    pub error: Option<String>,
}

/// The final report of one composed-tool execution.
#[derive(Debug)]
pub struct ComposedResult {
    pub success: bool,
    pub tool_name: String,
    pub step_results: Vec<StepResult>,
    pub outputs: serde_json::Map<String, serde_json::Value>,
    pub duration_ms: u64,
    pub rollback_info: Option<RollbackInfo>,
}

/// Registry and engine for composed tools.
pub struct ComposeExecutor {
    dispatch: Arc<dyn ToolDispatch>,
    registry: RwLock<HashMap<String, ComposedTool>>,
}

impl ComposeExecutor {
    pub fn new(dispatch: Arc<dyn ToolDispatch>) -> Self {
        Self {
            dispatch,
            registry: RwLock::new(HashMap::new()),
        }
    }

    /// Validate and store a definition. Re-registering a name replaces the
    /// previous version.
    pub fn register_tool(&self, def: ComposedTool) -> Result<(), ComposeError> {
        validate::validate(&def, self.dispatch.as_ref())?;
        tracing::info!(tool = %def.name, steps = def.steps.len(), "composed tool registered");
        self.registry
            .write()
            .unwrap()
            .insert(def.name.clone(), def);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<ComposedTool> {
        self.registry.read().unwrap().get(name).cloned()
    }

    /// Registered tool names, sorted.
    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Run one composed tool. Parameter-shape problems fail fast; step
    /// failures are reported per step in the result, after the rollback
    /// stack has drained.
    pub async fn execute_tool(
        &self,
        name: &str,
        params: serde_json::Value,
    ) -> Result<ComposedResult, ComposeError> {
        let def = self.get(name).ok_or_else(|| ComposeError::NotRegistered {
            name: name.to_string(),
        })?;
        check_params(&def, &params)?;

        let started = std::time::Instant::now();
        let mut state = ExecutionState::new(
            def.steps.iter().map(|s| s.name.clone()),
            params,
        );
        state.status = ExecutionStatus::Running;
        let mut failed = false;

        for step in &def.steps {
            state.current_step = Some(step.name.clone());

            if let Some(condition) = &step.condition {
                if !evaluate_condition(condition, &state) {
                    state.step_mut(&step.name).status = StepStatus::Skipped;
                    tracing::debug!(step = %step.name, "condition false, skipped");
                    continue;
                }
            }

            state.step_mut(&step.name).start();

            let resolved = match resolve_input(&step.input, &step.name, &state) {
                Ok(value) => value,
                Err(e) => {
                    let step_state = state.step_mut(&step.name);
                    step_state.error = Some(e.to_string());
                    step_state.finish(StepStatus::Failed);
                    failed = true;
                    break;
                }
            };

            match self.dispatch.call_tool(&step.server, &step.tool, resolved).await {
                Ok(result) if !result.is_error => {
                    let value = result_value(&result);
                    let step_state = state.step_mut(&step.name);
                    if let Some(output) = &step.output {
                        step_state.outputs.insert(output.clone(), value);
                    }
                    step_state.finish(StepStatus::Success);

                    // Capture the compensator with its arguments resolved
                    // against the state as of this step.
                    if let Some(rollback) = &step.rollback {
                        match resolve_input(&rollback.input, &step.name, &state) {
                            Ok(args) => state.rollback_stack.push(ResolvedRollback {
                                server: rollback.server.clone(),
                                tool: rollback.tool.clone(),
                                args,
                            }),
                            Err(e) => {
                                tracing::warn!(
                                    step = %step.name,
                                    "compensator arguments unresolvable, skipped: {e}"
                                );
                            }
                        }
                    }
                }
                Ok(result) => {
                    let step_state = state.step_mut(&step.name);
                    step_state.error = Some(result.text());
                    step_state.finish(StepStatus::Failed);
                    failed = true;
                    break;
                }
                Err(e) => {
                    let step_state = state.step_mut(&step.name);
                    step_state.error = Some(e.to_string());
                    step_state.finish(StepStatus::Failed);
                    failed = true;
                    break;
                }
            }
        }

        state.current_step = None;
        let rollback_info = if failed && !state.rollback_stack.is_empty() {
            Some(self.drain_rollbacks(&mut state).await)
        } else {
            None
        };
        state.status = if failed {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Success
        };
        state.finished_at = Some(Utc::now());

        let mut outputs = serde_json::Map::new();
        let step_results = def
            .steps
            .iter()
            .map(|step| {
                let step_state = state.step(&step.name).expect("state has every step");
                outputs.extend(step_state.outputs.clone());
                StepResult {
                    name: step.name.clone(),
                    status: step_state.status,
                    result: step
                        .output
                        .as_ref()
                        .and_then(|o| step_state.outputs.get(o).cloned()),
                    error: step_state.error.clone(),
                    duration_ms: step_state.duration_ms(),
                }
            })
            .collect();

        Ok(ComposedResult {
            success: !failed,
            tool_name: def.name,
            step_results,
            outputs,
            duration_ms: started.elapsed().as_millis() as u64,
            rollback_info,
        })
    }

    /// Replay captured compensators newest-first. A compensator failure is
    /// recorded but never aborts the drain.
    async fn drain_rollbacks(&self, state: &mut ExecutionState) -> RollbackInfo {
        let mut errors = Vec::new();
        while let Some(rollback) = state.rollback_stack.pop() {
            tracing::info!(
                server = %rollback.server,
                tool = %rollback.tool,
                "running compensator"
            );
            match self
                .dispatch
                .call_tool(&rollback.server, &rollback.tool, rollback.args)
                .await
            {
                Ok(result) if !result.is_error => {}
                Ok(result) => {
                    errors.push(format!("{} reported: {}", rollback.tool, result.text()));
                }
                Err(e) => errors.push(format!("{} failed: {e}", rollback.tool)),
            }
        }
        RollbackInfo {
            triggered: true,
            successful: errors.is_empty(),
            error: if errors.is_empty() {
                None
            } else {
                Some(errors.join("; "))
            },
        }
    }
}

/// Parse the caller's params against the declared input schema.
fn check_params(def: &ComposedTool, params: &serde_json::Value) -> Result<(), ComposeError> {
    let empty = serde_json::Map::new();
    let obj = match params {
        serde_json::Value::Object(obj) => obj,
        serde_json::Value::Null => &empty,
        _ => {
            return Err(ComposeError::Validation {
                detail: "params must be an object".to_string(),
            });
        }
    };

    for field in &def.input_schema.required {
        if !obj.contains_key(field) {
            return Err(ComposeError::Validation {
                detail: format!("missing required parameter '{field}'"),
            });
        }
    }

    for (field, value) in obj {
        let Some(prop) = def.input_schema.property(field) else {
            continue;
        };
        let Some(kind) = prop.kind else { continue };
        let matches = match kind.as_str() {
            "string" => value.is_string(),
            "number" | "integer" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };
        if !matches {
            return Err(ComposeError::Validation {
                detail: format!("parameter '{field}' is not a {kind}"),
            });
        }
    }
    Ok(())
}

fn evaluate_condition(condition: &Condition, state: &ExecutionState) -> bool {
    match condition {
        Condition::Success { step_name } => {
            state.step(step_name).map(|s| s.status) == Some(StepStatus::Success)
        }
        Condition::Failure { step_name } => {
            state.step(step_name).map(|s| s.status) == Some(StepStatus::Failed)
        }
        Condition::Expression { expression } => {
            // No expression language yet; deterministically true.
            tracing::debug!("expression condition assumed true: {expression}");
            true
        }
    }
}

/// Substitute references in an input map against params and earlier outputs.
fn resolve_input(
    input: &serde_json::Map<String, serde_json::Value>,
    step_name: &str,
    state: &ExecutionState,
) -> Result<serde_json::Value, ComposeError> {
    let mut resolved = serde_json::Map::new();
    for (field, value) in input {
        let value = match ParamRef::parse(value) {
            None => value.clone(),
            Some(ParamRef {
                source: RefSource::Param { path },
            }) => lookup_path(&state.params, &path).ok_or_else(|| {
                ComposeError::ReferenceUnavailable {
                    step: step_name.to_string(),
                    reference: format!("params.{path}"),
                }
            })?,
            Some(ParamRef {
                source: RefSource::Output { step_name: target, path },
            }) => {
                let target_state = state.step(&target).filter(|s| s.status == StepStatus::Success);
                let Some(target_state) = target_state else {
                    return Err(ComposeError::ReferenceUnavailable {
                        step: step_name.to_string(),
                        reference: format!("steps.{target}.outputs.{path}"),
                    });
                };
                let (root, rest) = match path.split_once('.') {
                    Some((root, rest)) => (root, Some(rest)),
                    None => (path.as_str(), None),
                };
                let rooted = target_state.outputs.get(root);
                let value = match (rooted, rest) {
                    (Some(v), None) => Some(v.clone()),
                    (Some(v), Some(rest)) => lookup_path(v, rest),
                    (None, _) => None,
                };
                value.ok_or_else(|| ComposeError::ReferenceUnavailable {
                    step: step_name.to_string(),
                    reference: format!("steps.{target}.outputs.{path}"),
                })?
            }
        };
        resolved.insert(field.clone(), value);
    }
    Ok(serde_json::Value::Object(resolved))
}

/// Walk a dotted path through objects and array indices.
fn lookup_path(value: &serde_json::Value, path: &str) -> Option<serde_json::Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

/// The JSON value a step result contributes to its output key.
fn result_value(result: &ToolCallResult) -> serde_json::Value {
    if let Some(structured) = &result.structured {
        return structured.clone();
    }
    let text = result.text();
    serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_walks_objects_and_arrays() {
        let value = json!({"repo": {"tags": ["a", "b"], "id": 7}});
        assert_eq!(lookup_path(&value, "repo.id").unwrap(), 7);
        assert_eq!(lookup_path(&value, "repo.tags.1").unwrap(), "b");
        assert!(lookup_path(&value, "repo.missing").is_none());
        assert!(lookup_path(&value, "repo.tags.9").is_none());
    }

    #[test]
    fn result_value_prefers_structured_then_json_text() {
        let structured = ToolCallResult {
            content: vec![],
            is_error: false,
            structured: Some(json!({"id": 1})),
        };
        assert_eq!(result_value(&structured), json!({"id": 1}));

        let json_text: ToolCallResult = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "{\"id\": 2}"}]
        }))
        .unwrap();
        assert_eq!(result_value(&json_text), json!({"id": 2}));

        let plain: ToolCallResult = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "done"}]
        }))
        .unwrap();
        assert_eq!(result_value(&plain), json!("done"));
    }

    #[test]
    fn check_params_enforces_required_and_types() {
        let def: ComposedTool = serde_json::from_value(json!({
            "name": "wf",
            "inputSchema": {
                "properties": {"repo_name": {"type": "string"}, "count": {"type": "number"}},
                "required": ["repo_name"]
            },
            "steps": []
        }))
        .unwrap();

        assert!(check_params(&def, &json!({"repo_name": "site"})).is_ok());
        assert!(check_params(&def, &json!({"repo_name": "site", "count": 3})).is_ok());
        assert!(matches!(
            check_params(&def, &json!({})),
            Err(ComposeError::Validation { .. })
        ));
        assert!(matches!(
            check_params(&def, &json!({"repo_name": 7})),
            Err(ComposeError::Validation { .. })
        ));
        assert!(matches!(
            check_params(&def, &json!("nope")),
            Err(ComposeError::Validation { .. })
        ));
    }
}
