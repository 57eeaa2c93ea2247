//! Registration-time validation of composed tools.
//!
//! Everything checked here is checkable before any step runs: name
//! uniqueness, catalog resolution, reference targets, ordering, acyclicity,
//! and the shape of output references.

use crate::definition::{ComposedTool, RefSource, Step};
use crate::error::ComposeError;
use relay_hub::ToolDispatch;
use std::collections::{HashMap, HashSet};

/// Validate one definition against the current catalog.
pub fn validate(def: &ComposedTool, dispatch: &dyn ToolDispatch) -> Result<(), ComposeError> {
    // The declared input schema must be internally consistent.
    for field in &def.input_schema.required {
        if !def.input_schema.properties.contains_key(field) {
            return Err(ComposeError::Validation {
                detail: format!("required field '{field}' is not among the declared properties"),
            });
        }
    }

    // Step names are unique within the tool.
    let mut seen = HashSet::new();
    for step in &def.steps {
        if !seen.insert(step.name.as_str()) {
            return Err(ComposeError::DuplicateStep {
                tool: def.name.clone(),
                step: step.name.clone(),
            });
        }
    }

    // Every tool named by a step or its rollback resolves in the catalog.
    for step in &def.steps {
        if !dispatch.has_tool(&step.server, &step.tool) {
            return Err(ComposeError::UnknownTool {
                step: step.name.clone(),
                server: step.server.clone(),
                tool: step.tool.clone(),
            });
        }
        if let Some(rollback) = &step.rollback {
            if !dispatch.has_tool(&rollback.server, &rollback.tool) {
                return Err(ComposeError::UnknownTool {
                    step: step.name.clone(),
                    server: rollback.server.clone(),
                    tool: rollback.tool.clone(),
                });
            }
        }
    }

    let position: HashMap<&str, usize> = def
        .steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();

    // All referenced steps exist.
    for step in &def.steps {
        for reference in referenced_steps(step, true) {
            if !position.contains_key(reference.as_str()) {
                return Err(ComposeError::UnknownStep {
                    step: step.name.clone(),
                    reference,
                });
            }
        }
    }

    // The reference graph is acyclic (self-references included).
    if let Some(path) = find_cycle(&def.steps, &position) {
        return Err(ComposeError::CircularDependency { path });
    }

    // Input and condition references point strictly backwards; a rollback
    // may reference its own step's output (it is resolved after the step).
    for (index, step) in def.steps.iter().enumerate() {
        for reference in referenced_steps(step, false) {
            if position[reference.as_str()] >= index {
                return Err(ComposeError::ForwardReference {
                    step: step.name.clone(),
                    reference,
                });
            }
        }
        if let Some(rollback) = &step.rollback {
            for value in rollback.input.values() {
                if let Some(r) = crate::definition::ParamRef::parse(value) {
                    if let RefSource::Output { step_name, .. } = r.source {
                        if position[step_name.as_str()] > index {
                            return Err(ComposeError::ForwardReference {
                                step: step.name.clone(),
                                reference: step_name,
                            });
                        }
                    }
                }
            }
        }
    }

    // Output references use a path rooted at the target's declared output.
    for step in &def.steps {
        let mut refs = step.references();
        if let Some(rollback) = &step.rollback {
            refs.extend(rollback.input.values().filter_map(crate::definition::ParamRef::parse));
        }
        for r in refs {
            if let RefSource::Output { step_name, path } = r.source {
                let target = &def.steps[position[step_name.as_str()]];
                let root = path.split('.').next().unwrap_or(&path);
                match &target.output {
                    None => {
                        return Err(ComposeError::SchemaCompatibility {
                            step: step.name.clone(),
                            reference: step_name,
                            detail: "referenced step declares no output".to_string(),
                        });
                    }
                    Some(output) if output != root => {
                        return Err(ComposeError::SchemaCompatibility {
                            step: step.name.clone(),
                            reference: step_name.clone(),
                            detail: format!(
                                "path root '{root}' does not match declared output '{output}'"
                            ),
                        });
                    }
                    Some(_) => {}
                }
            }
        }
    }

    Ok(())
}

/// Step names referenced by a step's inputs and condition. Rollback-input
/// references are included only when `include_rollback` is set.
fn referenced_steps(step: &Step, include_rollback: bool) -> Vec<String> {
    let mut names = Vec::new();
    for r in step.references() {
        if let RefSource::Output { step_name, .. } = r.source {
            names.push(step_name);
        }
    }
    if let Some(condition) = &step.condition {
        if let Some(name) = condition.step_name() {
            names.push(name.to_string());
        }
    }
    if include_rollback {
        if let Some(rollback) = &step.rollback {
            for value in rollback.input.values() {
                if let Some(r) = crate::definition::ParamRef::parse(value) {
                    if let RefSource::Output { step_name, .. } = r.source {
                        names.push(step_name);
                    }
                }
            }
        }
    }
    names
}

/// DFS with a recursion-path set; returns the discovered cycle path.
fn find_cycle(steps: &[Step], position: &HashMap<&str, usize>) -> Option<Vec<String>> {
    let adjacency: Vec<Vec<usize>> = steps
        .iter()
        .map(|step| {
            referenced_steps(step, false)
                .into_iter()
                .filter_map(|name| position.get(name.as_str()).copied())
                .collect()
        })
        .collect();

    let mut visited = vec![false; steps.len()];
    let mut path: Vec<usize> = Vec::new();
    let mut on_path = vec![false; steps.len()];

    for start in 0..steps.len() {
        if !visited[start] {
            if let Some(cycle) =
                dfs(start, &adjacency, &mut visited, &mut path, &mut on_path, steps)
            {
                return Some(cycle);
            }
        }
    }
    None
}

fn dfs(
    node: usize,
    adjacency: &[Vec<usize>],
    visited: &mut [bool],
    path: &mut Vec<usize>,
    on_path: &mut [bool],
    steps: &[Step],
) -> Option<Vec<String>> {
    visited[node] = true;
    path.push(node);
    on_path[node] = true;

    for &next in &adjacency[node] {
        if on_path[next] {
            // Report the cycle from its first occurrence on the path.
            let from = path.iter().position(|&n| n == next).unwrap_or(0);
            let mut cycle: Vec<String> =
                path[from..].iter().map(|&n| steps[n].name.clone()).collect();
            cycle.push(steps[next].name.clone());
            return Some(cycle);
        }
        if !visited[next] {
            if let Some(cycle) = dfs(next, adjacency, visited, path, on_path, steps) {
                return Some(cycle);
            }
        }
    }

    path.pop();
    on_path[node] = false;
    None
}
