//! Best-effort state capture and rollback.
//!
//! Before a destructive call the executor probes the backend for the current
//! state by swapping the destructive verb in the tool name for `get`. If the
//! call later fails, a paired compensating tool (`create` for deletions,
//! `restore` for modifications) is invoked with the captured state. Both
//! sides are cooperative: if the paired tool does not exist, the capture or
//! rollback is silently skipped.

use relay_hub::ToolDispatch;
use relay_types::OperationKind;

/// Replace the first matching verb fragment in a tool name,
/// case-insensitively, preserving the rest of the name.
fn substitute_verb(name: &str, verbs: &[&str], replacement: &str) -> Option<String> {
    // Byte offsets below assume the lowered copy lines up with the original.
    if !name.is_ascii() {
        return None;
    }
    let lowered = name.to_lowercase();
    let mut earliest: Option<(usize, usize)> = None;
    for verb in verbs {
        if let Some(at) = lowered.find(verb) {
            let candidate = (at, verb.len());
            if earliest.is_none_or(|(best, _)| at < best) {
                earliest = Some(candidate);
            }
        }
    }
    let (at, len) = earliest?;
    let mut out = String::with_capacity(name.len());
    out.push_str(&name[..at]);
    out.push_str(replacement);
    out.push_str(&name[at + len..]);
    Some(out)
}

/// The read-probe tool name for a destructive call, if the operation kind
/// supports capture.
pub fn probe_tool_name(tool: &str, operation: OperationKind) -> Option<String> {
    match operation {
        OperationKind::Delete | OperationKind::Modify => {
            substitute_verb(tool, operation.keywords(), "get")
        }
        _ => None,
    }
}

/// The paired compensating call `(tool, args)` for a failed destructive
/// call, built from the captured previous state.
pub fn rollback_plan(
    tool: &str,
    operation: OperationKind,
    args: &serde_json::Value,
    previous: &serde_json::Value,
) -> Option<(String, serde_json::Value)> {
    let (paired, payload_key) = match operation {
        OperationKind::Delete => (
            substitute_verb(tool, &["delete", "remove"], "create")?,
            "data",
        ),
        OperationKind::Modify => (
            substitute_verb(tool, &["write", "modify"], "restore")?,
            "content",
        ),
        _ => return None,
    };

    let mut merged = match args.as_object() {
        Some(obj) => obj.clone(),
        None => serde_json::Map::new(),
    };
    merged.insert(payload_key.to_string(), previous.clone());
    Some((paired, serde_json::Value::Object(merged)))
}

/// Probe the backend for the state a destructive call is about to clobber.
/// Failures disable rollback for this call; they never fail the call itself.
pub async fn capture_previous_state(
    dispatch: &dyn ToolDispatch,
    server: &str,
    tool: &str,
    args: &serde_json::Value,
    operation: OperationKind,
) -> Option<serde_json::Value> {
    let probe = probe_tool_name(tool, operation)?;
    if !dispatch.has_tool(server, &probe) {
        return None;
    }

    let mut probe_args = match args.as_object() {
        Some(obj) => obj.clone(),
        None => serde_json::Map::new(),
    };
    probe_args.insert("mode".to_string(), serde_json::Value::String("read".into()));

    match dispatch
        .call_tool(server, &probe, serde_json::Value::Object(probe_args))
        .await
    {
        Ok(result) => {
            let fallback = serde_json::Value::String(result.text());
            Some(result.structured.unwrap_or(fallback))
        }
        Err(e) => {
            tracing::warn!(
                server = %server,
                tool = %tool,
                "state capture via '{probe}' failed, rollback disabled: {e}"
            );
            None
        }
    }
}

/// Execute the compensating call for a failed destructive call. Only
/// attempted when the paired tool exists in the catalog.
pub async fn attempt_rollback(
    dispatch: &dyn ToolDispatch,
    server: &str,
    tool: &str,
    operation: OperationKind,
    args: &serde_json::Value,
    previous: &serde_json::Value,
) -> Result<(), String> {
    let Some((paired, rollback_args)) = rollback_plan(tool, operation, args, previous) else {
        return Err(format!("no rollback pairing for '{tool}'"));
    };
    if !dispatch.has_tool(server, &paired) {
        return Err(format!("paired tool '{paired}' not available on '{server}'"));
    }

    tracing::info!(server = %server, "rolling back '{tool}' via '{paired}'");
    match dispatch.call_tool(server, &paired, rollback_args).await {
        Ok(result) if !result.is_error => Ok(()),
        Ok(result) => Err(format!("rollback via '{paired}' reported: {}", result.text())),
        Err(e) => Err(format!("rollback via '{paired}' failed: {e}")),
    }
}
