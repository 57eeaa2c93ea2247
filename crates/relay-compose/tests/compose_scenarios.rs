//! Composed-tool execution scenarios against a scripted dispatch.

use relay_compose::{ComposeError, ComposeExecutor, ComposedTool, StepStatus};
use relay_hub::{HubError, McpError, ToolDispatch};
use relay_types::{ToolCallResult, ToolDescriptor};
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

type Responder =
    Box<dyn Fn(serde_json::Value) -> Result<ToolCallResult, HubError> + Send + Sync>;

#[derive(Default)]
struct MockDispatch {
    tools: Vec<String>,
    responders: HashMap<String, Responder>,
    calls: Mutex<Vec<(String, serde_json::Value)>>,
}

impl MockDispatch {
    fn with_tools(tools: &[&str]) -> Self {
        Self {
            tools: tools.iter().map(|t| t.to_string()).collect(),
            ..Self::default()
        }
    }

    fn respond(
        mut self,
        tool: &str,
        responder: impl Fn(serde_json::Value) -> Result<ToolCallResult, HubError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.responders.insert(tool.to_string(), Box::new(responder));
        self
    }

    fn calls_to(&self, tool: &str) -> Vec<serde_json::Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == tool)
            .map(|(_, args)| args.clone())
            .collect()
    }

    fn call_order(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

fn structured_result(value: serde_json::Value) -> ToolCallResult {
    ToolCallResult {
        content: vec![],
        is_error: false,
        structured: Some(value),
    }
}

fn call_error(tool: &str) -> HubError {
    HubError::CallFailed {
        server: "github".into(),
        tool: tool.into(),
        source: McpError::JsonRpc {
            server: "github".into(),
            code: -32000,
            message: "backend exploded".into(),
        },
    }
}

impl ToolDispatch for MockDispatch {
    fn descriptor(&self, _server: &str, tool: &str) -> Option<ToolDescriptor> {
        self.tools
            .iter()
            .find(|t| t.as_str() == tool)
            .map(|t| serde_json::from_value(json!({"name": t})).unwrap())
    }

    fn has_tool(&self, _server: &str, tool: &str) -> bool {
        self.tools.iter().any(|t| t == tool)
    }

    fn tool_names(&self, _server: &str) -> Vec<String> {
        self.tools.clone()
    }

    fn call_tool<'a>(
        &'a self,
        _server: &'a str,
        tool: &'a str,
        args: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<ToolCallResult, HubError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap()
                .push((tool.to_string(), args.clone()));
            match self.responders.get(tool) {
                Some(responder) => responder(args),
                None => Ok(structured_result(json!({}))),
            }
        })
    }

    fn reconnect<'a>(
        &'a self,
        _server: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), HubError>> + Send + 'a>> {
        Box::pin(async { Ok(()) })
    }
}

/// Two steps: create a repo, then push files into it; the compensator
/// deletes the repo created by the first step.
fn publish_site() -> ComposedTool {
    serde_json::from_value(json!({
        "name": "publish_site",
        "description": "Create a repo and push the site",
        "inputSchema": {
            "properties": {"repo_name": {"type": "string"}},
            "required": ["repo_name"]
        },
        "steps": [
            {
                "name": "create",
                "server": "github",
                "tool": "create_repo",
                "input": {"name": {"source": {"kind": "param", "path": "repo_name"}}},
                "output": "repo",
                "rollback": {
                    "server": "github",
                    "tool": "delete_repo",
                    "input": {"repo": {"source": {"kind": "output", "stepName": "create", "path": "repo.full_name"}}}
                }
            },
            {
                "name": "push",
                "server": "github",
                "tool": "push_files",
                "input": {
                    "repo": {"source": {"kind": "output", "stepName": "create", "path": "repo.full_name"}},
                    "branch": "main"
                }
            }
        ]
    }))
    .unwrap()
}

#[tokio::test]
async fn outputs_chain_between_steps() {
    let dispatch = Arc::new(
        MockDispatch::with_tools(&["create_repo", "push_files", "delete_repo"])
            .respond("create_repo", |_| {
                Ok(structured_result(json!({"full_name": "acme/site", "id": 7})))
            })
            .respond("push_files", |_| Ok(structured_result(json!({"pushed": 3})))),
    );

    let composer = ComposeExecutor::new(dispatch.clone());
    composer.register_tool(publish_site()).unwrap();

    let result = composer
        .execute_tool("publish_site", json!({"repo_name": "site"}))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.step_results.len(), 2);
    assert!(result.step_results.iter().all(|s| s.status == StepStatus::Success));
    assert_eq!(result.outputs["repo"]["full_name"], "acme/site");

    // The second step received the first step's output.
    let pushes = dispatch.calls_to("push_files");
    assert_eq!(pushes[0]["repo"], "acme/site");
    assert_eq!(pushes[0]["branch"], "main");
    // No failure, no compensators.
    assert!(result.rollback_info.is_none());
    assert!(dispatch.calls_to("delete_repo").is_empty());
}

#[tokio::test]
async fn failing_step_triggers_rollback_once() {
    let dispatch = Arc::new(
        MockDispatch::with_tools(&["create_repo", "push_files", "delete_repo"])
            .respond("create_repo", |_| {
                Ok(structured_result(json!({"full_name": "acme/site"})))
            })
            .respond("push_files", |_| Err(call_error("push_files"))),
    );

    let composer = ComposeExecutor::new(dispatch.clone());
    composer.register_tool(publish_site()).unwrap();

    let result = composer
        .execute_tool("publish_site", json!({"repo_name": "site"}))
        .await
        .unwrap();

    assert!(!result.success);
    let push = result.step_results.iter().find(|s| s.name == "push").unwrap();
    assert_eq!(push.status, StepStatus::Failed);
    assert!(push.error.as_deref().unwrap().contains("push_files"));

    let info = result.rollback_info.unwrap();
    assert!(info.triggered);
    assert!(info.successful);

    // The compensator ran exactly once, with the repo from step one.
    let deletions = dispatch.calls_to("delete_repo");
    assert_eq!(deletions.len(), 1);
    assert_eq!(deletions[0]["repo"], "acme/site");
}

#[tokio::test]
async fn compensator_failure_does_not_abort_drain() {
    let def: ComposedTool = serde_json::from_value(json!({
        "name": "two_writes",
        "steps": [
            {
                "name": "first", "server": "kv", "tool": "write_a", "output": "a",
                "rollback": {"server": "kv", "tool": "undo_a", "input": {}}
            },
            {
                "name": "second", "server": "kv", "tool": "write_b", "output": "b",
                "rollback": {"server": "kv", "tool": "undo_b", "input": {}}
            },
            {"name": "third", "server": "kv", "tool": "write_c"}
        ]
    }))
    .unwrap();

    let dispatch = Arc::new(
        MockDispatch::with_tools(&["write_a", "write_b", "write_c", "undo_a", "undo_b"])
            .respond("write_c", |_| Err(call_error("write_c")))
            .respond("undo_b", |_| Err(call_error("undo_b"))),
    );

    let composer = ComposeExecutor::new(dispatch.clone());
    composer.register_tool(def).unwrap();
    let result = composer.execute_tool("two_writes", json!({})).await.unwrap();

    assert!(!result.success);
    let info = result.rollback_info.unwrap();
    assert!(info.triggered);
    assert!(!info.successful);
    assert!(info.error.unwrap().contains("undo_b"));

    // LIFO drain: undo_b first, then undo_a despite undo_b's failure.
    let order = dispatch.call_order();
    let undo_b_at = order.iter().position(|t| t == "undo_b").unwrap();
    let undo_a_at = order.iter().position(|t| t == "undo_a").unwrap();
    assert!(undo_b_at < undo_a_at);
    assert_eq!(dispatch.calls_to("undo_a").len(), 1);
}

#[tokio::test]
async fn condition_skips_step_without_failing() {
    let def: ComposedTool = serde_json::from_value(json!({
        "name": "conditional",
        "steps": [
            {"name": "probe", "server": "kv", "tool": "lookup", "output": "found"},
            {
                "name": "cleanup", "server": "kv", "tool": "clear_cache",
                "condition": {"type": "failure", "stepName": "probe"}
            }
        ]
    }))
    .unwrap();

    let dispatch = Arc::new(MockDispatch::with_tools(&["lookup", "clear_cache"]));
    let composer = ComposeExecutor::new(dispatch.clone());
    composer.register_tool(def).unwrap();

    let result = composer.execute_tool("conditional", json!({})).await.unwrap();
    assert!(result.success);
    let cleanup = result.step_results.iter().find(|s| s.name == "cleanup").unwrap();
    assert_eq!(cleanup.status, StepStatus::Skipped);
    assert!(dispatch.calls_to("clear_cache").is_empty());
}

#[tokio::test]
async fn expression_condition_is_deterministically_true() {
    let def: ComposedTool = serde_json::from_value(json!({
        "name": "expr",
        "steps": [
            {
                "name": "always", "server": "kv", "tool": "lookup",
                "condition": {"type": "expression", "expression": "params.dry_run == false"}
            }
        ]
    }))
    .unwrap();

    let dispatch = Arc::new(MockDispatch::with_tools(&["lookup"]));
    let composer = ComposeExecutor::new(dispatch.clone());
    composer.register_tool(def).unwrap();

    let result = composer.execute_tool("expr", json!({})).await.unwrap();
    assert!(result.success);
    assert_eq!(dispatch.calls_to("lookup").len(), 1);
}

#[tokio::test]
async fn missing_parameter_fails_before_any_call() {
    let dispatch = Arc::new(MockDispatch::with_tools(&[
        "create_repo",
        "push_files",
        "delete_repo",
    ]));
    let composer = ComposeExecutor::new(dispatch.clone());
    composer.register_tool(publish_site()).unwrap();

    let err = composer
        .execute_tool("publish_site", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ComposeError::Validation { .. }), "{err:?}");
    assert!(dispatch.call_order().is_empty());
}

#[tokio::test]
async fn unregistered_tool_is_an_error() {
    let dispatch = Arc::new(MockDispatch::with_tools(&[]));
    let composer = ComposeExecutor::new(dispatch);
    let err = composer.execute_tool("ghost", json!({})).await.unwrap_err();
    assert!(matches!(err, ComposeError::NotRegistered { .. }), "{err:?}");
}

#[tokio::test]
async fn registration_rejects_unknown_tool_against_live_catalog() {
    // Catalog lacks push_files: registration must fail.
    let dispatch = Arc::new(MockDispatch::with_tools(&["create_repo", "delete_repo"]));
    let composer = ComposeExecutor::new(dispatch);
    let err = composer.register_tool(publish_site()).unwrap_err();
    match err {
        ComposeError::UnknownTool { tool, .. } => assert_eq!(tool, "push_files"),
        other => panic!("expected UnknownTool, got {other:?}"),
    }
}

#[tokio::test]
async fn backend_reported_error_fails_the_step() {
    let def: ComposedTool = serde_json::from_value(json!({
        "name": "reported",
        "steps": [{"name": "only", "server": "kv", "tool": "lookup"}]
    }))
    .unwrap();

    let dispatch = Arc::new(MockDispatch::with_tools(&["lookup"]).respond("lookup", |_| {
        Ok(ToolCallResult {
            content: vec![relay_types::ToolContent::Text {
                text: "no such key".into(),
            }],
            is_error: true,
            structured: None,
        })
    }));

    let composer = ComposeExecutor::new(dispatch);
    composer.register_tool(def).unwrap();
    let result = composer.execute_tool("reported", json!({})).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.step_results[0].status, StepStatus::Failed);
    assert_eq!(result.step_results[0].error.as_deref(), Some("no such key"));
}
