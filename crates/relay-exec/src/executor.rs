//! The tool executor.
//!
//! One `execute` call runs the full pipeline: resolve the descriptor,
//! classify danger and capture rollback state, pass the confirmation gate,
//! validate and enrich arguments (defaults, then optional LLM completion),
//! dispatch through the hub with bounded retries, and on failure attempt the
//! captured rollback.

use crate::completion::{self, CompletionModel};
use crate::confirm::ConfirmationHandler;
use crate::context::ServerContext;
use crate::error::ExecError;
use crate::rollback;
use crate::safety;
use relay_config::ExecutorConfig;
use relay_hub::{HubError, McpError, ToolDispatch};
use relay_types::{OperationKind, ToolCallResult, ToolDescriptor};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One tool-invocation request.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub server: String,
    pub tool: String,
    pub arguments: serde_json::Value,
}

/// What happened to one request. The executor resolves every call to one of
/// these; it never throws across its boundary.
#[derive(Debug)]
pub struct ExecOutcome {
    pub ok: bool,
    pub data: Option<ToolCallResult>,
    pub error: Option<ExecError>,
    pub missing_fields: Option<Vec<String>>,
    pub rollback_error: Option<String>,
}

impl ExecOutcome {
    fn success(data: ToolCallResult) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            missing_fields: None,
            rollback_error: None,
        }
    }

    fn failure(error: ExecError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error),
            missing_fields: None,
            rollback_error: None,
        }
    }

    fn missing(fields: Vec<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ExecError::MissingFields {
                fields: fields.clone(),
            }),
            missing_fields: Some(fields),
            rollback_error: None,
        }
    }

    /// Backend reported the operation failed; its message is in the content.
    fn reported_failure(data: ToolCallResult) -> Self {
        Self {
            ok: false,
            data: Some(data),
            error: None,
            missing_fields: None,
            rollback_error: None,
        }
    }
}

/// The tool executor. Owns per-server contexts; reaches the hub through the
/// dispatch seam.
pub struct ToolExecutor {
    dispatch: Arc<dyn ToolDispatch>,
    config: ExecutorConfig,
    contexts: Mutex<HashMap<String, ServerContext>>,
    confirmation: Option<Arc<dyn ConfirmationHandler>>,
    model: Option<Arc<dyn CompletionModel>>,
}

impl ToolExecutor {
    pub fn new(dispatch: Arc<dyn ToolDispatch>, config: ExecutorConfig) -> Self {
        Self {
            dispatch,
            config,
            contexts: Mutex::new(HashMap::new()),
            confirmation: None,
            model: None,
        }
    }

    pub fn with_confirmation(mut self, handler: Arc<dyn ConfirmationHandler>) -> Self {
        self.confirmation = Some(handler);
        self
    }

    pub fn with_model(mut self, model: Arc<dyn CompletionModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Execute one tool call end to end.
    pub async fn execute(&self, req: ExecRequest) -> ExecOutcome {
        let Some(descriptor) = self.dispatch.descriptor(&req.server, &req.tool) else {
            return ExecOutcome::failure(ExecError::Hub(HubError::ToolNotFound {
                server: req.server.clone(),
                tool: req.tool.clone(),
                available: self.dispatch.tool_names(&req.server),
            }));
        };

        let mut args = if req.arguments.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            req.arguments.clone()
        };

        // Danger classification and state capture, before anything runs.
        let dangerous = safety::is_dangerous(&descriptor, &self.config.safety);
        let operation = OperationKind::classify(&req.tool);
        let previous_state = if dangerous {
            rollback::capture_previous_state(
                self.dispatch.as_ref(),
                &req.server,
                &req.tool,
                &args,
                operation,
            )
            .await
        } else {
            None
        };

        // Confirmation gate. No handler installed means deny.
        if safety::requires_confirmation(&descriptor, &self.config.safety) {
            let message = safety::confirmation_message(&descriptor, &req.server);
            let approved = match &self.confirmation {
                Some(handler) => {
                    handler
                        .confirm(&req.server, &req.tool, &args, &message)
                        .await
                }
                None => false,
            };
            if !approved {
                tracing::info!(server = %req.server, tool = %req.tool, "call denied by user");
                return ExecOutcome::failure(ExecError::UserDenied {
                    server: req.server.clone(),
                    tool: req.tool.clone(),
                });
            }
        }

        // Validation and enrichment, with the optional completion loop.
        let mut missing = self
            .validate_and_enrich(&descriptor, &req.server, &req.tool, &mut args)
            .await;
        if !missing.is_empty() {
            match (&self.model, self.config.llm_enabled) {
                (Some(model), true) => {
                    let mut attempt = 0;
                    while !missing.is_empty() && attempt < self.config.max_retries {
                        attempt += 1;
                        let prompt = completion::build_prompt(
                            &descriptor,
                            &args,
                            &missing,
                            attempt,
                            self.config.max_retries,
                        );
                        let reply = match model.complete(&prompt).await {
                            Ok(text) => completion::parse_reply(&text),
                            Err(e) => {
                                tracing::warn!(tool = %req.tool, "completion failed: {e}");
                                None
                            }
                        };
                        let Some(reply) = reply else {
                            // The model failed or was unusable: fall back to
                            // the deterministic user prompt, no model retry.
                            tracing::info!(
                                tool = %req.tool,
                                "{}",
                                completion::fallback_prompt(&req.tool, &missing)
                            );
                            return ExecOutcome::missing(missing);
                        };

                        if !reply.provided_values.is_empty() {
                            if let Some(obj) = args.as_object_mut() {
                                for (key, value) in reply.provided_values {
                                    obj.insert(key, value);
                                }
                            }
                        }
                        missing = self
                            .validate_and_enrich(&descriptor, &req.server, &req.tool, &mut args)
                            .await;

                        if reply.should_prompt_user && !missing.is_empty() {
                            if let Some(prompt) = reply.user_prompt {
                                tracing::info!(tool = %req.tool, "{prompt}");
                            }
                            return ExecOutcome::missing(missing);
                        }
                    }
                    if !missing.is_empty() {
                        return ExecOutcome::missing(missing);
                    }
                }
                _ => return ExecOutcome::missing(missing),
            }
        }

        tracing::debug!(
            server = %req.server,
            tool = %req.tool,
            args = %safety::redact_args(&args, &self.config.safety.sensitive_fields),
            "dispatching"
        );

        // Dispatch, with bounded retries for transient failures.
        match self.call_with_retry(&req.server, &req.tool, args.clone()).await {
            Ok(result) => {
                let ok = !result.is_error;
                self.record_operation(&req.server, &req.tool, ok).await;
                if ok {
                    ExecOutcome::success(result)
                } else {
                    ExecOutcome::reported_failure(result)
                }
            }
            Err(e) => {
                self.record_operation(&req.server, &req.tool, false).await;
                let rollback_error = match &previous_state {
                    Some(previous) => rollback::attempt_rollback(
                        self.dispatch.as_ref(),
                        &req.server,
                        &req.tool,
                        operation,
                        &args,
                        previous,
                    )
                    .await
                    .err(),
                    None => None,
                };
                ExecOutcome {
                    ok: false,
                    data: None,
                    error: Some(ExecError::Hub(e)),
                    missing_fields: None,
                    rollback_error,
                }
            }
        }
    }

    /// Fill required fields from the server context; report what remains.
    async fn validate_and_enrich(
        &self,
        descriptor: &ToolDescriptor,
        server: &str,
        tool: &str,
        args: &mut serde_json::Value,
    ) -> Vec<String> {
        let mut contexts = self.contexts.lock().await;
        let context = contexts.entry(server.to_string()).or_insert_with(|| {
            let defaults = self
                .config
                .server_defaults
                .get(server)
                .cloned()
                .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));
            ServerContext::new("default", defaults)
        });
        context.touch();

        let mut missing = Vec::new();
        for field in &descriptor.input_schema.required {
            if args.get(field).is_some() {
                continue;
            }
            if self.config.safety.auto_fill_defaults {
                if let Some(value) = context.default_for(tool, field) {
                    if let Some(obj) = args.as_object_mut() {
                        obj.insert(field.clone(), value);
                        continue;
                    }
                }
            }
            missing.push(field.clone());
        }
        missing
    }

    async fn record_operation(&self, server: &str, tool: &str, success: bool) {
        let mut contexts = self.contexts.lock().await;
        if let Some(context) = contexts.get_mut(server) {
            context.record_operation(tool, success);
        }
    }

    async fn call_with_retry(
        &self,
        server: &str,
        tool: &str,
        args: serde_json::Value,
    ) -> Result<ToolCallResult, HubError> {
        let mut attempt = 0;
        loop {
            match self.dispatch.call_tool(server, tool, args.clone()).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if attempt >= self.config.max_retries || !e.is_transient() {
                        return Err(e);
                    }
                    attempt += 1;
                    tracing::warn!(
                        server = %server,
                        tool = %tool,
                        attempt,
                        "call failed, retrying: {e}"
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(
                        self.config.retry_backoff_ms,
                    ))
                    .await;
                    if needs_reconnect(&e) {
                        if let Err(reconnect_err) = self.dispatch.reconnect(server).await {
                            tracing::warn!(server = %server, "reconnect failed: {reconnect_err}");
                        }
                    }
                }
            }
        }
    }

    /// Server context snapshot, for embedders that surface it.
    pub async fn server_context(&self, server: &str) -> Option<ServerContext> {
        self.contexts.lock().await.get(server).cloned()
    }
}

fn needs_reconnect(error: &HubError) -> bool {
    match error {
        HubError::NotConnected { .. } | HubError::ConnectTimeout { .. } => true,
        HubError::CallFailed { source, .. } | HubError::Mcp(source) => {
            matches!(source, McpError::Closed { .. } | McpError::Io(_))
        }
        _ => false,
    }
}
