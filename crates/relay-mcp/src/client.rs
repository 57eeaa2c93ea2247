//! MCP client: request/response correlation and the typed protocol methods.
//!
//! Each outgoing request carries a fresh monotonic id; incoming replies are
//! matched against the pending map. Unmatched replies and server-initiated
//! notifications are logged and dropped.

use crate::error::McpError;
use crate::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND};
use crate::transport::StdioTransport;
use crate::{LIST_TIMEOUT_MS, PROTOCOL_VERSION};
use relay_config::ServerConfig;
use relay_types::{
    ResourceDescriptor, ResourceTemplateDescriptor, ServerCapabilities, ToolCallResult,
    ToolDescriptor,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;

/// Outcome of the `initialize` handshake.
#[derive(Debug, Clone)]
pub struct InitializeResult {
    pub capabilities: ServerCapabilities,
    pub server_info: Option<ServerInfoData>,
    pub protocol_version: Option<String>,
}

/// The `serverInfo` block of an `initialize` reply.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfoData {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Deserialize)]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<ToolDescriptor>,
}

#[derive(Deserialize)]
struct ResourcesListResult {
    #[serde(default)]
    resources: Vec<ResourceDescriptor>,
}

#[derive(Deserialize)]
struct ResourceTemplatesListResult {
    #[serde(default, rename = "resourceTemplates")]
    resource_templates: Vec<ResourceTemplateDescriptor>,
}

/// Client for a single backend connection.
pub struct McpClient {
    server: String,
    next_id: AtomicU64,
    transport: StdioTransport,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>,
    dispatch_handle: JoinHandle<()>,
}

impl McpClient {
    /// Spawn the backend process and start the correlation task. The
    /// protocol handshake is a separate step (`initialize`), driven by the
    /// connection supervisor.
    pub fn spawn(server: &str, config: &ServerConfig) -> Result<Self, McpError> {
        let mut transport = StdioTransport::spawn(server, config)?;
        let mut frames = transport
            .take_frames()
            .expect("frames taken once at construction");

        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let pending_for_dispatch = Arc::clone(&pending);
        let dispatch_server = server.to_string();
        let dispatch_handle = tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                let resp: JsonRpcResponse = match serde_json::from_value(frame) {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(server = %dispatch_server, "unparseable reply dropped: {e}");
                        continue;
                    }
                };
                match resp.id {
                    Some(id) => {
                        let mut pending = pending_for_dispatch.lock().await;
                        match pending.remove(&id) {
                            Some(tx) => {
                                let _ = tx.send(resp);
                            }
                            None => {
                                tracing::warn!(
                                    server = %dispatch_server,
                                    "reply with unknown id {id} dropped"
                                );
                            }
                        }
                    }
                    None => {
                        tracing::debug!(server = %dispatch_server, "server notification dropped");
                    }
                }
            }
            // Transport closed: fail everything still in flight.
            pending_for_dispatch.lock().await.clear();
        });

        Ok(Self {
            server: server.to_string(),
            next_id: AtomicU64::new(1),
            transport,
            pending,
            dispatch_handle,
        })
    }

    /// Issue one request and wait for its correlated reply.
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout_ms: Option<u64>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let request = JsonRpcRequest::new(id, method, params);
        if let Err(e) = self.transport.send(&request).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let received = match timeout_ms {
            Some(ms) => {
                match tokio::time::timeout(std::time::Duration::from_millis(ms), rx).await {
                    Ok(r) => r,
                    Err(_) => {
                        self.pending.lock().await.remove(&id);
                        return Err(McpError::Timeout {
                            server: self.server.clone(),
                            method: method.to_string(),
                            timeout_ms: ms,
                        });
                    }
                }
            }
            None => rx.await,
        };

        received.map_err(|_| McpError::Closed {
            server: self.server.clone(),
        })
    }

    /// Unwrap a reply into its result payload, mapping JSON-RPC errors.
    fn result_of(
        &self,
        method: &str,
        resp: JsonRpcResponse,
    ) -> Result<serde_json::Value, McpError> {
        if let Some(err) = resp.error {
            if err.code == METHOD_NOT_FOUND {
                return Err(McpError::MethodNotFound {
                    server: self.server.clone(),
                    method: method.to_string(),
                });
            }
            return Err(McpError::JsonRpc {
                server: self.server.clone(),
                code: err.code,
                message: err.message,
            });
        }
        resp.result.ok_or_else(|| McpError::ProtocolMismatch {
            server: self.server.clone(),
            method: method.to_string(),
            detail: "reply has neither result nor error".to_string(),
        })
    }

    fn parse<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        value: serde_json::Value,
    ) -> Result<T, McpError> {
        serde_json::from_value(value).map_err(|e| McpError::ProtocolMismatch {
            server: self.server.clone(),
            method: method.to_string(),
            detail: e.to_string(),
        })
    }

    /// The MCP handshake: `initialize` followed by `notifications/initialized`.
    pub async fn initialize(
        &self,
        client_name: &str,
        client_version: &str,
    ) -> Result<InitializeResult, McpError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": client_name,
                "version": client_version,
            }
        });

        let resp = self.request("initialize", Some(params), None).await?;
        let result = self.result_of("initialize", resp)?;

        let caps = result
            .get("capabilities")
            .and_then(|c| c.as_object())
            .cloned()
            .unwrap_or_default();
        let capabilities = ServerCapabilities {
            tools: caps.contains_key("tools"),
            resources: caps.contains_key("resources"),
            // Template listing rides on the resources capability unless the
            // server flags it separately.
            resource_templates: caps.contains_key("resourceTemplates")
                || caps.contains_key("resources"),
        };

        let server_info = result
            .get("serverInfo")
            .and_then(|v| serde_json::from_value(v.clone()).ok());
        let protocol_version = result
            .get("protocolVersion")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        self.transport
            .send(&JsonRpcNotification::new("notifications/initialized", None))
            .await?;

        Ok(InitializeResult {
            capabilities,
            server_info,
            protocol_version,
        })
    }

    /// Enumerate the server's tool catalog. 5 s deadline.
    pub async fn tools_list(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let resp = self
            .request("tools/list", None, Some(LIST_TIMEOUT_MS))
            .await?;
        let result = self.result_of("tools/list", resp)?;
        let list: ToolsListResult = self.parse("tools/list", result)?;
        Ok(list.tools)
    }

    /// Invoke one tool. No per-request timeout; higher layers bound the call.
    pub async fn tools_call(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, McpError> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });
        let resp = self.request("tools/call", Some(params), None).await?;
        let result = self.result_of("tools/call", resp)?;
        self.parse("tools/call", result)
    }

    /// Enumerate readable resources. 5 s deadline.
    pub async fn resources_list(&self) -> Result<Vec<ResourceDescriptor>, McpError> {
        let resp = self
            .request("resources/list", None, Some(LIST_TIMEOUT_MS))
            .await?;
        let result = self.result_of("resources/list", resp)?;
        let list: ResourcesListResult = self.parse("resources/list", result)?;
        Ok(list.resources)
    }

    /// Enumerate resource templates. 5 s deadline.
    pub async fn resource_templates_list(
        &self,
    ) -> Result<Vec<ResourceTemplateDescriptor>, McpError> {
        let resp = self
            .request("resources/templates/list", None, Some(LIST_TIMEOUT_MS))
            .await?;
        let result = self.result_of("resources/templates/list", resp)?;
        let list: ResourceTemplatesListResult = self.parse("resources/templates/list", result)?;
        Ok(list.resource_templates)
    }

    /// A watch that flips to `true` when the underlying transport closes.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.transport.closed()
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Shut down the connection and the backend process.
    pub async fn shutdown(self) {
        self.dispatch_handle.abort();
        self.transport.shutdown().await;
    }
}
