//! Per-server connection supervisor.
//!
//! Owns the client for one backend and drives the lifecycle state machine:
//!
//! ```text
//! disconnected ── connect ──▶ connecting
//! connecting   ── initialize ok ──▶ connected
//! connecting   ── spawn/init error | timeout ──▶ disconnected
//! connected    ── transport closed ──▶ disconnected
//! ```
//!
//! On reaching connected the supervisor snapshots the server's capabilities
//! and populates the catalog. Status changes are broadcast; listeners are
//! never awaited.

use crate::CLIENT_NAME;
use crate::catalog::ToolCatalog;
use crate::error::HubError;
use crate::queue::CallTarget;
use chrono::{DateTime, Utc};
use relay_config::ServerConfig;
use relay_mcp::{InitializeResult, McpClient, McpError};
use relay_types::{
    ConnectionInfo, ServerCapabilities, ServerStatus, StatusEvent, ToolCallResult,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

/// Supervision knobs, taken from `HubConfig`.
#[derive(Debug, Clone, Copy)]
pub struct SupervisionLimits {
    pub max_attempts: u32,
    pub connect_timeout_secs: u64,
}

struct State {
    status: ServerStatus,
    capabilities: ServerCapabilities,
    client: Option<Arc<McpClient>>,
    retry_count: u32,
    last_error: Option<String>,
    last_connected_at: Option<DateTime<Utc>>,
    monitor: Option<JoinHandle<()>>,
    /// Bumped on every connect attempt so a stale monitor cannot tear down
    /// a newer connection.
    epoch: u64,
}

/// Supervisor for one configured backend.
pub struct Supervisor {
    name: String,
    config: ServerConfig,
    limits: SupervisionLimits,
    catalog: Arc<ToolCatalog>,
    status_tx: broadcast::Sender<StatusEvent>,
    state: Mutex<State>,
}

impl Supervisor {
    pub fn new(
        name: &str,
        config: ServerConfig,
        limits: SupervisionLimits,
        catalog: Arc<ToolCatalog>,
        status_tx: broadcast::Sender<StatusEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            config,
            limits,
            catalog,
            status_tx,
            state: Mutex::new(State {
                status: ServerStatus::Disconnected,
                capabilities: ServerCapabilities::default(),
                client: None,
                retry_count: 0,
                last_error: None,
                last_connected_at: None,
                monitor: None,
                epoch: 0,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Published connection record.
    pub async fn info(&self) -> ConnectionInfo {
        let state = self.state.lock().await;
        ConnectionInfo {
            name: self.name.clone(),
            status: state.status,
            capabilities: state.capabilities,
            last_error: state.last_error.clone(),
            last_successful_connect_at: state.last_connected_at,
            retry_count: state.retry_count,
        }
    }

    fn set_status(&self, state: &mut State, status: ServerStatus, error: Option<String>) {
        state.status = status;
        match (&error, status) {
            (Some(e), _) => state.last_error = Some(e.clone()),
            (None, ServerStatus::Connected) => state.last_error = None,
            _ => {}
        }
        let _ = self.status_tx.send(StatusEvent {
            server: self.name.clone(),
            status,
            error,
            capabilities: state.capabilities,
        });
    }

    /// Idempotent connect. Returns the live client immediately when already
    /// connected; otherwise makes exactly one bounded connect attempt. After
    /// the attempt budget is spent, fails until a manual reconnect resets it.
    pub async fn ensure_connection(self: &Arc<Self>) -> Result<Arc<McpClient>, HubError> {
        let mut state = self.state.lock().await;

        if state.status == ServerStatus::Connected {
            if let Some(client) = &state.client {
                if !client.is_closed() {
                    return Ok(Arc::clone(client));
                }
            }
            // The monitor has not caught up yet; record the loss here.
            state.client = None;
            self.set_status(
                &mut state,
                ServerStatus::Disconnected,
                Some("transport closed".to_string()),
            );
        }

        if state.retry_count >= self.limits.max_attempts {
            return Err(HubError::MaxRetriesExceeded {
                server: self.name.clone(),
                attempts: state.retry_count,
            });
        }

        self.connect_locked(&mut state).await
    }

    /// Manual reconnect: resets the retry budget and replaces any existing
    /// connection.
    pub async fn reconnect(self: &Arc<Self>) -> Result<(), HubError> {
        let mut state = self.state.lock().await;
        if let Some(monitor) = state.monitor.take() {
            monitor.abort();
        }
        if let Some(client) = state.client.take() {
            tokio::spawn(async move {
                if let Ok(client) = Arc::try_unwrap(client) {
                    client.shutdown().await;
                }
            });
        }
        state.retry_count = 0;
        self.connect_locked(&mut state).await.map(|_| ())
    }

    async fn connect_locked(
        self: &Arc<Self>,
        state: &mut State,
    ) -> Result<Arc<McpClient>, HubError> {
        state.epoch += 1;
        let epoch = state.epoch;
        self.set_status(state, ServerStatus::Connecting, None);

        let attempt = async {
            let client = McpClient::spawn(&self.name, &self.config)?;
            let init = client
                .initialize(CLIENT_NAME, env!("CARGO_PKG_VERSION"))
                .await?;
            Ok::<(McpClient, InitializeResult), McpError>((client, init))
        };

        let timeout = std::time::Duration::from_secs(self.limits.connect_timeout_secs);
        let (client, init) = match tokio::time::timeout(timeout, attempt).await {
            Err(_) => {
                state.retry_count += 1;
                let detail = format!(
                    "connection attempt timed out after {}s",
                    self.limits.connect_timeout_secs
                );
                self.set_status(state, ServerStatus::Disconnected, Some(detail));
                return Err(HubError::ConnectTimeout {
                    server: self.name.clone(),
                    timeout_secs: self.limits.connect_timeout_secs,
                });
            }
            Ok(Err(e)) => {
                state.retry_count += 1;
                self.set_status(state, ServerStatus::Disconnected, Some(e.to_string()));
                return Err(HubError::Mcp(e));
            }
            Ok(Ok(pair)) => pair,
        };

        let client = Arc::new(client);
        state.capabilities = init.capabilities;
        state.retry_count = 0;
        state.last_connected_at = Some(Utc::now());
        state.client = Some(Arc::clone(&client));
        self.set_status(state, ServerStatus::Connected, None);
        tracing::info!(server = %self.name, "connected");

        self.populate_catalog(&client, init.capabilities).await;

        // Watch for transport loss for the lifetime of this connection.
        let mut closed = client.closed();
        let supervisor = Arc::clone(self);
        state.monitor = Some(tokio::spawn(async move {
            while !*closed.borrow() {
                if closed.changed().await.is_err() {
                    break;
                }
            }
            supervisor.on_transport_closed(epoch).await;
        }));

        Ok(client)
    }

    /// Fetch and publish the catalogs the server advertises. Missing list
    /// methods are a soft absence; other failures are logged and leave the
    /// connection up with an empty catalog.
    async fn populate_catalog(&self, client: &McpClient, capabilities: ServerCapabilities) {
        if capabilities.tools {
            match client.tools_list().await {
                Ok(tools) => {
                    tracing::info!(server = %self.name, count = tools.len(), "tools discovered");
                    self.catalog.publish_tools(&self.name, tools);
                }
                Err(McpError::MethodNotFound { .. }) => {
                    tracing::debug!(server = %self.name, "tools/list not implemented");
                }
                Err(e) => {
                    tracing::warn!(server = %self.name, "tools/list failed: {e}");
                }
            }
        }
        if capabilities.resources {
            match client.resources_list().await {
                Ok(resources) => self.catalog.publish_resources(&self.name, resources),
                Err(McpError::MethodNotFound { .. }) => {}
                Err(e) => tracing::warn!(server = %self.name, "resources/list failed: {e}"),
            }
        }
        if capabilities.resource_templates {
            match client.resource_templates_list().await {
                Ok(templates) => self.catalog.publish_templates(&self.name, templates),
                Err(McpError::MethodNotFound { .. }) => {}
                Err(e) => {
                    tracing::warn!(server = %self.name, "resources/templates/list failed: {e}");
                }
            }
        }
    }

    async fn on_transport_closed(self: Arc<Self>, epoch: u64) {
        let mut state = self.state.lock().await;
        if state.epoch != epoch || state.status != ServerStatus::Connected {
            return;
        }
        state.client = None;
        tracing::warn!(server = %self.name, "transport closed");
        self.set_status(
            &mut state,
            ServerStatus::Disconnected,
            Some("transport closed".to_string()),
        );
    }

    /// Tear the connection down for good and drop the cached catalogs.
    pub async fn shutdown(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        if let Some(monitor) = state.monitor.take() {
            monitor.abort();
        }
        state.epoch += 1;
        let client = state.client.take();
        self.catalog.clear(&self.name);
        if state.status != ServerStatus::Disconnected {
            self.set_status(&mut state, ServerStatus::Disconnected, None);
        }
        drop(state);

        if let Some(client) = client {
            if let Ok(client) = Arc::try_unwrap(client) {
                client.shutdown().await;
            }
        }
    }
}

/// Adapter that lets a queue worker dispatch against a supervisor.
pub struct SupervisorTarget(pub Arc<Supervisor>);

impl CallTarget for SupervisorTarget {
    fn dispatch(
        &self,
        tool: String,
        args: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<ToolCallResult, HubError>> + Send + '_>> {
        let supervisor = Arc::clone(&self.0);
        Box::pin(async move {
            let client = match supervisor.ensure_connection().await {
                Ok(client) => client,
                Err(HubError::MaxRetriesExceeded { .. }) => {
                    // A call against a dead server reports its status record.
                    let info = supervisor.info().await;
                    return Err(HubError::NotConnected {
                        server: info.name,
                        status: info.status,
                        last_error: info.last_error,
                    });
                }
                Err(e) => return Err(e),
            };
            client
                .tools_call(&tool, args)
                .await
                .map_err(|source| HubError::CallFailed {
                    server: supervisor.name().to_string(),
                    tool,
                    source,
                })
        })
    }
}
