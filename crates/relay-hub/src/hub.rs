//! The hub facade: stable entry points over supervisors, queues, and the
//! catalog.

use crate::catalog::ToolCatalog;
use crate::dispatch::ToolDispatch;
use crate::error::HubError;
use crate::queue::{AdmissionGate, ServerQueue};
use crate::supervisor::{SupervisionLimits, Supervisor, SupervisorTarget};
use futures_util::future::join_all;
use relay_config::HubConfig;
use relay_types::{
    ConnectionInfo, ResourceDescriptor, ResourceTemplateDescriptor, StatusEvent, ToolCallResult,
    ToolDescriptor,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast;

/// The tool dispatch hub. One instance per process; construction wires a
/// supervisor and a call queue per configured server.
pub struct Hub {
    supervisors: HashMap<String, Arc<Supervisor>>,
    queues: HashMap<String, ServerQueue>,
    catalog: Arc<ToolCatalog>,
    gate: Arc<AdmissionGate>,
    status_tx: broadcast::Sender<StatusEvent>,
}

impl Hub {
    pub fn new(config: HubConfig) -> Arc<Self> {
        let catalog = Arc::new(ToolCatalog::new());
        let gate = AdmissionGate::new(config.max_concurrent_operations);
        let (status_tx, _) = broadcast::channel(64);
        let limits = SupervisionLimits {
            max_attempts: config.max_connect_attempts,
            connect_timeout_secs: config.connect_timeout_secs,
        };

        let mut supervisors = HashMap::new();
        let mut queues = HashMap::new();
        for (name, server_config) in config.servers {
            let supervisor = Supervisor::new(
                &name,
                server_config,
                limits,
                Arc::clone(&catalog),
                status_tx.clone(),
            );
            let queue = ServerQueue::spawn(
                &name,
                Arc::clone(&gate),
                Arc::new(SupervisorTarget(Arc::clone(&supervisor))),
            );
            supervisors.insert(name.clone(), supervisor);
            queues.insert(name, queue);
        }

        Arc::new(Self {
            supervisors,
            queues,
            catalog,
            gate,
            status_tx,
        })
    }

    /// Connect every configured server in parallel. A single server's
    /// failure never fails the hub; it is logged and the server stays
    /// reachable via `reconnect_server`.
    pub async fn initialize(&self) {
        let attempts = self.supervisors.values().map(|supervisor| async move {
            (
                supervisor.name().to_string(),
                supervisor.ensure_connection().await,
            )
        });
        for (name, result) in join_all(attempts).await {
            if let Err(e) = result {
                tracing::warn!(server = %name, "initial connect failed: {e}");
            }
        }
    }

    fn supervisor(&self, server: &str) -> Result<&Arc<Supervisor>, HubError> {
        self.supervisors
            .get(server)
            .ok_or_else(|| HubError::ConfigMissing {
                server: server.to_string(),
            })
    }

    /// Published records for every configured server, sorted by name.
    pub async fn list_connections(&self) -> Vec<ConnectionInfo> {
        let mut infos = join_all(self.supervisors.values().map(|s| s.info())).await;
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Cached tool descriptors for one server.
    pub fn list_tools(&self, server: &str) -> Result<Vec<ToolDescriptor>, HubError> {
        self.supervisor(server)?;
        Ok(self.catalog.tools(server))
    }

    pub fn list_resources(&self, server: &str) -> Result<Vec<ResourceDescriptor>, HubError> {
        self.supervisor(server)?;
        Ok(self.catalog.resources(server))
    }

    pub fn list_resource_templates(
        &self,
        server: &str,
    ) -> Result<Vec<ResourceTemplateDescriptor>, HubError> {
        self.supervisor(server)?;
        Ok(self.catalog.templates(server))
    }

    /// One tool call: connect if needed, resolve the tool, then go through
    /// the server's FIFO queue under the hub-wide admission cap.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        args: serde_json::Value,
    ) -> Result<ToolCallResult, HubError> {
        let supervisor = self.supervisor(server)?;
        let queue = self.queues.get(server).ok_or_else(|| HubError::ConfigMissing {
            server: server.to_string(),
        })?;

        supervisor.ensure_connection().await?;

        if !self.catalog.has_tool(server, tool) {
            return Err(HubError::ToolNotFound {
                server: server.to_string(),
                tool: tool.to_string(),
                available: self.catalog.tool_names(server),
            });
        }

        queue.enqueue(tool, args).await
    }

    /// Subscribe to connection status changes.
    pub fn on_status_change(&self) -> broadcast::Receiver<StatusEvent> {
        self.status_tx.subscribe()
    }

    /// Manual reconnect; resets the server's retry budget.
    pub async fn reconnect_server(&self, server: &str) -> Result<(), HubError> {
        self.supervisor(server)?.reconnect().await
    }

    pub fn catalog(&self) -> &Arc<ToolCatalog> {
        &self.catalog
    }

    /// Currently admitted tool calls.
    pub fn active_operations(&self) -> usize {
        self.gate.active()
    }

    /// Stop intake, drain in-flight calls, then close every transport.
    pub async fn shutdown(&self) {
        for queue in self.queues.values() {
            queue.close().await;
        }
        for supervisor in self.supervisors.values() {
            supervisor.shutdown().await;
        }
        tracing::info!("hub shut down");
    }
}

impl ToolDispatch for Hub {
    fn descriptor(&self, server: &str, tool: &str) -> Option<ToolDescriptor> {
        self.catalog.get(server, tool)
    }

    fn has_tool(&self, server: &str, tool: &str) -> bool {
        self.catalog.has_tool(server, tool)
    }

    fn tool_names(&self, server: &str) -> Vec<String> {
        self.catalog.tool_names(server)
    }

    fn call_tool<'a>(
        &'a self,
        server: &'a str,
        tool: &'a str,
        args: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<ToolCallResult, HubError>> + Send + 'a>> {
        Box::pin(Hub::call_tool(self, server, tool, args))
    }

    fn reconnect<'a>(
        &'a self,
        server: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), HubError>> + Send + 'a>> {
        Box::pin(self.reconnect_server(server))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_server_is_config_missing() {
        let hub = Hub::new(HubConfig::default());
        let err = hub
            .call_tool("nope", "say", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::ConfigMissing { .. }), "{err:?}");

        let err = hub.reconnect_server("nope").await.unwrap_err();
        assert!(matches!(err, HubError::ConfigMissing { .. }), "{err:?}");

        assert!(hub.list_tools("nope").is_err());
    }

    #[tokio::test]
    async fn empty_hub_lists_no_connections() {
        let hub = Hub::new(HubConfig::default());
        assert!(hub.list_connections().await.is_empty());
        assert_eq!(hub.active_operations(), 0);
        hub.shutdown().await;
    }
}
