//! Tool and resource catalog: per-server descriptor caches.
//!
//! Entries are immutable after publication; replacing a server's set is a
//! pointer swap, so lookups never block on a refresh in progress.

use relay_types::{ResourceDescriptor, ResourceTemplateDescriptor, ToolDescriptor};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type ToolSet = Arc<HashMap<String, ToolDescriptor>>;

/// Cache of descriptors fetched from connected backends.
#[derive(Default)]
pub struct ToolCatalog {
    tools: RwLock<HashMap<String, ToolSet>>,
    resources: RwLock<HashMap<String, Arc<Vec<ResourceDescriptor>>>>,
    templates: RwLock<HashMap<String, Arc<Vec<ResourceTemplateDescriptor>>>>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a server's tool set, replacing any previous snapshot.
    pub fn publish_tools(&self, server: &str, tools: Vec<ToolDescriptor>) {
        for tool in &tools {
            for field in &tool.input_schema.required {
                if !tool.input_schema.properties.contains_key(field) {
                    tracing::warn!(
                        server = %server,
                        tool = %tool.name,
                        "required field '{field}' is not among the declared properties"
                    );
                }
            }
        }
        let set: HashMap<String, ToolDescriptor> =
            tools.into_iter().map(|t| (t.name.clone(), t)).collect();
        self.tools
            .write()
            .unwrap()
            .insert(server.to_string(), Arc::new(set));
    }

    pub fn publish_resources(&self, server: &str, resources: Vec<ResourceDescriptor>) {
        self.resources
            .write()
            .unwrap()
            .insert(server.to_string(), Arc::new(resources));
    }

    pub fn publish_templates(&self, server: &str, templates: Vec<ResourceTemplateDescriptor>) {
        self.templates
            .write()
            .unwrap()
            .insert(server.to_string(), Arc::new(templates));
    }

    /// Drop everything cached for a server (on disconnect or removal).
    pub fn clear(&self, server: &str) {
        self.tools.write().unwrap().remove(server);
        self.resources.write().unwrap().remove(server);
        self.templates.write().unwrap().remove(server);
    }

    /// Look up one tool descriptor by `(server, tool)`.
    pub fn get(&self, server: &str, tool: &str) -> Option<ToolDescriptor> {
        self.tools
            .read()
            .unwrap()
            .get(server)?
            .get(tool)
            .cloned()
    }

    pub fn has_tool(&self, server: &str, tool: &str) -> bool {
        self.tools
            .read()
            .unwrap()
            .get(server)
            .is_some_and(|set| set.contains_key(tool))
    }

    /// All descriptors for a server, empty if none were published.
    pub fn tools(&self, server: &str) -> Vec<ToolDescriptor> {
        self.tools
            .read()
            .unwrap()
            .get(server)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Tool names for a server, sorted for stable diagnostics.
    pub fn tool_names(&self, server: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .read()
            .unwrap()
            .get(server)
            .map(|set| set.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn resources(&self, server: &str) -> Vec<ResourceDescriptor> {
        self.resources
            .read()
            .unwrap()
            .get(server)
            .map(|r| r.as_ref().clone())
            .unwrap_or_default()
    }

    pub fn templates(&self, server: &str) -> Vec<ResourceTemplateDescriptor> {
        self.templates
            .read()
            .unwrap()
            .get(server)
            .map(|t| t.as_ref().clone())
            .unwrap_or_default()
    }
}
