//! Connection status and capability types published by the hub.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of one backend connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Connecting,
    Connected,
    #[default]
    Disconnected,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Connecting => "connecting",
            ServerStatus::Connected => "connected",
            ServerStatus::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability flags advertised by a server in its `initialize` reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: bool,
    #[serde(default)]
    pub resources: bool,
    #[serde(default)]
    pub resource_templates: bool,
}

/// The published record for one connection, as returned by
/// `Hub::list_connections`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub name: String,
    pub status: ServerStatus,
    pub capabilities: ServerCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_connect_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
}

/// A status change broadcast to subscribers. Delivery is asynchronous; the
/// supervisor never waits on listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub server: String,
    pub status: ServerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub capabilities: ServerCapabilities,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&ServerStatus::Connected).unwrap(),
            "\"connected\""
        );
        let back: ServerStatus = serde_json::from_str("\"connecting\"").unwrap();
        assert_eq!(back, ServerStatus::Connecting);
    }

    #[test]
    fn capabilities_default_all_false() {
        let caps = ServerCapabilities::default();
        assert!(!caps.tools);
        assert!(!caps.resources);
        assert!(!caps.resource_templates);
    }

    #[test]
    fn capabilities_deserialize_partial() {
        let caps: ServerCapabilities =
            serde_json::from_str(r#"{"tools": true}"#).unwrap();
        assert!(caps.tools);
        assert!(!caps.resources);
    }

    #[test]
    fn connection_info_omits_empty_fields() {
        let info = ConnectionInfo {
            name: "github".into(),
            status: ServerStatus::Disconnected,
            capabilities: ServerCapabilities::default(),
            last_error: None,
            last_successful_connect_at: None,
            retry_count: 0,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert!(json.get("last_error").is_none());
        assert!(json.get("last_successful_connect_at").is_none());
        assert_eq!(json["retry_count"], 0);
    }
}
