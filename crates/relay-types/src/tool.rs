//! Tool descriptors and safety classification types.

use serde::{Deserialize, Serialize};

/// An immutable snapshot of one tool advertised by a backend via `tools/list`.
///
/// Keyed by `(server, tool)` in the catalog. The input schema keeps its
/// per-field definitions as raw JSON; callers interpret them at call time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: InputSchema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety: Option<ToolSafety>,
}

/// The `inputSchema` of a tool: an opaque `properties` map plus the list of
/// required field names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl InputSchema {
    /// Parse one property's definition into its typed view, if present.
    pub fn property(&self, field: &str) -> Option<PropertySchema> {
        let value = self.properties.get(field)?;
        serde_json::from_value(value.clone()).ok()
    }
}

/// The typed view of a single field definition inside `inputSchema.properties`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<serde_json::Value>>,
}

/// Safety annotations a backend may attach to a tool descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSafety {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_dangerous: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub danger_level: Option<DangerLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub danger_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_confirmation: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_message: Option<String>,
}

/// Ordinal danger classification. The ordering is load-bearing: confirmation
/// policy compares levels, so `None < Low < Medium < High`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DangerLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl DangerLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DangerLevel::None => "none",
            DangerLevel::Low => "low",
            DangerLevel::Medium => "medium",
            DangerLevel::High => "high",
        }
    }
}

/// The kind of side effect a tool call is assumed to have, derived from its
/// name. Classification order is fixed (Delete, Write, Modify, Execute,
/// Format); the first matching category wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationKind {
    Delete,
    Write,
    Modify,
    Execute,
    Format,
}

impl OperationKind {
    /// Name fragments that place a tool in each category.
    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            OperationKind::Delete => &["delete", "remove", "drop"],
            OperationKind::Write => &["write", "create", "push"],
            OperationKind::Modify => &["modify", "update", "alter"],
            OperationKind::Execute => &["exec", "execute", "run"],
            OperationKind::Format => &["format", "clean", "clear"],
        }
    }

    /// Classify a tool name into its operation kind. Unmatched names fall
    /// back to `Modify`.
    pub fn classify(tool_name: &str) -> Self {
        let lowered = tool_name.to_lowercase();
        for kind in [
            OperationKind::Delete,
            OperationKind::Write,
            OperationKind::Modify,
            OperationKind::Execute,
            OperationKind::Format,
        ] {
            if kind.keywords().iter().any(|kw| lowered.contains(kw)) {
                return kind;
            }
        }
        OperationKind::Modify
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_descriptor_with_safety() {
        let json = r#"{
            "name": "delete_repo",
            "description": "Delete a repository",
            "inputSchema": {
                "properties": {
                    "repo": {"type": "string", "description": "Repository name"}
                },
                "required": ["repo"]
            },
            "safety": {
                "isDangerous": true,
                "dangerLevel": "high",
                "requiresConfirmation": true
            }
        }"#;
        let desc: ToolDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(desc.name, "delete_repo");
        assert_eq!(desc.input_schema.required, vec!["repo"]);
        let safety = desc.safety.unwrap();
        assert_eq!(safety.is_dangerous, Some(true));
        assert_eq!(safety.danger_level, Some(DangerLevel::High));
    }

    #[test]
    fn deserialize_descriptor_minimal() {
        let json = r#"{"name": "say"}"#;
        let desc: ToolDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(desc.name, "say");
        assert!(desc.description.is_none());
        assert!(desc.input_schema.required.is_empty());
        assert!(desc.safety.is_none());
    }

    #[test]
    fn property_typed_view() {
        let json = r#"{
            "name": "greet",
            "inputSchema": {
                "properties": {
                    "lang": {"type": "string", "enum": ["en", "fr"]}
                },
                "required": ["lang"]
            }
        }"#;
        let desc: ToolDescriptor = serde_json::from_str(json).unwrap();
        let prop = desc.input_schema.property("lang").unwrap();
        assert_eq!(prop.kind.as_deref(), Some("string"));
        assert_eq!(prop.allowed.unwrap().len(), 2);
        assert!(desc.input_schema.property("missing").is_none());
    }

    #[test]
    fn danger_level_ordering() {
        assert!(DangerLevel::None < DangerLevel::Low);
        assert!(DangerLevel::Low < DangerLevel::Medium);
        assert!(DangerLevel::Medium < DangerLevel::High);
    }

    #[test]
    fn danger_level_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&DangerLevel::Medium).unwrap(),
            "\"medium\""
        );
        let back: DangerLevel = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(back, DangerLevel::High);
    }

    #[test]
    fn classify_first_matching_category_wins() {
        assert_eq!(OperationKind::classify("delete_repo"), OperationKind::Delete);
        assert_eq!(OperationKind::classify("push_files"), OperationKind::Write);
        assert_eq!(OperationKind::classify("update_issue"), OperationKind::Modify);
        assert_eq!(OperationKind::classify("run_query"), OperationKind::Execute);
        assert_eq!(OperationKind::classify("format_disk"), OperationKind::Format);
        // "remove" sorts before "update": Delete wins for ambiguous names
        assert_eq!(
            OperationKind::classify("remove_and_update"),
            OperationKind::Delete
        );
    }

    #[test]
    fn classify_falls_back_to_modify() {
        assert_eq!(OperationKind::classify("list_issues"), OperationKind::Modify);
    }

    #[test]
    fn classify_is_case_insensitive() {
        assert_eq!(OperationKind::classify("DeleteRepo"), OperationKind::Delete);
    }
}
