//! LLM-assisted completion of missing required arguments.
//!
//! The model is opaque: given a prompt, it returns text. The executor asks
//! for a JSON object naming values it can infer; anything else degrades to a
//! deterministic prompt for the user. The model is never retried after a
//! failure.

use relay_types::ToolDescriptor;
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// An opaque text-completion model.
pub trait CompletionModel: Send + Sync {
    fn complete(
        &self,
        prompt: &str,
    ) -> Pin<Box<dyn Future<Output = Result<String, CompletionError>> + Send + '_>>;
}

#[derive(Debug, Error)]
#[error("completion request failed: {0}")]
pub struct CompletionError(pub String);

/// The JSON object the model is asked to return.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionReply {
    #[serde(default)]
    pub provided_values: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub should_prompt_user: bool,
    #[serde(default)]
    pub user_prompt: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Build the structured prompt describing the tool, the current arguments,
/// and each missing field.
pub fn build_prompt(
    descriptor: &ToolDescriptor,
    args: &serde_json::Value,
    missing: &[String],
    attempt: u32,
    max_attempts: u32,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "A tool call is missing required arguments (attempt {attempt} of {max_attempts}).\n\n"
    ));
    prompt.push_str(&format!("Tool: {}\n", descriptor.name));
    if let Some(description) = &descriptor.description {
        prompt.push_str(&format!("Description: {description}\n"));
    }
    prompt.push_str(&format!(
        "Current arguments: {}\n\nMissing fields:\n",
        serde_json::to_string(args).unwrap_or_else(|_| "{}".into())
    ));

    for field in missing {
        prompt.push_str(&format!("- {field}"));
        if let Some(prop) = descriptor.input_schema.property(field) {
            if let Some(kind) = &prop.kind {
                prompt.push_str(&format!(" ({kind})"));
            }
            if let Some(description) = &prop.description {
                prompt.push_str(&format!(": {description}"));
            }
            if let Some(allowed) = &prop.allowed {
                let rendered: Vec<String> = allowed.iter().map(|v| v.to_string()).collect();
                prompt.push_str(&format!(" [one of: {}]", rendered.join(", ")));
            }
        }
        for (key, value) in related_args(args, field) {
            prompt.push_str(&format!(" (related: {key}={value})"));
        }
        prompt.push('\n');
    }

    prompt.push_str(
        "\nReply with a single JSON object: \
         {\"providedValues\": {<field>: <value>, ...}, \"shouldPromptUser\": bool, \
         \"userPrompt\": string?, \"reasoning\": string?}. \
         Only provide values you can infer confidently; otherwise set \
         shouldPromptUser to true.\n",
    );
    prompt
}

/// Current-argument entries syntactically related to a missing field: one
/// name contains the other.
fn related_args<'a>(
    args: &'a serde_json::Value,
    field: &'a str,
) -> Vec<(&'a String, &'a serde_json::Value)> {
    let field_lower = field.to_lowercase();
    args.as_object()
        .map(|obj| {
            obj.iter()
                .filter(|(key, _)| {
                    let key_lower = key.to_lowercase();
                    key_lower.contains(&field_lower) || field_lower.contains(&key_lower)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// The deterministic user prompt used when the model fails or declines.
pub fn fallback_prompt(tool: &str, missing: &[String]) -> String {
    format!(
        "The tool '{tool}' needs values for: {}. Please provide them.",
        missing.join(", ")
    )
}

/// Parse the model's reply, tolerating prose or code fences around the JSON
/// object. `None` means the reply was unusable.
pub fn parse_reply(text: &str) -> Option<CompletionReply> {
    if let Ok(reply) = serde_json::from_str(text) {
        return Some(reply);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor() -> ToolDescriptor {
        serde_json::from_value(json!({
            "name": "create_issue",
            "description": "Open an issue",
            "inputSchema": {
                "properties": {
                    "repo": {"type": "string", "description": "Target repository"},
                    "priority": {"type": "string", "enum": ["low", "high"]}
                },
                "required": ["repo", "priority"]
            }
        }))
        .unwrap()
    }

    #[test]
    fn prompt_mentions_tool_fields_and_attempt() {
        let prompt = build_prompt(
            &descriptor(),
            &json!({"title": "crash"}),
            &["repo".into(), "priority".into()],
            1,
            3,
        );
        assert!(prompt.contains("attempt 1 of 3"));
        assert!(prompt.contains("Tool: create_issue"));
        assert!(prompt.contains("- repo (string): Target repository"));
        assert!(prompt.contains(r#"[one of: "low", "high"]"#));
        assert!(prompt.contains("providedValues"));
    }

    #[test]
    fn prompt_includes_related_arguments() {
        let prompt = build_prompt(
            &descriptor(),
            &json!({"repo_url": "https://github.com/acme/site"}),
            &["repo".into()],
            1,
            3,
        );
        assert!(prompt.contains("related: repo_url="));
    }

    #[test]
    fn parse_plain_json() {
        let reply = parse_reply(r#"{"providedValues": {"repo": "acme/site"}, "shouldPromptUser": false}"#)
            .unwrap();
        assert_eq!(reply.provided_values["repo"], "acme/site");
        assert!(!reply.should_prompt_user);
    }

    #[test]
    fn parse_json_wrapped_in_prose() {
        let text = "Here you go:\n```json\n{\"providedValues\": {}, \"shouldPromptUser\": true, \"userPrompt\": \"Which repo?\"}\n```";
        let reply = parse_reply(text).unwrap();
        assert!(reply.should_prompt_user);
        assert_eq!(reply.user_prompt.as_deref(), Some("Which repo?"));
    }

    #[test]
    fn unusable_reply_is_none() {
        assert!(parse_reply("I cannot help with that").is_none());
        assert!(parse_reply("").is_none());
    }

    #[test]
    fn fallback_prompt_is_deterministic() {
        let a = fallback_prompt("greet", &["name".into(), "lang".into()]);
        let b = fallback_prompt("greet", &["name".into(), "lang".into()]);
        assert_eq!(a, b);
        assert_eq!(a, "The tool 'greet' needs values for: name, lang. Please provide them.");
    }
}
