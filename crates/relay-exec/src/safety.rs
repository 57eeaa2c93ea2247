//! Danger classification and the confirmation policy.
//!
//! A tool is judged by its descriptor's safety block, its name, and its
//! required fields, against the configured policy. Explicit descriptor
//! annotations always win over derived classifications.

use globset::GlobBuilder;
use relay_config::{BUILTIN_DANGEROUS_FIELDS, BUILTIN_DANGEROUS_KEYWORDS, SafetyConfig};
use relay_types::{DangerLevel, ToolDescriptor};

const DELETE_VERBS: &[&str] = &["delete", "remove", "drop"];
const MODIFY_VERBS: &[&str] = &["modify", "update", "alter"];
const EXECUTE_VERBS: &[&str] = &["exec", "execute", "run"];

fn name_contains_any(name: &str, fragments: &[&str]) -> bool {
    let lowered = name.to_lowercase();
    fragments.iter().any(|f| lowered.contains(f))
}

/// Whether a tool is dangerous: explicit annotation, a non-`none` danger
/// level, a dangerous name fragment, or a dangerous required field.
pub fn is_dangerous(descriptor: &ToolDescriptor, config: &SafetyConfig) -> bool {
    if let Some(safety) = &descriptor.safety {
        if safety.is_dangerous == Some(true) {
            return true;
        }
        if matches!(safety.danger_level, Some(level) if level != DangerLevel::None) {
            return true;
        }
    }

    if name_contains_any(&descriptor.name, BUILTIN_DANGEROUS_KEYWORDS) {
        return true;
    }
    let extra: Vec<&str> = config.dangerous_keywords.iter().map(|s| s.as_str()).collect();
    if name_contains_any(&descriptor.name, &extra) {
        return true;
    }

    let fields: Vec<&str> = if config.dangerous_fields.is_empty() {
        BUILTIN_DANGEROUS_FIELDS.to_vec()
    } else {
        config.dangerous_fields.iter().map(|s| s.as_str()).collect()
    };
    descriptor
        .input_schema
        .required
        .iter()
        .any(|field| fields.contains(&field.as_str()))
}

/// Effective danger level: the explicit annotation when present, otherwise
/// derived from the name category.
pub fn danger_level(descriptor: &ToolDescriptor, config: &SafetyConfig) -> DangerLevel {
    if let Some(level) = descriptor.safety.as_ref().and_then(|s| s.danger_level) {
        return level;
    }
    if !is_dangerous(descriptor, config) {
        return DangerLevel::None;
    }
    if name_contains_any(&descriptor.name, DELETE_VERBS) {
        DangerLevel::High
    } else if name_contains_any(&descriptor.name, MODIFY_VERBS)
        || name_contains_any(&descriptor.name, EXECUTE_VERBS)
    {
        DangerLevel::Medium
    } else {
        DangerLevel::Low
    }
}

/// Whether the call must pass the user-confirmation gate.
///
/// Priority: the descriptor's own flag; then the configured danger levels,
/// name patterns, and tool list; finally, with no narrowing rules
/// configured, every dangerous tool.
pub fn requires_confirmation(descriptor: &ToolDescriptor, config: &SafetyConfig) -> bool {
    if let Some(required) = descriptor
        .safety
        .as_ref()
        .and_then(|s| s.requires_confirmation)
    {
        return required;
    }

    match &config.confirmation {
        Some(rules) if !rules.is_empty() => {
            let level = danger_level(descriptor, config);
            if rules.danger_levels.contains(&level) {
                return true;
            }
            if rules
                .patterns
                .iter()
                .any(|pattern| glob_matches(pattern, &descriptor.name))
            {
                return true;
            }
            rules.tools.iter().any(|t| t == &descriptor.name)
        }
        _ => is_dangerous(descriptor, config),
    }
}

fn glob_matches(pattern: &str, name: &str) -> bool {
    match GlobBuilder::new(pattern).build() {
        Ok(glob) => glob.compile_matcher().is_match(name),
        // An unparseable pattern degrades to an exact match.
        Err(_) => pattern == name,
    }
}

/// The message shown at the confirmation gate.
pub fn confirmation_message(descriptor: &ToolDescriptor, server: &str) -> String {
    if let Some(safety) = &descriptor.safety {
        if let Some(message) = &safety.confirmation_message {
            return message.clone();
        }
        if let Some(description) = &safety.danger_description {
            return format!("'{}' on '{server}': {description}", descriptor.name);
        }
    }
    format!(
        "Tool '{}' on '{server}' may modify external state. Proceed?",
        descriptor.name
    )
}

/// Copy of an argument map with sensitive fields replaced, for logging.
pub fn redact_args(args: &serde_json::Value, sensitive: &[String]) -> serde_json::Value {
    match args.as_object() {
        Some(obj) => {
            let redacted: serde_json::Map<String, serde_json::Value> = obj
                .iter()
                .map(|(k, v)| {
                    if sensitive.iter().any(|s| s == k) {
                        (k.clone(), serde_json::Value::String("[redacted]".into()))
                    } else {
                        (k.clone(), v.clone())
                    }
                })
                .collect();
            serde_json::Value::Object(redacted)
        }
        None => args.clone(),
    }
}
