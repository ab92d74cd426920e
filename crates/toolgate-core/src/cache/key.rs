//! Cache keys: a SHA-256 over code, canonical context, capability source and
//! the versions of every tool the code can reach.

use std::fmt::Write as _;

use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};

use toolgate_protocol::ToolDefinition;

/// Identity of one sandbox request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub digest: String,
    /// `server:name@version` of every referenced tool, sorted.
    pub tool_fingerprints: Vec<String>,
}

impl CacheKey {
    /// Whether this key depends on `tool`, given as `server:name` or a bare
    /// tool name.
    pub fn references(&self, tool: &str) -> bool {
        self.tool_fingerprints.iter().any(|fingerprint| {
            let qualified = fingerprint
                .rsplit_once('@')
                .map_or(fingerprint.as_str(), |(qualified, _)| qualified);
            qualified == tool
                || qualified
                    .split_once(':')
                    .is_some_and(|(_, name)| name == tool)
        })
    }
}

/// Short hash of a tool definition. Any change to its schema or description
/// yields a new version.
pub fn tool_version(definition: &ToolDefinition) -> String {
    let canonical = serde_json::to_value(definition)
        .map(|value| canonical_json(&value))
        .unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(&digest[..8])
}

/// Definitions whose name appears as a whole word in `code` or `capability_source`.
pub fn referenced_tools<'a>(
    code: &str,
    capability_source: Option<&str>,
    tools: &'a [ToolDefinition],
) -> Vec<&'a ToolDefinition> {
    tools
        .iter()
        .filter(|definition| {
            let pattern = format!(r"\b{}\b", regex::escape(&definition.name));
            match Regex::new(&pattern) {
                Ok(re) => re.is_match(code) || capability_source.is_some_and(|s| re.is_match(s)),
                Err(_) => code.contains(definition.name.as_str()),
            }
        })
        .collect()
}

/// Build the key for one request.
pub fn generate_cache_key(
    code: &str,
    context: Option<&Value>,
    capability_source: Option<&str>,
    tools: &[ToolDefinition],
) -> CacheKey {
    let mut tool_fingerprints: Vec<String> = referenced_tools(code, capability_source, tools)
        .into_iter()
        .map(|definition| format!("{}@{}", definition.qualified_name(), tool_version(definition)))
        .collect();
    tool_fingerprints.sort();
    tool_fingerprints.dedup();

    let mut hasher = Sha256::new();
    for (label, part) in [
        ("code", code.to_string()),
        ("context", context.map(canonical_json).unwrap_or_default()),
        ("capabilities", capability_source.unwrap_or_default().to_string()),
        ("tools", tool_fingerprints.join(",")),
    ] {
        hasher.update(label.as_bytes());
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }

    CacheKey {
        digest: hex::encode(hasher.finalize()),
        tool_fingerprints,
    }
}

/// Serialize `value` with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", Value::from(key.as_str()));
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn defs() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new("fs", "read_file"),
            ToolDefinition::new("web", "fetch"),
        ]
    }

    #[test]
    fn test_key_stable_under_context_reordering() {
        let a = json!({"user": "x", "opts": {"b": 1, "a": [1, {"z": 0, "y": 1}]}});
        let b = json!({"opts": {"a": [1, {"y": 1, "z": 0}], "b": 1}, "user": "x"});
        let code = "return await tools.fs.read_file({});";
        assert_eq!(
            generate_cache_key(code, Some(&a), None, &defs()),
            generate_cache_key(code, Some(&b), None, &defs())
        );
    }

    #[test]
    fn test_key_changes_with_code_and_context() {
        let base = generate_cache_key("return 1;", None, None, &[]);
        assert_ne!(base, generate_cache_key("return 2;", None, None, &[]));
        assert_ne!(base, generate_cache_key("return 1;", Some(&json!({})), None, &[]));
        assert_ne!(base, generate_cache_key("return 1;", None, Some("x"), &[]));
    }

    #[test]
    fn test_only_referenced_tools_fingerprinted() {
        let key = generate_cache_key("return tools.web.fetch({url})", None, None, &defs());
        assert_eq!(key.tool_fingerprints.len(), 1);
        assert!(key.tool_fingerprints[0].starts_with("web:fetch@"));
        assert!(key.references("fetch"));
        assert!(key.references("web:fetch"));
        assert!(!key.references("read_file"));
    }

    #[test]
    fn test_tool_in_capability_source_is_referenced() {
        let key = generate_cache_key("return 1", None, Some("tools.fs.read_file({})"), &defs());
        assert!(key.references("fs:read_file"));
    }

    #[test]
    fn test_schema_change_changes_key() {
        let code = "return tools.web.fetch({})";
        let before = generate_cache_key(code, None, None, &defs());
        let mut changed = defs();
        changed[1] = ToolDefinition::new("web", "fetch")
            .with_input_schema(json!({"type": "object", "required": ["url"]}));
        let after = generate_cache_key(code, None, None, &changed);
        assert_ne!(before.digest, after.digest);
    }

    #[test]
    fn test_unreferenced_tool_change_keeps_key() {
        let code = "return tools.web.fetch({})";
        let before = generate_cache_key(code, None, None, &defs());
        let mut changed = defs();
        changed[0] = ToolDefinition::new("fs", "read_file").with_description("v2");
        assert_eq!(before, generate_cache_key(code, None, None, &changed));
    }

    #[test]
    fn test_canonical_json() {
        assert_eq!(
            canonical_json(&json!({"b": [true, null], "a": "s\"q"})),
            r#"{"a":"s\"q","b":[true,null]}"#
        );
    }
}
