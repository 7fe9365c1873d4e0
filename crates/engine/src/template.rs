//! Lazy template resolution for playbook data.
//!
//! Strings that consist of exactly one `{{{kind.name}}}` token are replaced by
//! the typed value of the referenced input, node set or metadata item. Tokens
//! embedded in longer strings are substituted textually.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{PlaybookError, PlaybookResult};

static TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\{(?P<kind>[a-zA-Z0-9_]+)\.(?P<name>[a-zA-Z0-9_\-]+)\}\}\}")
        .expect("template token pattern is valid")
});

static WHOLE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\{\{\{(?P<kind>[a-zA-Z0-9_]+)\.(?P<name>[a-zA-Z0-9_\-]+)\}\}\}$")
        .expect("template token pattern is valid")
});

/// Live state that template tokens are resolved against.
pub trait TemplateSource {
    /// Value of a declared input.
    fn input_value(&self, name: &str) -> PlaybookResult<Value>;

    /// Nodes discovered for a node set.
    fn discovered_nodes(&self, name: &str) -> PlaybookResult<Vec<String>>;

    /// A playbook metadata item.
    fn metadata_item(&self, name: &str) -> PlaybookResult<Value>;
}

/// Resolve every template token in `data`.
///
/// Returns an independent copy; `data` itself is never modified so callers
/// can resolve the same templated properties again on every task attempt.
pub fn resolve(data: &Value, source: &dyn TemplateSource) -> PlaybookResult<Value> {
    match data {
        Value::String(s) => resolve_string(s, source),
        Value::Object(map) => {
            let mut resolved = Map::with_capacity(map.len());
            for (k, v) in map {
                resolved.insert(k.clone(), resolve(v, source)?);
            }
            Ok(Value::Object(resolved))
        }
        Value::Array(items) => items
            .iter()
            .map(|v| resolve(v, source))
            .collect::<PlaybookResult<Vec<_>>>()
            .map(Value::Array),
        scalar => Ok(scalar.clone()),
    }
}

/// Check if a string contains template tokens.
pub fn is_template(s: &str) -> bool {
    TOKEN.is_match(s)
}

fn resolve_string(s: &str, source: &dyn TemplateSource) -> PlaybookResult<Value> {
    if let Some(caps) = WHOLE_TOKEN.captures(s) {
        tracing::debug!(kind = &caps["kind"], name = &caps["name"], "Resolving template data");
        return lookup(&caps["kind"], &caps["name"], source);
    }

    if !is_template(s) {
        return Ok(Value::String(s.to_string()));
    }

    let mut result = String::with_capacity(s.len());
    let mut last = 0;

    for caps in TOKEN.captures_iter(s) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        result.push_str(&s[last..whole.start()]);
        result.push_str(&render(&lookup(&caps["kind"], &caps["name"], source)?));
        last = whole.end();
    }
    result.push_str(&s[last..]);

    Ok(Value::String(result))
}

fn lookup(kind: &str, name: &str, source: &dyn TemplateSource) -> PlaybookResult<Value> {
    match kind {
        "input" => source.input_value(name),
        "nodes" => Ok(Value::from(source.discovered_nodes(name)?)),
        "metadata" => source.metadata_item(name),
        other => Err(PlaybookError::Resolution(format!(
            "Do not know how to process data of type {}",
            other
        ))),
    }
}

/// Text form of a value substituted into a larger string.
///
/// Lists of scalars are comma joined, other structures use their JSON text.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Array(items) if items.iter().all(|i| !i.is_array() && !i.is_object()) => items
            .iter()
            .map(render)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeSource {
        inputs: HashMap<String, Value>,
        nodes: HashMap<String, Vec<String>>,
    }

    impl TemplateSource for FakeSource {
        fn input_value(&self, name: &str) -> PlaybookResult<Value> {
            self.inputs
                .get(name)
                .cloned()
                .ok_or_else(|| PlaybookError::Resolution(format!("Unknown input {}", name)))
        }

        fn discovered_nodes(&self, name: &str) -> PlaybookResult<Vec<String>> {
            self.nodes
                .get(name)
                .cloned()
                .ok_or_else(|| PlaybookError::Resolution(format!("Unknown nodeset {}", name)))
        }

        fn metadata_item(&self, name: &str) -> PlaybookResult<Value> {
            match name {
                "name" => Ok(json!("deploy")),
                _ => Err(PlaybookError::Resolution(format!("Unknown playbook metadata {}", name))),
            }
        }
    }

    fn source() -> FakeSource {
        let mut src = FakeSource::default();
        src.inputs.insert("x".into(), json!(5));
        src.inputs.insert("cluster".into(), json!("alpha"));
        src.nodes.insert("web".into(), vec!["web1".into(), "web2".into()]);
        src
    }

    #[test]
    fn test_whole_token_keeps_type() {
        let src = source();
        assert_eq!(resolve(&json!("{{{input.x}}}"), &src).unwrap(), json!(5));
        assert_eq!(
            resolve(&json!("{{{nodes.web}}}"), &src).unwrap(),
            json!(["web1", "web2"])
        );
        assert_eq!(resolve(&json!("{{{metadata.name}}}"), &src).unwrap(), json!("deploy"));
    }

    #[test]
    fn test_embedded_tokens_are_textual() {
        let src = source();
        assert_eq!(
            resolve(&json!("cluster {{{input.cluster}}} has {{{input.x}}} nodes"), &src).unwrap(),
            json!("cluster alpha has 5 nodes")
        );
        assert_eq!(
            resolve(&json!("targets: {{{nodes.web}}}"), &src).unwrap(),
            json!("targets: web1,web2")
        );
    }

    #[test]
    fn test_resolution_is_pure() {
        let src = source();
        let data = json!({"a": "{{{input.x}}}", "b": ["{{{input.cluster}}}", 1, true]});

        let first = resolve(&data, &src).unwrap();
        let second = resolve(&data, &src).unwrap();

        assert_eq!(first, json!({"a": 5, "b": ["alpha", 1, true]}));
        assert_eq!(first, second);
        assert_eq!(data["a"], json!("{{{input.x}}}"));
    }

    #[test]
    fn test_non_token_strings_untouched() {
        let src = source();
        assert_eq!(resolve(&json!("plain {{ jinja }}"), &src).unwrap(), json!("plain {{ jinja }}"));
        assert_eq!(resolve(&json!(null), &src).unwrap(), json!(null));
    }

    #[test]
    fn test_unknown_kind_fails() {
        let src = source();
        let err = resolve(&json!("{{{secret.x}}}"), &src).unwrap_err();
        assert!(matches!(err, PlaybookError::Resolution(_)));

        let err = resolve(&json!("a {{{secret.x}}} b"), &src).unwrap_err();
        assert!(err.to_string().contains("secret"));
    }

    #[test]
    fn test_unknown_name_fails() {
        let src = source();
        assert!(resolve(&json!({"n": "{{{nodes.db}}}"}), &src).is_err());
    }
}
