//! # Template Expander
//!
//! Resolves `{{dotted.path}}` tokens inside config values against a scoped
//! context tree. The context unifies four namespaces:
//!
//! - `input.*` — the current step's assembled input payload
//! - `<step_name>.<port>.<path>` — upstream step outputs by step name
//! - `trigger.*` — the workflow run's root input payload
//! - `ctx.*` — engine-provided values (run id, correlation id, ...)
//!
//! The syntax is deliberately not Turing-complete: no conditionals, loops,
//! filters, or helpers. Conditions live on edges; loops are block groups.
//! A string consisting of exactly one token substitutes the referenced JSON
//! value directly (preserving its type); tokens embedded in larger strings
//! stringify. Unresolved tokens are preserved verbatim and reported so the
//! executor can attach warnings to the step run.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::util::json::{embed_as_string, lookup_path};

static TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_\-]+(?:\.[A-Za-z0-9_\-]+)*)\s*\}\}")
        .expect("template token pattern is valid")
});

/// The context tree templates resolve against.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    root: Map<String, Value>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `input.*` namespace. Scalar inputs are additionally exposed
    /// at the top level so `{{topic}}` resolves when the trigger payload is
    /// a flat object — the common case for manual runs.
    pub fn with_input(mut self, input: &Value) -> Self {
        self.root.insert("input".to_string(), input.clone());
        if let Value::Object(fields) = input {
            for (key, value) in fields {
                self.root.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        self
    }

    pub fn with_trigger(mut self, trigger: &Value) -> Self {
        self.root.insert("trigger".to_string(), trigger.clone());
        if let Value::Object(fields) = trigger {
            for (key, value) in fields {
                self.root.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        self
    }

    pub fn with_ctx(mut self, ctx: Value) -> Self {
        self.root.insert("ctx".to_string(), ctx);
        self
    }

    /// Record an upstream step's output on a port, addressable as
    /// `<step_name>.<port>.<path>`.
    pub fn insert_step_output(&mut self, step_name: &str, port: &str, value: &Value) {
        let entry = self
            .root
            .entry(step_name.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(ports) = entry {
            ports.insert(port.to_string(), value.clone());
        }
    }

    pub fn resolve(&self, path: &str) -> Option<&Value> {
        lookup_path_in_map(&self.root, path)
    }
}

fn lookup_path_in_map<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let value = map.get(head)?;
    match rest {
        Some(rest) => lookup_path(value, rest),
        None => Some(value),
    }
}

/// Result of an expansion pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Expanded {
    pub value: Value,
    /// Token paths that did not resolve, in encounter order
    pub unresolved: Vec<String>,
}

/// Walk `value` and substitute every template token found in string leaves.
pub fn expand(value: &Value, ctx: &TemplateContext) -> Expanded {
    let mut unresolved = Vec::new();
    let value = expand_value(value, ctx, &mut unresolved);
    Expanded { value, unresolved }
}

fn expand_value(value: &Value, ctx: &TemplateContext, unresolved: &mut Vec<String>) -> Value {
    match value {
        Value::String(text) => expand_string(text, ctx, unresolved),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| expand_value(item, ctx, unresolved))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), expand_value(item, ctx, unresolved)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn expand_string(text: &str, ctx: &TemplateContext, unresolved: &mut Vec<String>) -> Value {
    // Whole-token strings substitute the raw JSON value, keeping its type.
    if let Some(captures) = TOKEN.captures(text) {
        let full = captures.get(0).expect("capture 0 always present");
        if full.start() == 0 && full.end() == text.len() {
            let path = &captures[1];
            return match ctx.resolve(path) {
                Some(found) => found.clone(),
                None => {
                    unresolved.push(path.to_string());
                    Value::String(text.to_string())
                }
            };
        }
    }

    let replaced = TOKEN.replace_all(text, |captures: &regex::Captures<'_>| {
        let path = &captures[1];
        match ctx.resolve(path) {
            Some(found) => embed_as_string(found),
            None => {
                unresolved.push(path.to_string());
                captures[0].to_string()
            }
        }
    });
    Value::String(replaced.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> TemplateContext {
        let mut ctx = TemplateContext::new()
            .with_input(&json!({"topic": "cats", "count": 3}))
            .with_trigger(&json!({"user": "ada"}))
            .with_ctx(json!({"run_id": "r-1"}));
        ctx.insert_step_output("fetch", "out", &json!({"status": 200, "body": {"title": "hi"}}));
        ctx
    }

    #[test]
    fn embedded_token_stringifies() {
        let expanded = expand(&json!({"prompt": "Tell me about {{topic}}"}), &ctx());
        assert_eq!(expanded.value, json!({"prompt": "Tell me about cats"}));
        assert!(expanded.unresolved.is_empty());
    }

    #[test]
    fn whole_token_preserves_json_type() {
        let expanded = expand(&json!({"n": "{{input.count}}"}), &ctx());
        assert_eq!(expanded.value, json!({"n": 3}));

        let expanded = expand(&json!("{{fetch.out.body}}"), &ctx());
        assert_eq!(expanded.value, json!({"title": "hi"}));
    }

    #[test]
    fn non_string_embedded_in_larger_string_stringifies() {
        let expanded = expand(&json!("count={{input.count}}!"), &ctx());
        assert_eq!(expanded.value, json!("count=3!"));
    }

    #[test]
    fn upstream_and_reserved_namespaces_resolve() {
        let expanded = expand(
            &json!({
                "status": "{{fetch.out.status}}",
                "who": "{{trigger.user}}",
                "run": "{{ctx.run_id}}"
            }),
            &ctx(),
        );
        assert_eq!(expanded.value, json!({"status": 200, "who": "ada", "run": "r-1"}));
    }

    #[test]
    fn unresolved_tokens_are_preserved_and_reported() {
        let expanded = expand(&json!("hello {{missing.path}}"), &ctx());
        assert_eq!(expanded.value, json!("hello {{missing.path}}"));
        assert_eq!(expanded.unresolved, vec!["missing.path".to_string()]);
    }

    #[test]
    fn nested_arrays_and_objects_are_walked() {
        let expanded = expand(
            &json!({"headers": [{"X-User": "{{trigger.user}}"}], "raw": 7}),
            &ctx(),
        );
        assert_eq!(
            expanded.value,
            json!({"headers": [{"X-User": "ada"}], "raw": 7})
        );
    }

    #[test]
    fn whitespace_inside_braces_is_tolerated() {
        let expanded = expand(&json!("{{ topic }}"), &ctx());
        assert_eq!(expanded.value, json!("cats"));
    }
}
