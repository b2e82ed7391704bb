//! JSON value utilities shared by the resolver (config-default layering),
//! the executor (step config overlay), and the migrator (change detection).

use serde_json::{Map, Value};

/// Deep-merge `overlay` onto `base`. Objects merge recursively with overlay
/// keys winning; every other value kind is replaced wholesale. `Null`
/// overlay values replace too, so callers can explicitly clear a default.
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, overlay_value) in overlay_map {
                match merged.get(key) {
                    Some(base_value) if base_value.is_object() && overlay_value.is_object() => {
                        let combined = deep_merge(base_value, overlay_value);
                        merged.insert(key.clone(), combined);
                    }
                    _ => {
                        merged.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
            Value::Object(merged)
        }
        (_, overlay) => overlay.clone(),
    }
}

/// Structural JSON equality, insensitive to key order and formatting.
/// `serde_json::Value` comparison already normalizes both, so this is a
/// named wrapper that keeps call sites honest about intent.
pub fn json_equal(a: &Value, b: &Value) -> bool {
    a == b
}

/// Look up a dotted path (`a.b.c`) inside a JSON value. Array elements are
/// addressable by numeric segment.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Render a JSON value for embedding inside a larger string: strings embed
/// without quotes, everything else serializes compactly.
pub fn embed_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// JSON truthiness: null, false, 0, "" and empty containers are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deep_merge_recurses_into_objects() {
        let base = json!({"a": {"x": 1, "y": 2}, "b": "keep"});
        let overlay = json!({"a": {"y": 20, "z": 30}, "c": true});
        let merged = deep_merge(&base, &overlay);
        assert_eq!(merged, json!({"a": {"x": 1, "y": 20, "z": 30}, "b": "keep", "c": true}));
    }

    #[test]
    fn deep_merge_replaces_non_objects() {
        let base = json!({"list": [1, 2, 3], "n": 5});
        let overlay = json!({"list": [9], "n": null});
        let merged = deep_merge(&base, &overlay);
        assert_eq!(merged["list"], json!([9]));
        assert_eq!(merged["n"], Value::Null);
    }

    #[test]
    fn json_equal_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"x":1,"y":{"a":true,"b":[1,2]}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{ "y": {"b": [1, 2], "a": true}, "x": 1 }"#).unwrap();
        assert!(json_equal(&a, &b));
        assert!(json_equal(&a, &a));
    }

    #[test]
    fn lookup_path_walks_objects_and_arrays() {
        let root = json!({"steps": [{"name": "first"}, {"name": "second"}]});
        assert_eq!(lookup_path(&root, "steps.1.name"), Some(&json!("second")));
        assert_eq!(lookup_path(&root, "steps.5.name"), None);
        assert_eq!(lookup_path(&root, "missing"), None);
    }

    #[test]
    fn truthiness_matches_json_conventions() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!(false)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!([])));
        assert!(truthy(&json!("no")));
        assert!(truthy(&json!(0.5)));
        assert!(truthy(&json!({"k": 1})));
    }
}
