//! # Edge & Guard Conditions
//!
//! The narrow condition grammar used on edges and step guards:
//!
//! ```text
//! expr    := path | path "==" literal | path "!=" literal
//! path    := dotted JSON path into the scoped value
//! literal := JSON scalar (number, true, false, null, "quoted") or bare word
//! ```
//!
//! A bare path evaluates JSON truthiness. Conditions never loop or branch;
//! loops are block groups and branching is edge routing.

use serde_json::Value;

use crate::util::json::{lookup_path, truthy};

/// Evaluate `expr` against `scope`. Malformed expressions and missing
/// paths evaluate to false: a suppressed edge is the safe failure mode.
pub fn evaluate(expr: &str, scope: &Value) -> bool {
    let expr = expr.trim();
    if expr.is_empty() {
        return true;
    }

    if let Some((path, literal)) = split_operator(expr, "==") {
        return resolve(scope, path).map_or(false, |found| found == &parse_literal(literal));
    }
    if let Some((path, literal)) = split_operator(expr, "!=") {
        return resolve(scope, path).map_or(false, |found| found != &parse_literal(literal));
    }

    resolve(scope, expr).map_or(false, truthy)
}

fn split_operator<'a>(expr: &'a str, op: &str) -> Option<(&'a str, &'a str)> {
    expr.split_once(op)
        .map(|(path, literal)| (path.trim(), literal.trim()))
        .filter(|(path, literal)| !path.is_empty() && !literal.is_empty())
}

fn resolve<'a>(scope: &'a Value, path: &str) -> Option<&'a Value> {
    if path == "." || path == "$" {
        return Some(scope);
    }
    lookup_path(scope, path)
}

fn parse_literal(raw: &str) -> Value {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return value;
    }
    // Bare words compare as strings.
    Value::String(raw.trim_matches('\'').to_string())
}
