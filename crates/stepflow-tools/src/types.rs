//! Carrier types for the tool surface.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A named tool with a declared input schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Tool invocation result. Failures surface here, never as transport
/// errors: a caller always receives a result object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Value,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: Value) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: json!({"error": message.into()}),
            is_error: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_results_wrap_the_message() {
        let result = ToolResult::error("nope");
        assert!(result.is_error);
        assert_eq!(result.content["error"], "nope");

        let result = ToolResult::success(json!([1, 2]));
        assert!(!result.is_error);
    }
}
