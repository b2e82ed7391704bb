//! Group-level configuration surfaces. The drivers live in the scheduler
//! proper; these types pin down what each container reads out of its
//! config JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;
use crate::util::json::lookup_path;

/// `foreach` group tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeachConfig {
    /// Per-element parallelism; 1 means strictly serial
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Optional dotted path selecting the sequence out of the group input
    #[serde(default)]
    pub items_path: Option<String>,
}

fn default_concurrency() -> usize {
    1
}

impl Default for ForeachConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            items_path: None,
        }
    }
}

impl ForeachConfig {
    pub fn from_config(config: &Value) -> Self {
        serde_json::from_value(config.clone()).unwrap_or_default()
    }

    /// Extract the ordered sequence the group iterates. The input itself
    /// may be the sequence, or `items_path` selects it.
    pub fn items(&self, input: &Value) -> Result<Vec<Value>, EngineError> {
        let candidate = match &self.items_path {
            Some(path) => lookup_path(input, path).ok_or_else(|| {
                EngineError::validation(format!("foreach items_path '{path}' not found in input"))
            })?,
            None => input,
        };
        match candidate {
            Value::Array(items) => Ok(items.clone()),
            _ => Err(EngineError::validation(
                "foreach group input must be an ordered sequence",
            )),
        }
    }
}

/// `while` group tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhileConfig {
    /// Evaluated against the previous iteration's output (the group input
    /// before the first iteration); false stops the loop
    pub condition: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_max_iterations() -> u32 {
    25
}

impl WhileConfig {
    pub fn from_config(config: &Value) -> Result<Self, EngineError> {
        serde_json::from_value(config.clone())
            .map_err(|_| EngineError::config("while group requires a 'condition' expression"))
    }
}

/// `agent` group tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Adapter id the reasoning turns go through
    #[serde(default = "default_agent_adapter")]
    pub adapter: String,
    /// Config forwarded to the reasoning adapter (model, prompts, ...)
    #[serde(default)]
    pub llm: Value,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
}

fn default_agent_adapter() -> String {
    "openai-chat".to_string()
}

fn default_max_turns() -> u32 {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            adapter: default_agent_adapter(),
            llm: Value::Null,
            max_turns: default_max_turns(),
        }
    }
}

impl AgentConfig {
    pub fn from_config(config: &Value) -> Self {
        serde_json::from_value(config.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn foreach_accepts_direct_sequence_or_path() {
        let cfg = ForeachConfig::default();
        assert_eq!(cfg.items(&json!([1, 2])).unwrap(), vec![json!(1), json!(2)]);

        let cfg = ForeachConfig {
            items_path: Some("batch.rows".into()),
            ..Default::default()
        };
        let items = cfg.items(&json!({"batch": {"rows": ["a"]}})).unwrap();
        assert_eq!(items, vec![json!("a")]);

        let err = cfg.items(&json!({"batch": {}})).unwrap_err();
        assert_eq!(err.kind(), "validation");

        let cfg = ForeachConfig::default();
        assert!(cfg.items(&json!({"not": "a list"})).is_err());
    }

    #[test]
    fn while_config_requires_condition() {
        assert!(WhileConfig::from_config(&json!({})).is_err());
        let cfg = WhileConfig::from_config(&json!({"condition": "more == true"})).unwrap();
        assert_eq!(cfg.max_iterations, 25);
        let cfg =
            WhileConfig::from_config(&json!({"condition": "x", "max_iterations": 3})).unwrap();
        assert_eq!(cfg.max_iterations, 3);
    }

    #[test]
    fn agent_config_defaults() {
        let cfg = AgentConfig::from_config(&json!({}));
        assert_eq!(cfg.adapter, "openai-chat");
        assert_eq!(cfg.max_turns, 10);
        let cfg = AgentConfig::from_config(&json!({"adapter": "mock-llm", "max_turns": 2}));
        assert_eq!(cfg.adapter, "mock-llm");
        assert_eq!(cfg.max_turns, 2);
    }
}
