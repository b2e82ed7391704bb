//! Anthropic-style messages adapter.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::debug;

use stepflow_core::adapter::{Adapter, AdapterRequest, AdapterResponse};
use stepflow_core::context::ExecutionContext;
use stepflow_core::error::EngineError;

use crate::env::{resolve_api_key, resolve_base_url, ANTHROPIC_DEFAULT_BASE};

const PROVIDER: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Deserialize)]
struct MessagesConfig {
    #[serde(default = "default_model")]
    model: String,
    prompt: Option<String>,
    #[serde(default)]
    system: Option<String>,
    /// Same optional semantics as the chat adapter: absent means 0.7, an
    /// explicit 0.0 goes to the provider untouched.
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    #[serde(default)]
    top_p: Option<f64>,
    #[serde(default)]
    top_k: Option<u32>,
    #[serde(default)]
    stop_sequences: Option<Vec<String>>,
}

fn default_model() -> String {
    "claude-3-sonnet-20240229".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

/// Adapter for Anthropic's messages API.
pub struct AnthropicMessagesAdapter {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: Option<String>,
}

impl AnthropicMessagesAdapter {
    /// Resolve the key and base URL lazily from `ANTHROPIC_API_KEY` /
    /// `ANTHROPIC_BASE_URL` at execute time.
    pub fn from_env() -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: None,
            base_url: None,
        }
    }

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: Some(api_key.into()),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    fn parse_config(config: &Value) -> Result<MessagesConfig, EngineError> {
        serde_json::from_value(config.clone())
            .map_err(|e| EngineError::config(format!("invalid messages config: {e}")))
    }
}

fn build_request_body(config: &MessagesConfig) -> Result<Value, EngineError> {
    let prompt = config
        .prompt
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| EngineError::config("missing required config field 'prompt'"))?;

    let mut body = json!({
        "model": config.model,
        "max_tokens": config.max_tokens,
        "messages": [{"role": "user", "content": prompt}],
        "temperature": config.temperature.unwrap_or(0.7),
    });
    if let Some(system) = config.system.as_deref().filter(|s| !s.is_empty()) {
        body["system"] = json!(system);
    }
    if let Some(top_p) = config.top_p {
        body["top_p"] = json!(top_p);
    }
    if let Some(top_k) = config.top_k {
        body["top_k"] = json!(top_k);
    }
    if let Some(stop_sequences) = &config.stop_sequences {
        body["stop_sequences"] = json!(stop_sequences);
    }
    Ok(body)
}

/// All text content blocks concatenated in order.
fn extract_text(content: &Value) -> String {
    content
        .as_array()
        .map(|blocks| {
            blocks
                .iter()
                .filter(|block| block["type"] == "text")
                .filter_map(|block| block["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

#[async_trait]
impl Adapter for AnthropicMessagesAdapter {
    fn id(&self) -> &str {
        "anthropic-messages"
    }

    fn name(&self) -> &str {
        "Anthropic Messages"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "model": {"type": "string"},
                "prompt": {"type": "string"},
                "system": {"type": "string"},
                "temperature": {"type": ["number", "null"]},
                "max_tokens": {"type": "integer"},
                "top_p": {"type": "number"},
                "top_k": {"type": "integer"},
                "stop_sequences": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["prompt"]
        })
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {"type": "string"},
                "model": {"type": "string"},
                "stop_reason": {"type": "string"},
                "usage": {
                    "type": "object",
                    "properties": {
                        "input_tokens": {"type": "integer"},
                        "output_tokens": {"type": "integer"},
                        "total_tokens": {"type": "integer"}
                    }
                }
            }
        })
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        request: AdapterRequest,
    ) -> Result<AdapterResponse, EngineError> {
        let api_key = resolve_api_key(self.api_key.as_deref(), "ANTHROPIC_API_KEY")?;
        let base_url = resolve_base_url(
            self.base_url.as_deref(),
            "ANTHROPIC_BASE_URL",
            ANTHROPIC_DEFAULT_BASE,
        );
        let config = Self::parse_config(&request.config)?;
        let body = build_request_body(&config)?;

        if ctx.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let url = format!("{base_url}/v1/messages");
        debug!(model = %config.model, %url, "dispatching messages request");
        let started = Instant::now();

        let mut http_request = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body);
        if let Some(timeout) = ctx.timeout {
            http_request = http_request.timeout(timeout);
        }

        let response = tokio::select! {
            result = http_request.send() => result.map_err(|e| {
                if e.is_timeout() {
                    EngineError::timeout(format!("messages request timed out: {e}"))
                } else {
                    EngineError::provider(PROVIDER, e.to_string(), e.status().map(|s| s.as_u16()))
                }
            })?,
            _ = ctx.cancellation.cancelled() => return Err(EngineError::Cancelled),
        };

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(EngineError::provider(
                PROVIDER,
                format!("messages request failed: {status} - {error_body}"),
                Some(status.as_u16()),
            ));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| EngineError::protocol(PROVIDER, format!("unparsable response: {e}")))?;

        let content = extract_text(&parsed["content"]);
        if content.is_empty() {
            return Err(EngineError::provider(
                PROVIDER,
                "response carried no text content",
                Some(status.as_u16()),
            ));
        }

        let usage = &parsed["usage"];
        let input_tokens = usage["input_tokens"].as_u64().unwrap_or(0);
        let output_tokens = usage["output_tokens"].as_u64().unwrap_or(0);
        let output = json!({
            "content": content,
            "model": parsed["model"].as_str().unwrap_or(&config.model),
            "stop_reason": parsed["stop_reason"].as_str().unwrap_or("end_turn"),
            "usage": {
                "input_tokens": input_tokens,
                "output_tokens": output_tokens,
                "total_tokens": input_tokens + output_tokens,
            }
        });

        Ok(
            AdapterResponse::new(output, started.elapsed().as_millis() as u64)
                .with_metadata("model", config.model),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(value: Value) -> MessagesConfig {
        AnthropicMessagesAdapter::parse_config(&value).unwrap()
    }

    #[test]
    fn unset_temperature_sends_default() {
        let body = build_request_body(&config(json!({"prompt": "hi"}))).unwrap();
        assert_eq!(body["temperature"], 0.7);
    }

    #[test]
    fn explicit_zero_temperature_is_forwarded() {
        let body =
            build_request_body(&config(json!({"prompt": "hi", "temperature": 0.0}))).unwrap();
        assert_eq!(body["temperature"], 0.0);
    }

    #[test]
    fn defaults_and_optionals() {
        let body = build_request_body(&config(json!({"prompt": "hi"}))).unwrap();
        assert_eq!(body["model"], "claude-3-sonnet-20240229");
        assert_eq!(body["max_tokens"], 4096);
        assert!(body.get("system").is_none());
        assert!(body.get("top_k").is_none());

        let body = build_request_body(&config(json!({
            "prompt": "hi",
            "system": "be terse",
            "top_k": 40,
            "stop_sequences": ["DONE"]
        })))
        .unwrap();
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["top_k"], 40);
        assert_eq!(body["stop_sequences"], json!(["DONE"]));
    }

    #[test]
    fn text_blocks_are_concatenated() {
        let content = json!([
            {"type": "text", "text": "Hello, "},
            {"type": "tool_use", "id": "x"},
            {"type": "text", "text": "world"}
        ]);
        assert_eq!(extract_text(&content), "Hello, world");
        assert_eq!(extract_text(&json!(null)), "");
    }
}
