//! OpenAI-compatible chat completions adapter.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::debug;

use stepflow_core::adapter::{Adapter, AdapterRequest, AdapterResponse};
use stepflow_core::context::ExecutionContext;
use stepflow_core::error::EngineError;

use crate::env::{resolve_api_key, resolve_base_url, OPENAI_DEFAULT_BASE};

const PROVIDER: &str = "openai";

/// Config surface for one chat completion call. Template expansion has
/// already run; all fields are literal values here.
#[derive(Debug, Deserialize)]
struct ChatConfig {
    #[serde(default = "default_model")]
    model: String,
    prompt: Option<String>,
    #[serde(default)]
    system: Option<String>,
    /// Absent means the provider default of 0.7; an explicit 0.0 is
    /// forwarded as 0.0, never replaced.
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    #[serde(default)]
    top_p: Option<f64>,
    #[serde(default)]
    stop: Option<Vec<String>>,
}

fn default_model() -> String {
    "gpt-4".to_string()
}

fn default_max_tokens() -> u32 {
    2048
}

/// Adapter for OpenAI's chat completions API and compatible gateways.
pub struct OpenAiChatAdapter {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: Option<String>,
}

impl OpenAiChatAdapter {
    /// Resolve the key and base URL lazily from `OPENAI_API_KEY` /
    /// `OPENAI_BASE_URL` at execute time.
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

    fn parse_config(config: &Value) -> Result<ChatConfig, EngineError> {
        serde_json::from_value(config.clone())
            .map_err(|e| EngineError::config(format!("invalid chat config: {e}")))
    }
}

/// Assemble the JSON body sent to `/chat/completions`.
fn build_request_body(config: &ChatConfig) -> Result<Value, EngineError> {
    let prompt = config
        .prompt
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| EngineError::config("missing required config field 'prompt'"))?;

    let mut messages = Vec::new();
    if let Some(system) = config.system.as_deref().filter(|s| !s.is_empty()) {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": prompt}));

    let mut body = json!({
        "model": config.model,
        "messages": messages,
        "temperature": config.temperature.unwrap_or(0.7),
        "max_tokens": config.max_tokens,
    });
    if let Some(top_p) = config.top_p {
        body["top_p"] = json!(top_p);
    }
    if let Some(stop) = &config.stop {
        body["stop"] = json!(stop);
    }
    Ok(body)
}

#[async_trait]
impl Adapter for OpenAiChatAdapter {
    fn id(&self) -> &str {
        "openai-chat"
    }

    fn name(&self) -> &str {
        "OpenAI Chat Completions"
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
                "stop": {"type": "array", "items": {"type": "string"}}
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
                "finish_reason": {"type": "string"},
                "usage": {
                    "type": "object",
                    "properties": {
                        "prompt_tokens": {"type": "integer"},
                        "completion_tokens": {"type": "integer"},
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
        let api_key = resolve_api_key(self.api_key.as_deref(), "OPENAI_API_KEY")?;
        let base_url = resolve_base_url(
            self.base_url.as_deref(),
            "OPENAI_BASE_URL",
            OPENAI_DEFAULT_BASE,
        );
        let config = Self::parse_config(&request.config)?;
        let body = build_request_body(&config)?;

        if ctx.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let url = format!("{base_url}/chat/completions");
        debug!(model = %config.model, %url, "dispatching chat completion");
        let started = Instant::now();

        let mut http_request = self.client.post(&url).bearer_auth(api_key).json(&body);
        if let Some(timeout) = ctx.timeout {
            http_request = http_request.timeout(timeout);
        }

        let response = tokio::select! {
            result = http_request.send() => result.map_err(|e| {
                if e.is_timeout() {
                    EngineError::timeout(format!("chat completion timed out: {e}"))
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
                format!("chat completion failed: {status} - {error_body}"),
                Some(status.as_u16()),
            ));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| EngineError::protocol(PROVIDER, format!("unparsable response: {e}")))?;

        let choice = parsed["choices"]
            .as_array()
            .and_then(|choices| choices.first())
            .ok_or_else(|| {
                EngineError::provider(PROVIDER, "response carried no choices", Some(status.as_u16()))
            })?;
        let content = choice["message"]["content"].as_str().ok_or_else(|| {
            EngineError::protocol(PROVIDER, "choice carried no message content")
        })?;

        let usage = &parsed["usage"];
        let output = json!({
            "content": content,
            "model": parsed["model"].as_str().unwrap_or(&config.model),
            "finish_reason": choice["finish_reason"].as_str().unwrap_or("stop"),
            "usage": {
                "prompt_tokens": usage["prompt_tokens"].as_u64().unwrap_or(0),
                "completion_tokens": usage["completion_tokens"].as_u64().unwrap_or(0),
                "total_tokens": usage["total_tokens"].as_u64().unwrap_or(0),
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

    fn config(value: Value) -> ChatConfig {
        OpenAiChatAdapter::parse_config(&value).unwrap()
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
    fn defaults_fill_model_and_max_tokens() {
        let body = build_request_body(&config(json!({"prompt": "hi"}))).unwrap();
        assert_eq!(body["model"], "gpt-4");
        assert_eq!(body["max_tokens"], 2048);
        assert!(body.get("top_p").is_none());
        assert!(body.get("stop").is_none());
    }

    #[test]
    fn system_prompt_becomes_leading_message() {
        let body = build_request_body(&config(json!({
            "prompt": "hi",
            "system": "be terse",
            "stop": ["END"]
        })))
        .unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "hi");
        assert_eq!(body["stop"], json!(["END"]));
    }

    #[test]
    fn missing_prompt_is_a_config_error() {
        let err = build_request_body(&config(json!({}))).unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
