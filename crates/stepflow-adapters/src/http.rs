//! Generic HTTP adapter.
//!
//! The response contract is deliberate about failure statuses: a status of
//! 400 or above produces BOTH the fully assembled response object and an
//! error. The response travels inside [`EngineError::HttpStatus`] so the
//! executor can still apply `on_error` handling (`continue`, `fallback`,
//! `error_port`) with the response data available.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use stepflow_core::adapter::{Adapter, AdapterRequest, AdapterResponse};
use stepflow_core::context::ExecutionContext;
use stepflow_core::error::EngineError;

#[derive(Debug, Deserialize)]
struct HttpConfig {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default = "default_body_type")]
    body_type: BodyType,
    #[serde(default)]
    query_params: HashMap<String, String>,
    #[serde(default = "default_timeout_sec")]
    timeout_sec: u64,
    #[serde(default = "default_follow_redirects")]
    follow_redirects: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum BodyType {
    Json,
    Form,
    Raw,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_body_type() -> BodyType {
    BodyType::Json
}

fn default_timeout_sec() -> u64 {
    30
}

fn default_follow_redirects() -> bool {
    true
}

impl BodyType {
    fn content_type(self) -> &'static str {
        match self {
            BodyType::Json => "application/json",
            BodyType::Form => "application/x-www-form-urlencoded",
            BodyType::Raw => "text/plain",
        }
    }
}

/// Append query parameters, honoring any `?` already present in the URL.
fn append_query_params(url: &str, params: &HashMap<String, String>) -> String {
    if params.is_empty() {
        return url.to_string();
    }
    let mut sorted: Vec<(&String, &String)> = params.iter().collect();
    sorted.sort();
    let mut result = url.to_string();
    for (key, value) in sorted {
        result.push(if result.contains('?') { '&' } else { '?' });
        result.push_str(key);
        result.push('=');
        result.push_str(value);
    }
    result
}

/// Adapter for arbitrary HTTP calls configured by the workflow author.
pub struct HttpAdapter {
    client: reqwest::Client,
    no_redirect_client: reqwest::Client,
}

impl HttpAdapter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            no_redirect_client: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .unwrap_or_default(),
        }
    }

    fn parse_config(config: &Value) -> Result<HttpConfig, EngineError> {
        let parsed: HttpConfig = serde_json::from_value(config.clone())
            .map_err(|e| EngineError::config(format!("invalid http config: {e}")))?;
        if parsed.url.is_empty() {
            return Err(EngineError::config("missing required config field 'url'"));
        }
        Ok(parsed)
    }
}

impl Default for HttpAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for HttpAdapter {
    fn id(&self) -> &str {
        "http"
    }

    fn name(&self) -> &str {
        "HTTP Request"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string"},
                "method": {"type": "string"},
                "headers": {"type": "object"},
                "body": {"type": "string"},
                "body_type": {"enum": ["json", "form", "raw"]},
                "query_params": {"type": "object"},
                "timeout_sec": {"type": "integer"},
                "follow_redirects": {"type": "boolean"}
            },
            "required": ["url"]
        })
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "status_code": {"type": "integer"},
                "headers": {"type": "object"},
                "body": {},
                "body_raw": {"type": "string"}
            }
        })
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        request: AdapterRequest,
    ) -> Result<AdapterResponse, EngineError> {
        let config = Self::parse_config(&request.config)?;

        // Cancellation observed before dispatch: error out with no response.
        if ctx.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let url = append_query_params(&config.url, &config.query_params);
        let method = reqwest::Method::from_bytes(config.method.to_uppercase().as_bytes())
            .map_err(|_| EngineError::config(format!("invalid http method '{}'", config.method)))?;

        let client = if config.follow_redirects {
            &self.client
        } else {
            &self.no_redirect_client
        };
        let mut builder = client.request(method.clone(), &url);

        let mut has_content_type = false;
        for (key, value) in &config.headers {
            if key.eq_ignore_ascii_case("content-type") {
                has_content_type = true;
            }
            builder = builder.header(key, value);
        }
        if let Some(body) = &config.body {
            if !has_content_type {
                builder = builder.header("content-type", config.body_type.content_type());
            }
            builder = builder.body(body.clone());
        }

        let timeout = match ctx.timeout {
            Some(outer) => outer.min(Duration::from_secs(config.timeout_sec)),
            None => Duration::from_secs(config.timeout_sec),
        };
        builder = builder.timeout(timeout);

        debug!(%url, method = %method, "dispatching http request");
        let started = Instant::now();
        let response = tokio::select! {
            result = builder.send() => result.map_err(|e| {
                if e.is_timeout() {
                    EngineError::timeout(format!("http request timed out: {e}"))
                } else {
                    EngineError::from(e)
                }
            })?,
            _ = ctx.cancellation.cancelled() => return Err(EngineError::Cancelled),
        };

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();
        let body_raw = response
            .text()
            .await
            .map_err(|e| EngineError::protocol("http", format!("failed to read body: {e}")))?;

        // Best-effort JSON decode; non-JSON bodies keep `body` null and the
        // exact bytes live in `body_raw`.
        let body = serde_json::from_str::<Value>(&body_raw).unwrap_or(Value::Null);

        let output = json!({
            "status_code": status,
            "headers": headers,
            "body": body,
            "body_raw": body_raw,
        });

        if status >= 400 {
            return Err(EngineError::HttpStatus {
                status,
                response: Box::new(output),
            });
        }

        Ok(
            AdapterResponse::new(output, started.elapsed().as_millis() as u64)
                .with_metadata("status_code", status.to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_params_append_with_question_mark_or_ampersand() {
        let mut params = HashMap::new();
        params.insert("b".to_string(), "2".to_string());
        params.insert("a".to_string(), "1".to_string());

        assert_eq!(
            append_query_params("https://example.com/path", &params),
            "https://example.com/path?a=1&b=2"
        );
        assert_eq!(
            append_query_params("https://example.com/path?x=0", &params),
            "https://example.com/path?x=0&a=1&b=2"
        );
        assert_eq!(
            append_query_params("https://example.com", &HashMap::new()),
            "https://example.com"
        );
    }

    #[test]
    fn config_defaults_match_contract() {
        let config = HttpAdapter::parse_config(&json!({"url": "https://example.com"})).unwrap();
        assert_eq!(config.method, "GET");
        assert_eq!(config.timeout_sec, 30);
        assert_eq!(config.body_type, BodyType::Json);
        assert!(config.follow_redirects);
    }

    #[test]
    fn missing_url_is_a_config_error() {
        let err = HttpAdapter::parse_config(&json!({})).unwrap_err();
        assert_eq!(err.kind(), "config");
        let err = HttpAdapter::parse_config(&json!({"url": ""})).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn body_type_infers_content_type() {
        assert_eq!(BodyType::Json.content_type(), "application/json");
        assert_eq!(
            BodyType::Form.content_type(),
            "application/x-www-form-urlencoded"
        );
        assert_eq!(BodyType::Raw.content_type(), "text/plain");
    }
}
