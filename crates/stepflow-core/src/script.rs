//! # Script Host Contract
//!
//! Pre/post scripts and executable block code run inside an injected host,
//! not in this crate. The engine's contract with scripts is byte-level:
//! inputs and outputs are JSON, and `ctx.*` capabilities (HTTP, embeddings,
//! vector search, crypto) are the host's to provide. A script error is
//! handled by the executor per the step's `on_error` policy.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::EngineError;

/// Handle describing the invocation site, passed through to the host.
#[derive(Debug, Clone)]
pub struct ScriptContext {
    pub correlation_id: String,
    pub step_name: String,
}

/// Sandboxed evaluator for block code and pre/post scripts.
#[async_trait]
pub trait ScriptHost: Send + Sync {
    /// Evaluate `code` with the given input and config values. The return
    /// value replaces the payload at the invocation site.
    async fn evaluate(
        &self,
        code: &str,
        input: &Value,
        config: &Value,
        ctx: &ScriptContext,
    ) -> Result<Value, EngineError>;
}

/// Test host mapping code strings to canned results via a closure.
pub struct FnScriptHost<F>(pub F);

#[async_trait]
impl<F> ScriptHost for FnScriptHost<F>
where
    F: Fn(&str, &Value, &Value) -> Result<Value, EngineError> + Send + Sync,
{
    async fn evaluate(
        &self,
        code: &str,
        input: &Value,
        config: &Value,
        _ctx: &ScriptContext,
    ) -> Result<Value, EngineError> {
        (self.0)(code, input, config)
    }
}
