//! # Adapter Contract & Registry
//!
//! An adapter is a named executor of a single external integration (an LLM
//! provider, an HTTP endpoint, a mock). All adapters conform to one
//! request/response contract; the executor hands them fully expanded config
//! (adapters never see template tokens) plus the step's input payload, and
//! receives JSON output with an observed duration.
//!
//! The registry is populated once at process init and treated as immutable
//! afterwards (handed to the engine as `Arc<AdapterRegistry>`), so lookups
//! need no locking. Registration is last-writer-wins.

mod mock;

pub use mock::{MockAdapter, MockOutcome};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::error::EngineError;

/// Request handed to [`Adapter::execute`]. `config` is pre-expanded.
#[derive(Debug, Clone)]
pub struct AdapterRequest {
    pub config: Value,
    pub input: Value,
    pub correlation_id: String,
    pub timeout_ms: u64,
    pub metadata: HashMap<String, String>,
}

impl AdapterRequest {
    pub fn new(config: Value, input: Value) -> Self {
        Self {
            config,
            input,
            correlation_id: String::new(),
            timeout_ms: 0,
            metadata: HashMap::new(),
        }
    }

    /// Fetch a required string field out of the expanded config.
    pub fn config_str(&self, key: &str) -> Result<&str, EngineError> {
        self.config
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::config(format!("missing required config field '{key}'")))
    }

    /// Fetch an optional string field.
    pub fn config_str_opt(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

/// Response from a successful adapter invocation.
#[derive(Debug, Clone)]
pub struct AdapterResponse {
    pub output: Value,
    pub duration_ms: u64,
    pub metadata: HashMap<String, String>,
}

impl AdapterResponse {
    pub fn new(output: Value, duration_ms: u64) -> Self {
        Self {
            output,
            duration_ms,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Uniform contract across heterogeneous external integrations.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Stable identifier; steps bind to adapters through this
    fn id(&self) -> &str;

    /// Human-readable display name
    fn name(&self) -> &str;

    /// JSON-schema for the variable-substitution data this adapter consumes
    fn input_schema(&self) -> Value;

    /// JSON-schema for the result shape
    fn output_schema(&self) -> Value;

    /// Perform the integration call under the context's deadline.
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        request: AdapterRequest,
    ) -> Result<AdapterResponse, EngineError>;
}

/// Mapping from adapter id to instance. Insertion order is irrelevant;
/// duplicate registration overwrites (last writer wins at process init).
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(adapter.id().to_string(), adapter);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

/// Identity adapter: output = input. Flow blocks with no side effects
/// (`start`, `merge`, `noop`) bind to this.
pub struct PassthroughAdapter {
    id: String,
}

impl PassthroughAdapter {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl Adapter for PassthroughAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "Passthrough"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({"type": "object"})
    }

    fn output_schema(&self) -> Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        request: AdapterRequest,
    ) -> Result<AdapterResponse, EngineError> {
        if ctx.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(AdapterResponse::new(request.input, 0))
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}
