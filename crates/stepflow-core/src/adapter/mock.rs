//! Deterministic in-process adapter used by engine tests and local dry
//! runs. Supports scripted per-attempt outcomes, configurable latency, and
//! config-driven output so fixtures stay declarative.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{Adapter, AdapterRequest, AdapterResponse};
use crate::context::ExecutionContext;
use crate::error::EngineError;

/// One scripted invocation result.
#[derive(Debug)]
pub enum MockOutcome {
    Succeed(Value),
    Fail(EngineError),
}

/// Scripted adapter. Outcomes are consumed front-to-back; once exhausted,
/// every call succeeds with the default output. Config keys understood at
/// execute time: `sleep_ms` (simulated latency, cancellation-aware) and
/// `output` (overrides the default output).
pub struct MockAdapter {
    id: String,
    default_output: Value,
    outcomes: Mutex<VecDeque<MockOutcome>>,
    calls: AtomicU32,
}

impl MockAdapter {
    pub fn returning(id: impl Into<String>, output: Value) -> Self {
        Self {
            id: id.into(),
            default_output: output,
            outcomes: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_outcomes(id: impl Into<String>, outcomes: Vec<MockOutcome>) -> Self {
        Self {
            id: id.into(),
            default_output: json!({}),
            outcomes: Mutex::new(outcomes.into()),
            calls: AtomicU32::new(0),
        }
    }

    /// Fail the first `failures` attempts with a retryable provider error,
    /// then succeed with `output` — the shape retry tests want.
    pub fn failing_then_succeeding(id: impl Into<String>, failures: u32, output: Value) -> Self {
        let id = id.into();
        let outcomes = (0..failures)
            .map(|attempt| {
                MockOutcome::Fail(EngineError::provider(
                    id.clone(),
                    format!("scripted failure on attempt {}", attempt + 1),
                    Some(500),
                ))
            })
            .collect();
        Self {
            default_output: output,
            id,
            outcomes: Mutex::new(outcomes),
            calls: AtomicU32::new(0),
        }
    }

    /// Number of times `execute` has been invoked.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "Mock adapter"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    fn output_schema(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        request: AdapterRequest,
    ) -> Result<AdapterResponse, EngineError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let started = std::time::Instant::now();

        if ctx.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        if let Some(sleep_ms) = request.config.get("sleep_ms").and_then(Value::as_u64) {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {}
                _ = ctx.cancellation.cancelled() => return Err(EngineError::Cancelled),
            }
        }

        let scripted = self
            .outcomes
            .lock()
            .expect("mock outcome queue lock poisoned")
            .pop_front();
        let output = match scripted {
            Some(MockOutcome::Fail(error)) => return Err(error),
            Some(MockOutcome::Succeed(value)) => value,
            None => request
                .config
                .get("output")
                .cloned()
                .unwrap_or_else(|| self.default_output.clone()),
        };

        Ok(
            AdapterResponse::new(output, started.elapsed().as_millis() as u64)
                .with_metadata("attempt", attempt.to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn scripted_failures_then_default_success() {
        let adapter = MockAdapter::failing_then_succeeding("m", 2, json!({"done": true}));
        let ctx = ExecutionContext::detached();

        for _ in 0..2 {
            let err = adapter
                .execute(&ctx, AdapterRequest::new(json!({}), json!({})))
                .await
                .unwrap_err();
            assert!(err.is_retryable());
        }
        let response = adapter
            .execute(&ctx, AdapterRequest::new(json!({}), json!({})))
            .await
            .unwrap();
        assert_eq!(response.output, json!({"done": true}));
        assert_eq!(adapter.calls(), 3);
    }

    #[tokio::test]
    async fn config_output_wins_when_no_script_remains() {
        let adapter = MockAdapter::returning("m", json!({"d": 1}));
        let response = adapter
            .execute(
                &ExecutionContext::detached(),
                AdapterRequest::new(json!({"output": {"d": 2}}), json!({})),
            )
            .await
            .unwrap();
        assert_eq!(response.output, json!({"d": 2}));
    }

    #[tokio::test]
    async fn sleep_is_interrupted_by_cancellation() {
        let adapter = MockAdapter::returning("m", json!({}));
        let token = CancellationToken::new();
        let ctx = ExecutionContext {
            cancellation: token.clone(),
            ..ExecutionContext::detached()
        };

        let cancel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let started = std::time::Instant::now();
        let err = adapter
            .execute(&ctx, AdapterRequest::new(json!({"sleep_ms": 5000}), json!({})))
            .await
            .unwrap_err();
        cancel.await.unwrap();

        assert!(matches!(err, EngineError::Cancelled));
        assert!(started.elapsed() < Duration::from_millis(500));
    }
}
