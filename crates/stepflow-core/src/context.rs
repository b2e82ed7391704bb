//! # Run Context
//!
//! [`RunContext`] is the carrier that flows through one workflow run: ids,
//! the trigger payload, the cancellation token, the outer deadline, and the
//! accumulated step outputs the template expander resolves against.
//! [`ExecutionContext`] is the narrowed view handed to adapters: an
//! effective deadline plus the cancellation token.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::template::TemplateContext;

/// Per-run execution state shared by the scheduler and executor.
#[derive(Debug)]
pub struct RunContext {
    pub run_id: Uuid,
    pub workflow_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub correlation_id: String,
    /// Root input payload, exposed to templates as `trigger.*`
    pub trigger: Value,
    pub cancellation: CancellationToken,
    /// Absolute outer deadline for the whole run, if bounded
    pub deadline: Option<DateTime<Utc>>,
    /// Step name → port → produced value
    outputs: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl RunContext {
    pub fn new(
        run_id: Uuid,
        workflow_id: Uuid,
        tenant_id: Option<Uuid>,
        correlation_id: impl Into<String>,
        trigger: Value,
        cancellation: CancellationToken,
        run_timeout: Option<Duration>,
    ) -> Self {
        Self {
            run_id,
            workflow_id,
            tenant_id,
            correlation_id: correlation_id.into(),
            trigger,
            cancellation,
            deadline: run_timeout
                .and_then(|t| chrono::Duration::from_std(t).ok())
                .map(|t| Utc::now() + t),
            outputs: RwLock::new(HashMap::new()),
        }
    }

    /// Record a completed step's port outputs so downstream templates can
    /// reference them. Within a step the write is atomic: downstream edges
    /// observe either nothing or the final outputs.
    pub fn record_outputs(&self, step_name: &str, outputs: &HashMap<String, Value>) {
        let mut guard = self.outputs.write().expect("run output map lock poisoned");
        guard.insert(step_name.to_string(), outputs.clone());
    }

    pub fn output_of(&self, step_name: &str, port: &str) -> Option<Value> {
        let guard = self.outputs.read().expect("run output map lock poisoned");
        guard.get(step_name).and_then(|ports| ports.get(port)).cloned()
    }

    /// Assemble the template context for a step about to execute.
    pub fn template_context(&self, step_input: &Value) -> TemplateContext {
        let mut ctx = TemplateContext::new()
            .with_input(step_input)
            .with_trigger(&self.trigger)
            .with_ctx(json!({
                "run_id": self.run_id,
                "workflow_id": self.workflow_id,
                "correlation_id": self.correlation_id,
            }));
        let guard = self.outputs.read().expect("run output map lock poisoned");
        for (step_name, ports) in guard.iter() {
            for (port, value) in ports {
                ctx.insert_step_output(step_name, port, value);
            }
        }
        ctx
    }

    /// Time remaining until the run deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|deadline| {
            (deadline - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
        })
    }

    /// Effective timeout for a step: `min(remaining outer, step timeout)`.
    /// `None` means unbounded.
    pub fn effective_timeout(&self, step_timeout: Option<Duration>) -> Option<Duration> {
        match (self.remaining(), step_timeout) {
            (Some(outer), Some(step)) => Some(outer.min(step)),
            (Some(outer), None) => Some(outer),
            (None, step) => step,
        }
    }

    /// The deadline view an adapter invocation receives.
    pub fn execution_context(&self, step_timeout: Option<Duration>) -> ExecutionContext {
        ExecutionContext {
            correlation_id: self.correlation_id.clone(),
            cancellation: self.cancellation.clone(),
            timeout: self.effective_timeout(step_timeout),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Deadline + cancellation view passed into `Adapter::execute`.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub correlation_id: String,
    pub cancellation: CancellationToken,
    /// Effective timeout for this invocation; `None` means unbounded
    pub timeout: Option<Duration>,
}

impl ExecutionContext {
    /// Unbounded context for tests and out-of-run invocations.
    pub fn detached() -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            cancellation: CancellationToken::new(),
            timeout: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::detached()
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout.map(|t| t.as_millis() as u64).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run_ctx(timeout: Option<Duration>) -> RunContext {
        RunContext::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            None,
            "corr-1",
            json!({"topic": "cats"}),
            CancellationToken::new(),
            timeout,
        )
    }

    #[test]
    fn effective_timeout_takes_the_minimum() {
        let ctx = run_ctx(Some(Duration::from_secs(60)));
        let effective = ctx.effective_timeout(Some(Duration::from_secs(5))).unwrap();
        assert!(effective <= Duration::from_secs(5));

        let effective = ctx.effective_timeout(Some(Duration::from_secs(600))).unwrap();
        assert!(effective <= Duration::from_secs(60));
    }

    #[test]
    fn unbounded_when_neither_layer_sets_a_timeout() {
        let ctx = run_ctx(None);
        assert!(ctx.effective_timeout(None).is_none());
    }

    #[test]
    fn recorded_outputs_feed_the_template_context() {
        let ctx = run_ctx(None);
        let mut ports = HashMap::new();
        ports.insert("out".to_string(), json!({"answer": 42}));
        ctx.record_outputs("compute", &ports);

        let tctx = ctx.template_context(&json!({}));
        assert_eq!(tctx.resolve("compute.out.answer"), Some(&json!(42)));
        assert_eq!(tctx.resolve("trigger.topic"), Some(&json!("cats")));
    }
}
