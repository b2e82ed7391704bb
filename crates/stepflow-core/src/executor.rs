//! # Step Executor
//!
//! Runs one step to a terminal verdict: resolve the block, merge and expand
//! config, acquire the effective deadline, dispatch (script host, internal
//! steps, or adapter), apply the retry and `on_error` policies, and persist
//! the step-run record. The scheduler only ever sees the final verdict;
//! retries and fallback handling never leak upwards.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::adapter::{AdapterRegistry, AdapterRequest};
use crate::condition;
use crate::config::EngineConfig;
use crate::context::{ExecutionContext, RunContext};
use crate::error::EngineError;
use crate::model::{ErrorPolicy, OnError, RunStatus, Step, StepRun};
use crate::resolver::{BlockResolver, EffectiveBlock};
use crate::repo::StepRunRepo;
use crate::script::{ScriptContext, ScriptHost};
use crate::template::{self, TemplateContext};
use crate::util::json::deep_merge;

/// Final verdict of one step execution, as the scheduler consumes it.
#[derive(Debug)]
pub struct StepOutcome {
    pub step_run_id: Uuid,
    pub status: RunStatus,
    /// Port name → produced value; empty unless completed
    pub outputs: HashMap<String, Value>,
    pub error: Option<EngineError>,
    pub attempts: u32,
    pub default_port: String,
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Per-step runner shared by every run the scheduler drives.
pub struct StepExecutor {
    resolver: Arc<BlockResolver>,
    adapters: Arc<AdapterRegistry>,
    script_host: Option<Arc<dyn ScriptHost>>,
    step_runs: Arc<dyn StepRunRepo>,
    config: EngineConfig,
}

impl StepExecutor {
    pub fn new(
        resolver: Arc<BlockResolver>,
        adapters: Arc<AdapterRegistry>,
        step_runs: Arc<dyn StepRunRepo>,
        config: EngineConfig,
    ) -> Self {
        Self {
            resolver,
            adapters,
            script_host: None,
            step_runs,
            config,
        }
    }

    pub fn with_script_host(mut self, host: Arc<dyn ScriptHost>) -> Self {
        self.script_host = Some(host);
        self
    }

    /// Execute `step` with the assembled `input`. Always persists a
    /// step-run record; only repository failures surface as `Err`.
    #[instrument(skip_all, fields(step = %step.name, run = %run.run_id))]
    pub async fn execute(
        &self,
        run: &RunContext,
        step: &Step,
        input: Value,
    ) -> Result<StepOutcome, EngineError> {
        let mut step_run = StepRun::new(run.run_id, step.id, input.clone());
        self.step_runs.create(&step_run).await?;

        if run.is_cancelled() {
            step_run.finish(RunStatus::Cancelled);
            self.step_runs.update(&step_run).await?;
            return Ok(self.outcome(step_run, RunStatus::Cancelled, HashMap::new(), Some(EngineError::Cancelled), "out"));
        }

        // Resolution happens before the policy is known; a resolve failure
        // uses the default policy (fail).
        let effective = match self.resolver.resolve(run.tenant_id, &step.step_type).await {
            Ok(effective) => effective,
            Err(error) => {
                warn!(error = %error, "block resolution failed");
                return self
                    .finalize_failure(step_run, &ErrorPolicy::default(), None, error, 0)
                    .await;
            }
        };

        let merged = match &step.config {
            Value::Object(_) => deep_merge(&effective.config_defaults, &step.config),
            _ => effective.config_defaults.clone(),
        };
        let template_ctx = run.template_context(&input);
        let expanded = template::expand(&merged, &template_ctx);
        for token in &expanded.unresolved {
            step_run
                .warnings
                .push(format!("unresolved template token '{{{{{token}}}}}'"));
        }
        let config = expanded.value;
        let policy = ErrorPolicy::from_config(&config);

        // Guard condition: false suppresses the step entirely.
        if let Some(guard) = config.get("condition").and_then(Value::as_str) {
            if !condition::evaluate(guard, &input) {
                debug!(guard, "guard condition suppressed step");
                step_run.finish(RunStatus::Skipped);
                self.step_runs.update(&step_run).await?;
                return Ok(self.outcome(
                    step_run,
                    RunStatus::Skipped,
                    HashMap::new(),
                    None,
                    effective.default_output_port(),
                ));
            }
        }

        step_run.status = RunStatus::Running;
        step_run.started_at = Some(chrono::Utc::now());
        self.step_runs.update(&step_run).await?;

        if let Some(missing) = effective
            .required_credentials
            .iter()
            .find(|c| !step.credentials.contains_key(*c))
        {
            let error = EngineError::config(format!("missing required credential '{missing}'"));
            return self
                .finalize_failure(step_run, &policy, Some(&effective), error, 0)
                .await;
        }

        let step_timeout = policy
            .timeout_seconds
            .or(self.config.default_step_timeout_seconds)
            .map(Duration::from_secs);

        let script_ctx = ScriptContext {
            correlation_id: run.correlation_id.clone(),
            step_name: step.name.clone(),
        };

        // Pre-script output replaces the input payload.
        let input = match &effective.pre_script {
            Some(code) => {
                match self.run_script(code, &input, &config, &script_ctx).await {
                    Ok(value) => value,
                    Err(error) => {
                        return self
                            .finalize_failure(step_run, &policy, Some(&effective), error, 0)
                            .await;
                    }
                }
            }
            None => input,
        };

        let mut attempts: u32 = 0;
        let verdict = loop {
            attempts += 1;
            let ectx = run.execution_context(step_timeout);
            let result = self
                .dispatch(&effective, &config, &input, &ectx, run, &template_ctx)
                .await;

            match result {
                Ok(output) => break Ok(output),
                Err(EngineError::Cancelled) => break Err(EngineError::Cancelled),
                Err(error) => {
                    let retryable = effective
                        .code_retryable(error.provider_code().unwrap_or_default())
                        .unwrap_or_else(|| error.is_retryable())
                        && !error
                            .provider_code()
                            .is_some_and(|c| policy.non_retryable_codes.iter().any(|n| n == c));
                    if retryable && attempts < policy.max_retries {
                        let delay = policy.backoff_delay(attempts);
                        debug!(attempt = attempts, ?delay, error = %error, "retrying step");
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = run.cancellation.cancelled() => break Err(EngineError::Cancelled),
                        }
                        continue;
                    }
                    break Err(error);
                }
            }
        };

        match verdict {
            Ok(output) => {
                // Post-script output replaces the adapter output.
                let output = match &effective.post_script {
                    Some(code) => {
                        match self.run_script(code, &output, &config, &script_ctx).await {
                            Ok(value) => value,
                            Err(error) => {
                                step_run.attempt = attempts;
                                return self
                                    .finalize_failure(step_run, &policy, Some(&effective), error, attempts)
                                    .await;
                            }
                        }
                    }
                    None => output,
                };

                let outputs = split_outputs(output, &effective);
                step_run.attempt = attempts;
                step_run.output = outputs.clone();
                step_run.finish(RunStatus::Completed);
                self.step_runs.update(&step_run).await?;
                Ok(self.outcome(
                    step_run,
                    RunStatus::Completed,
                    outputs,
                    None,
                    effective.default_output_port(),
                ))
            }
            Err(EngineError::Cancelled) => {
                step_run.attempt = attempts;
                step_run.finish(RunStatus::Cancelled);
                self.step_runs.update(&step_run).await?;
                Ok(self.outcome(
                    step_run,
                    RunStatus::Cancelled,
                    HashMap::new(),
                    Some(EngineError::Cancelled),
                    effective.default_output_port(),
                ))
            }
            Err(error) => {
                step_run.attempt = attempts;
                self.finalize_failure(step_run, &policy, Some(&effective), error, attempts)
                    .await
            }
        }
    }

    /// Dispatch priority: executable code, then internal expansion steps,
    /// then an adapter bound by explicit reference, leaf slug, or chain
    /// root slug.
    fn dispatch<'a>(
        &'a self,
        effective: &'a EffectiveBlock,
        config: &'a Value,
        input: &'a Value,
        ectx: &'a ExecutionContext,
        run: &'a RunContext,
        template_ctx: &'a TemplateContext,
    ) -> BoxFuture<'a, Result<Value, EngineError>> {
        async move {
            if let Some(code) = effective.code.as_deref().filter(|c| !c.is_empty()) {
                let ctx = ScriptContext {
                    correlation_id: run.correlation_id.clone(),
                    step_name: effective.slug.clone(),
                };
                return self.run_script(code, input, config, &ctx).await;
            }

            if !effective.internal_steps.is_empty() {
                let mut carried = input.clone();
                for internal in &effective.internal_steps {
                    let inner = self
                        .resolver
                        .resolve(run.tenant_id, &internal.block_slug)
                        .await?;
                    let inner_config = match &internal.config {
                        Value::Object(_) => deep_merge(&inner.config_defaults, &internal.config),
                        _ => inner.config_defaults.clone(),
                    };
                    let inner_config = template::expand(&inner_config, template_ctx).value;
                    carried = self
                        .dispatch(&inner, &inner_config, &carried, ectx, run, template_ctx)
                        .await?;
                }
                return Ok(carried);
            }

            let adapter = config
                .get("adapter")
                .and_then(Value::as_str)
                .and_then(|id| self.adapters.get(id))
                .or_else(|| self.adapters.get(&effective.slug))
                .or_else(|| self.adapters.get(&effective.root_slug))
                .ok_or_else(|| {
                    EngineError::config(format!(
                        "no adapter registered for block '{}'",
                        effective.slug
                    ))
                })?;

            let request = AdapterRequest {
                config: config.clone(),
                input: input.clone(),
                correlation_id: ectx.correlation_id.clone(),
                timeout_ms: ectx.timeout_ms(),
                metadata: HashMap::new(),
            };

            let call = adapter.execute(ectx, request);
            match ectx.timeout {
                Some(timeout) => tokio::select! {
                    result = call => result.map(|r| r.output),
                    _ = tokio::time::sleep(timeout) => Err(EngineError::timeout(format!(
                        "step deadline of {}ms exceeded", timeout.as_millis()
                    ))),
                    _ = ectx.cancellation.cancelled() => Err(EngineError::Cancelled),
                },
                None => tokio::select! {
                    result = call => result.map(|r| r.output),
                    _ = ectx.cancellation.cancelled() => Err(EngineError::Cancelled),
                },
            }
        }
        .boxed()
    }

    async fn run_script(
        &self,
        code: &str,
        input: &Value,
        config: &Value,
        ctx: &ScriptContext,
    ) -> Result<Value, EngineError> {
        let host = self
            .script_host
            .as_ref()
            .ok_or_else(|| EngineError::config("block declares a script but no script host is configured"))?;
        host.evaluate(code, input, config, ctx).await
    }

    /// Apply the `on_error` policy to the final error and persist.
    async fn finalize_failure(
        &self,
        mut step_run: StepRun,
        policy: &ErrorPolicy,
        effective: Option<&EffectiveBlock>,
        error: EngineError,
        attempts: u32,
    ) -> Result<StepOutcome, EngineError> {
        let default_port = effective
            .map(|e| e.default_output_port().to_string())
            .unwrap_or_else(|| "out".to_string());
        step_run.attempt = attempts.max(step_run.attempt);
        step_run.error = Some(error.to_string());
        step_run.error_kind = Some(error.kind().to_string());

        let error_port_available =
            effective.is_some_and(|e| e.has_output_port("error"));
        let applied = match policy.on_error {
            OnError::ErrorPort if !error_port_available => OnError::Fail,
            other => other,
        };

        match applied {
            OnError::Fail => {
                if step_run.started_at.is_none() {
                    // Never dispatched; mark the pending record cancelled-free
                    step_run.status = RunStatus::Running;
                    step_run.started_at = Some(chrono::Utc::now());
                    self.step_runs.update(&step_run).await?;
                }
                step_run.finish(RunStatus::Failed);
                self.step_runs.update(&step_run).await?;
                Ok(self.outcome(step_run, RunStatus::Failed, HashMap::new(), Some(error), &default_port))
            }
            OnError::Continue => {
                let mut outputs = HashMap::new();
                outputs.insert(default_port.clone(), json!({}));
                step_run.output = outputs.clone();
                step_run.finish(RunStatus::Completed);
                self.step_runs.update(&step_run).await?;
                Ok(self.outcome(step_run, RunStatus::Completed, outputs, Some(error), &default_port))
            }
            OnError::Fallback => {
                let mut outputs = HashMap::new();
                outputs.insert(
                    default_port.clone(),
                    policy.fallback_value.clone().unwrap_or(Value::Null),
                );
                step_run.output = outputs.clone();
                step_run.finish(RunStatus::Completed);
                self.step_runs.update(&step_run).await?;
                Ok(self.outcome(step_run, RunStatus::Completed, outputs, Some(error), &default_port))
            }
            OnError::ErrorPort => {
                let mut outputs = HashMap::new();
                outputs.insert(
                    "error".to_string(),
                    json!({"kind": error.kind(), "message": error.to_string()}),
                );
                step_run.output = outputs.clone();
                step_run.finish(RunStatus::Completed);
                self.step_runs.update(&step_run).await?;
                Ok(self.outcome(step_run, RunStatus::Completed, outputs, Some(error), &default_port))
            }
        }
    }

    fn outcome(
        &self,
        step_run: StepRun,
        status: RunStatus,
        outputs: HashMap<String, Value>,
        error: Option<EngineError>,
        default_port: &str,
    ) -> StepOutcome {
        StepOutcome {
            step_run_id: step_run.id,
            status,
            outputs,
            error,
            attempts: step_run.attempt,
            default_port: default_port.to_string(),
        }
    }
}

/// Map an adapter output onto ports: an object whose keys are all declared
/// output ports splits per-port; anything else lands on the default port.
fn split_outputs(output: Value, effective: &EffectiveBlock) -> HashMap<String, Value> {
    let mut outputs = HashMap::new();
    if let Value::Object(map) = &output {
        let all_ports = !map.is_empty()
            && map.keys().all(|key| effective.has_output_port(key));
        if all_ports {
            for (port, value) in map {
                outputs.insert(port.clone(), value.clone());
            }
            return outputs;
        }
    }
    outputs.insert(effective.default_output_port().to_string(), output);
    outputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterRegistry, MockAdapter, MockOutcome};
    use crate::model::{BlockCategory, BlockDefinition, OutputPort};
    use crate::repo::memory::MemoryStore;
    use crate::repo::{BlockDefinitionRepo as _, StepRunRepo as _};
    use crate::script::FnScriptHost;
    use tokio_util::sync::CancellationToken;

    struct Harness {
        store: MemoryStore,
        registry: AdapterRegistry,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: MemoryStore::new(),
                registry: AdapterRegistry::new(),
            }
        }

        async fn block(&self, slug: &str) -> BlockDefinition {
            let block = BlockDefinition::system(slug, BlockCategory::Custom);
            self.store.blocks.create(&block).await.unwrap();
            block
        }

        fn executor(self) -> (StepExecutor, MemoryStore) {
            let resolver = Arc::new(BlockResolver::new(self.store.blocks.clone()));
            let executor = StepExecutor::new(
                resolver,
                Arc::new(self.registry),
                self.store.step_runs.clone(),
                EngineConfig::default(),
            );
            (executor, self.store)
        }
    }

    fn run_ctx() -> RunContext {
        RunContext::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            None,
            "corr",
            json!({"topic": "cats"}),
            CancellationToken::new(),
            None,
        )
    }

    #[tokio::test]
    async fn expands_templates_before_dispatch() {
        let mut harness = Harness::new();
        harness.block("echo").await;
        harness
            .registry
            .register(Arc::new(MockAdapter::returning("echo", json!({}))));
        let (executor, store) = harness.executor();

        let run = run_ctx();
        let step = Step::new(run.workflow_id, "greet", "echo")
            .with_config(json!({"output": {"prompt": "Tell me about {{topic}}"}}));
        let outcome = executor
            .execute(&run, &step, json!({"topic": "cats"}))
            .await
            .unwrap();

        assert!(outcome.succeeded());
        assert_eq!(
            outcome.outputs["out"],
            json!({"prompt": "Tell me about cats"})
        );
        let record = store.step_runs.get_by_id(outcome.step_run_id).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Completed);
        assert_eq!(record.attempt, 1);
    }

    #[tokio::test]
    async fn retries_until_success_and_counts_attempts() {
        let mut harness = Harness::new();
        harness.block("flaky").await;
        harness.registry.register(Arc::new(
            MockAdapter::failing_then_succeeding("flaky", 1, json!({"ok": true})),
        ));
        let (executor, store) = harness.executor();

        let run = run_ctx();
        let step = Step::new(run.workflow_id, "s", "flaky").with_config(json!({
            "max_retries": 2,
            "interval_seconds": 0.01
        }));
        let outcome = executor.execute(&run, &step, json!({})).await.unwrap();

        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts, 2);
        let record = store.step_runs.get_by_id(outcome.step_run_id).await.unwrap().unwrap();
        assert_eq!(record.attempt, 2);
    }

    #[tokio::test]
    async fn config_errors_short_circuit_retries() {
        let mut harness = Harness::new();
        harness.block("strict").await;
        let adapter = Arc::new(MockAdapter::with_outcomes(
            "strict",
            vec![
                MockOutcome::Fail(EngineError::config("bad field")),
                MockOutcome::Succeed(json!({})),
            ],
        ));
        harness.registry.register(adapter.clone());
        let (executor, _) = harness.executor();

        let run = run_ctx();
        let step = Step::new(run.workflow_id, "s", "strict");
        let outcome = executor.execute(&run, &step, json!({})).await.unwrap();

        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(adapter.calls(), 1);
    }

    #[tokio::test]
    async fn on_error_continue_emits_empty_default_output() {
        let mut harness = Harness::new();
        harness.block("doomed").await;
        harness.registry.register(Arc::new(
            MockAdapter::with_outcomes(
                "doomed",
                vec![MockOutcome::Fail(EngineError::config("nope"))],
            ),
        ));
        let (executor, store) = harness.executor();

        let run = run_ctx();
        let step = Step::new(run.workflow_id, "s", "doomed")
            .with_config(json!({"on_error": "continue"}));
        let outcome = executor.execute(&run, &step, json!({})).await.unwrap();

        assert!(outcome.succeeded());
        assert_eq!(outcome.outputs["out"], json!({}));
        assert!(outcome.error.is_some());
        let record = store.step_runs.get_by_id(outcome.step_run_id).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Completed);
        assert!(record.error.is_some());
    }

    #[tokio::test]
    async fn on_error_fallback_emits_static_value() {
        let mut harness = Harness::new();
        harness.block("doomed").await;
        harness.registry.register(Arc::new(
            MockAdapter::with_outcomes(
                "doomed",
                vec![MockOutcome::Fail(EngineError::config("nope"))],
            ),
        ));
        let (executor, _) = harness.executor();

        let run = run_ctx();
        let step = Step::new(run.workflow_id, "s", "doomed").with_config(json!({
            "on_error": "fallback",
            "fallback_value": {"cached": true}
        }));
        let outcome = executor.execute(&run, &step, json!({})).await.unwrap();
        assert_eq!(outcome.outputs["out"], json!({"cached": true}));
    }

    #[tokio::test]
    async fn on_error_error_port_requires_declared_port() {
        let mut harness = Harness::new();
        let mut block = BlockDefinition::system("guarded", BlockCategory::Custom);
        block.outputs = vec![
            OutputPort::new("out").default_port(),
            OutputPort::new("error"),
        ];
        harness.store.blocks.create(&block).await.unwrap();
        harness.registry.register(Arc::new(
            MockAdapter::with_outcomes(
                "guarded",
                vec![MockOutcome::Fail(EngineError::provider("x", "boom", Some(500)))],
            ),
        ));
        let (executor, _) = harness.executor();

        let run = run_ctx();
        let step = Step::new(run.workflow_id, "s", "guarded").with_config(json!({
            "on_error": "error_port",
            "max_retries": 1
        }));
        let outcome = executor.execute(&run, &step, json!({})).await.unwrap();

        assert!(outcome.succeeded());
        let error = &outcome.outputs["error"];
        assert_eq!(error["kind"], "provider");
    }

    #[tokio::test]
    async fn step_timeout_beats_slow_adapter() {
        let mut harness = Harness::new();
        harness.block("slow").await;
        harness
            .registry
            .register(Arc::new(MockAdapter::returning("slow", json!({}))));
        let (executor, _) = harness.executor();

        let run = run_ctx();
        let step = Step::new(run.workflow_id, "s", "slow").with_config(json!({
            "sleep_ms": 5000,
            "timeout_seconds": 1,
            "max_retries": 1
        }));
        let started = std::time::Instant::now();
        let outcome = executor.execute(&run, &step, json!({})).await.unwrap();

        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.error.as_ref().unwrap().kind(), "timeout");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn pre_and_post_scripts_wrap_dispatch() {
        let mut harness = Harness::new();
        let mut block = BlockDefinition::system("scripted", BlockCategory::Custom);
        block.pre_script = Some("wrap_input".into());
        block.post_script = Some("wrap_output".into());
        harness.store.blocks.create(&block).await.unwrap();
        harness.registry.register(Arc::new(MockAdapter::returning(
            "scripted",
            json!({"from": "adapter"}),
        )));
        let (executor, _) = harness.executor();
        let executor = executor.with_script_host(Arc::new(FnScriptHost(
            |code: &str, input: &Value, _config: &Value| {
                Ok(json!({"script": code, "saw": input}))
            },
        )));

        let run = run_ctx();
        let step = Step::new(run.workflow_id, "s", "scripted");
        let outcome = executor.execute(&run, &step, json!({"raw": 1})).await.unwrap();

        let out = &outcome.outputs["out"];
        assert_eq!(out["script"], "wrap_output");
        assert_eq!(out["saw"]["from"], "adapter");
    }

    #[tokio::test]
    async fn guard_condition_skips_without_dispatch() {
        let mut harness = Harness::new();
        harness.block("gated").await;
        let adapter = Arc::new(MockAdapter::returning("gated", json!({})));
        harness.registry.register(adapter.clone());
        let (executor, store) = harness.executor();

        let run = run_ctx();
        let step = Step::new(run.workflow_id, "s", "gated")
            .with_config(json!({"condition": "enabled"}));
        let outcome = executor
            .execute(&run, &step, json!({"enabled": false}))
            .await
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Skipped);
        assert_eq!(adapter.calls(), 0);
        let record = store.step_runs.get_by_id(outcome.step_run_id).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Skipped);
    }

    #[tokio::test]
    async fn unresolved_tokens_become_warnings() {
        let mut harness = Harness::new();
        harness.block("echo").await;
        harness
            .registry
            .register(Arc::new(MockAdapter::returning("echo", json!({}))));
        let (executor, store) = harness.executor();

        let run = run_ctx();
        let step = Step::new(run.workflow_id, "s", "echo")
            .with_config(json!({"prompt": "{{nowhere.to.be.found}}"}));
        let outcome = executor.execute(&run, &step, json!({})).await.unwrap();

        let record = store.step_runs.get_by_id(outcome.step_run_id).await.unwrap().unwrap();
        assert_eq!(record.warnings.len(), 1);
        assert!(record.warnings[0].contains("nowhere.to.be.found"));
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_dispatch() {
        let mut harness = Harness::new();
        let mut block = BlockDefinition::system("secure", BlockCategory::Apps);
        block.required_credentials = vec!["api_key".into()];
        harness.store.blocks.create(&block).await.unwrap();
        let adapter = Arc::new(MockAdapter::returning("secure", json!({})));
        harness.registry.register(adapter.clone());
        let (executor, _) = harness.executor();

        let run = run_ctx();
        let step = Step::new(run.workflow_id, "s", "secure");
        let outcome = executor.execute(&run, &step, json!({})).await.unwrap();

        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.error.as_ref().unwrap().kind(), "config");
        assert_eq!(adapter.calls(), 0);
    }

    #[tokio::test]
    async fn internal_steps_chain_sequentially() {
        let mut harness = Harness::new();
        harness.block("first").await;
        harness.block("second").await;
        let mut macro_block = BlockDefinition::system("combo", BlockCategory::Flow);
        macro_block.internal_steps = vec![
            crate::model::InternalStep {
                name: "first".into(),
                block_slug: "first".into(),
                config: json!({"output": {"stage": 1}}),
            },
            crate::model::InternalStep {
                name: "second".into(),
                block_slug: "second".into(),
                config: json!({"output": {"stage": 2}}),
            },
        ];
        harness.store.blocks.create(&macro_block).await.unwrap();
        harness.registry.register(Arc::new(MockAdapter::returning("first", json!({}))));
        harness.registry.register(Arc::new(MockAdapter::returning("second", json!({}))));
        let (executor, _) = harness.executor();

        let run = run_ctx();
        let step = Step::new(run.workflow_id, "s", "combo");
        let outcome = executor.execute(&run, &step, json!({})).await.unwrap();
        assert_eq!(outcome.outputs["out"], json!({"stage": 2}));
    }

    #[test]
    fn split_outputs_requires_all_keys_to_be_ports() {
        let mut block = BlockDefinition::system("check", BlockCategory::Flow);
        block.outputs = vec![
            OutputPort::new("true").default_port(),
            OutputPort::new("false"),
        ];
        let effective = crate::resolver::flatten_chain(&[block]);

        let split = split_outputs(json!({"true": {"go": 1}}), &effective);
        assert_eq!(split.len(), 1);
        assert_eq!(split["true"], json!({"go": 1}));

        let whole = split_outputs(json!({"true": 1, "other": 2}), &effective);
        assert_eq!(whole.len(), 1);
        assert!(whole.contains_key("true"));
        assert_eq!(whole["true"], json!({"true": 1, "other": 2}));
    }
}
