//! # Scheduler / Graph Engine
//!
//! Owns the top-level lifecycle of a workflow run. The persisted graph is
//! derived into an adjacency form at run start ([`graph::WorkflowGraph`]);
//! from there the scheduler computes ready nodes, spawns them onto the
//! run's bounded worker pool, routes port outputs along (optionally
//! conditional) edges, and drives block-group container semantics.
//!
//! Ordering guarantees:
//! - edge data is never consumed before the source's terminal completion
//! - a step with multiple incoming ports sees all of them populated
//! - port outputs are atomic per step
//! - step-run records are written (by the executor) before downstream
//!   steps observe the outputs they depend on
//!
//! Failure propagation: a failed step (after the executor's own
//! retry/`on_error` handling) fails its scope; an enclosing group converts
//! the failure onto its `error` output port, and if nothing consumes that
//! port the failure keeps bubbling until the run itself fails.

pub mod graph;
pub mod groups;

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::adapter::{AdapterRegistry, AdapterRequest};
use crate::condition;
use crate::config::EngineConfig;
use crate::context::RunContext;
use crate::error::EngineError;
use crate::executor::StepExecutor;
use crate::model::{
    BlockGroup, GroupType, RunStatus, WorkflowRun, GROUP_INPUT_PORT,
};
use crate::repo::{RunRepo, WorkflowRepo};
use crate::script::{ScriptContext, ScriptHost};

use graph::{NodeId, WorkflowGraph};
use groups::{AgentConfig, ForeachConfig, WhileConfig};

/// Per-run options supplied by the trigger.
#[derive(Debug, Default)]
pub struct RunOptions {
    pub correlation_id: Option<String>,
    /// Outer bound for the whole run; overrides the engine default
    pub timeout: Option<Duration>,
    /// External cancellation handle; a fresh token is minted if absent
    pub cancellation: Option<CancellationToken>,
}

/// The graph engine. One instance serves many concurrent runs.
pub struct Scheduler {
    workflows: Arc<dyn WorkflowRepo>,
    runs: Arc<dyn RunRepo>,
    executor: Arc<StepExecutor>,
    adapters: Arc<AdapterRegistry>,
    script_host: Option<Arc<dyn ScriptHost>>,
    config: EngineConfig,
}

impl Scheduler {
    pub fn new(
        workflows: Arc<dyn WorkflowRepo>,
        runs: Arc<dyn RunRepo>,
        executor: Arc<StepExecutor>,
        adapters: Arc<AdapterRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            workflows,
            runs,
            executor,
            adapters,
            script_host: None,
            config,
        }
    }

    pub fn with_script_host(mut self, host: Arc<dyn ScriptHost>) -> Self {
        self.script_host = Some(host);
        self
    }

    /// Execute a workflow to a terminal run status.
    #[instrument(skip(self, input, opts), fields(workflow = %workflow_id))]
    pub async fn run(
        &self,
        workflow_id: Uuid,
        input: Value,
        opts: RunOptions,
    ) -> Result<WorkflowRun, EngineError> {
        let data = self
            .workflows
            .get_with_graph(workflow_id)
            .await?
            .ok_or_else(|| EngineError::not_found("workflow", workflow_id))?;
        let graph = Arc::new(WorkflowGraph::build(&data)?);

        let correlation_id = opts
            .correlation_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut run_row = WorkflowRun::new(workflow_id, input.clone(), correlation_id.clone());
        self.runs.create(&run_row).await?;
        run_row.status = RunStatus::Running;
        run_row.started_at = Some(chrono::Utc::now());
        self.runs.update(&run_row).await?;
        info!(run = %run_row.id, "workflow run started");

        let cancellation = opts.cancellation.unwrap_or_default();
        let timeout = opts
            .timeout
            .or(self.config.run_timeout_seconds.map(Duration::from_secs));
        let run_ctx = Arc::new(RunContext::new(
            run_row.id,
            workflow_id,
            data.workflow.tenant_id,
            correlation_id,
            input,
            cancellation.clone(),
            timeout,
        ));

        let driver = Arc::new(RunDriver {
            graph,
            run: run_ctx,
            executor: self.executor.clone(),
            adapters: self.adapters.clone(),
            script_host: self.script_host.clone(),
            config: self.config.clone(),
            semaphore: Arc::new(Semaphore::new(self.config.worker_cap.max(1))),
        });

        let root = driver.clone().run_scope(None, run_row.input.clone(), None);
        let result = match timeout {
            Some(bound) => tokio::select! {
                result = root => result?,
                _ = tokio::time::sleep(bound) => {
                    cancellation.cancel();
                    ScopeResult::Failed {
                        kind: "timeout".to_string(),
                        message: format!("run deadline of {}ms exceeded", bound.as_millis()),
                    }
                }
            },
            None => root.await?,
        };

        match result {
            ScopeResult::Completed { output } => {
                run_row.output = output;
                run_row.status = RunStatus::Completed;
            }
            ScopeResult::Failed { kind, message } => {
                warn!(run = %run_row.id, %kind, %message, "workflow run failed");
                run_row.error = Some(format!("[{kind}] {message}"));
                run_row.status = RunStatus::Failed;
            }
            ScopeResult::Cancelled => {
                run_row.status = RunStatus::Cancelled;
            }
        }
        run_row.finished_at = Some(chrono::Utc::now());
        self.runs.update(&run_row).await?;
        info!(run = %run_row.id, status = ?run_row.status, "workflow run finished");
        Ok(run_row)
    }
}

/// Terminal verdict of one scope (the top level, or one group body).
enum ScopeResult {
    Completed { output: Value },
    Failed { kind: String, message: String },
    Cancelled,
}

/// Verdict of one group node.
struct GroupOutcome {
    outputs: HashMap<String, Value>,
    /// Set when the body failed; the parent scope bubbles it unless an
    /// `error`-port edge consumes it
    failure: Option<(String, String)>,
    cancelled: bool,
}

enum NodeResult {
    Step(crate::executor::StepOutcome),
    Group(GroupOutcome),
}

/// Shared state for one run, cloned into spawned node tasks.
struct RunDriver {
    graph: Arc<WorkflowGraph>,
    run: Arc<RunContext>,
    executor: Arc<StepExecutor>,
    adapters: Arc<AdapterRegistry>,
    script_host: Option<Arc<dyn ScriptHost>>,
    config: EngineConfig,
    semaphore: Arc<Semaphore>,
}

/// Mutable ready-set bookkeeping for one scope execution.
struct ScopeState {
    needed: HashMap<NodeId, usize>,
    resolved: HashMap<NodeId, usize>,
    inbox: HashMap<NodeId, HashMap<String, Value>>,
    real: HashSet<NodeId>,
    spawned: HashSet<NodeId>,
    finished: HashSet<NodeId>,
    check: Vec<NodeId>,
}

impl ScopeState {
    fn resolve_edge_into(&mut self, target: NodeId) {
        if let Some(count) = self.resolved.get_mut(&target) {
            *count += 1;
            self.check.push(target);
        }
    }

    fn deliver(&mut self, target: NodeId, port: &str, value: Value) {
        self.inbox
            .entry(target)
            .or_default()
            .insert(port.to_string(), value);
        self.real.insert(target);
    }
}

impl RunDriver {
    /// Execute one scope to completion. `role` filters member steps by
    /// group zone (try_catch runs only its body zone).
    fn run_scope(
        self: Arc<Self>,
        scope: Option<Uuid>,
        scope_input: Value,
        role: Option<String>,
    ) -> BoxFuture<'static, Result<ScopeResult, EngineError>> {
        async move {
            let graph = self.graph.clone();
            let members: Vec<NodeId> = graph
                .members_of(scope)
                .iter()
                .copied()
                .filter(|&node| match (&role, node) {
                    (Some(role), NodeId::Step(id)) => graph
                        .step(id)
                        .map(|s| s.group_role == *role)
                        .unwrap_or(false),
                    _ => true,
                })
                .collect();
            let member_set: HashSet<NodeId> = members.iter().copied().collect();

            let mut state = ScopeState {
                needed: members
                    .iter()
                    .map(|&n| (n, graph.incoming_count(n)))
                    .collect(),
                resolved: members.iter().map(|&n| (n, 0)).collect(),
                inbox: HashMap::new(),
                real: HashSet::new(),
                spawned: HashSet::new(),
                finished: HashSet::new(),
                check: members.clone(),
            };

            for entry in graph.entries(scope, &self.config) {
                if !member_set.contains(&entry) {
                    continue;
                }
                let port = match entry {
                    NodeId::Group(_) => GROUP_INPUT_PORT,
                    NodeId::Step(_) => "input",
                };
                state.deliver(entry, port, graph.entry_input(&scope_input));
            }

            let mut join_set: JoinSet<(NodeId, Result<NodeResult, EngineError>)> = JoinSet::new();
            let mut terminal: Vec<(String, Value)> = Vec::new();
            let mut failure: Option<(String, String)> = None;
            let mut cancelled = false;

            self.pump(&mut state, &member_set, &mut join_set);

            while let Some(joined) = join_set.join_next().await {
                let (node, result) = joined
                    .map_err(|e| EngineError::internal(format!("node task panicked: {e}")))?;
                state.finished.insert(node);

                match result {
                    Err(error) => {
                        if failure.is_none() {
                            failure = Some((error.kind().to_string(), error.to_string()));
                        }
                    }
                    Ok(NodeResult::Step(outcome)) => match outcome.status {
                        RunStatus::Cancelled => cancelled = true,
                        RunStatus::Failed => {
                            if failure.is_none() {
                                let (kind, message) = outcome
                                    .error
                                    .as_ref()
                                    .map(|e| (e.kind().to_string(), e.to_string()))
                                    .unwrap_or_else(|| {
                                        ("internal".to_string(), "step failed".to_string())
                                    });
                                failure = Some((kind, message));
                            }
                        }
                        RunStatus::Skipped => {
                            debug!(node = graph.node_name(node), "step skipped; suppressing downstream");
                            for edge in graph.outgoing_edges(node) {
                                if member_set.contains(&edge.target) {
                                    state.resolve_edge_into(edge.target);
                                }
                            }
                        }
                        _ => {
                            let name = graph.node_name(node).to_string();
                            self.run.record_outputs(&name, &outcome.outputs);
                            self.route(
                                node,
                                &outcome.outputs,
                                &outcome.default_port,
                                &member_set,
                                &mut state,
                            );
                            if self.is_terminal_node(node, &member_set) {
                                terminal
                                    .push((name, contribution(&outcome.outputs, &outcome.default_port)));
                            }
                        }
                    },
                    Ok(NodeResult::Group(group_outcome)) => {
                        if group_outcome.cancelled {
                            cancelled = true;
                        } else {
                            let name = graph.node_name(node).to_string();
                            self.run.record_outputs(&name, &group_outcome.outputs);
                            let error_handled = group_outcome.failure.is_none()
                                || graph.outgoing_edges(node).any(|edge| {
                                    member_set.contains(&edge.target)
                                        && edge.source_port.as_deref() == Some("error")
                                });
                            if !error_handled {
                                if failure.is_none() {
                                    failure = group_outcome.failure;
                                }
                            } else {
                                self.route(node, &group_outcome.outputs, "out", &member_set, &mut state);
                                if group_outcome.failure.is_none()
                                    && self.is_terminal_node(node, &member_set)
                                {
                                    terminal.push((name, contribution(&group_outcome.outputs, "out")));
                                }
                            }
                        }
                    }
                }

                if failure.is_none() && !cancelled {
                    self.pump(&mut state, &member_set, &mut join_set);
                }
            }

            if cancelled || self.run.is_cancelled() {
                return Ok(ScopeResult::Cancelled);
            }
            if let Some((kind, message)) = failure {
                return Ok(ScopeResult::Failed { kind, message });
            }

            terminal.sort_by(|a, b| a.0.cmp(&b.0));
            let output = match terminal.len() {
                0 => json!({}),
                1 => terminal.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null),
                _ => Value::Object(terminal.into_iter().collect::<Map<String, Value>>()),
            };
            Ok(ScopeResult::Completed { output })
        }
        .boxed()
    }

    /// Spawn every ready node; cascade suppression through nodes whose
    /// incoming edges all resolved without a delivery.
    fn pump(
        self: &Arc<Self>,
        state: &mut ScopeState,
        member_set: &HashSet<NodeId>,
        join_set: &mut JoinSet<(NodeId, Result<NodeResult, EngineError>)>,
    ) {
        while let Some(node) = state.check.pop() {
            if state.spawned.contains(&node) || state.finished.contains(&node) {
                continue;
            }
            let needed = *state.needed.get(&node).unwrap_or(&0);
            let resolved = *state.resolved.get(&node).unwrap_or(&0);
            if resolved < needed {
                continue;
            }

            if state.real.contains(&node) {
                state.spawned.insert(node);
                let input = assemble_input(state.inbox.remove(&node).unwrap_or_default());
                self.spawn_node(node, input, join_set);
            } else {
                // Every incoming edge was suppressed (or the node is an
                // unreachable orphan): it never runs and no step run is
                // recorded, but its absence must not wedge downstream joins.
                state.finished.insert(node);
                for edge in self.graph.outgoing_edges(node) {
                    if member_set.contains(&edge.target) {
                        state.resolve_edge_into(edge.target);
                    }
                }
            }
        }
    }

    fn spawn_node(
        self: &Arc<Self>,
        node: NodeId,
        input: Value,
        join_set: &mut JoinSet<(NodeId, Result<NodeResult, EngineError>)>,
    ) {
        match node {
            NodeId::Step(id) => {
                let step = match self.graph.step(id) {
                    Some(step) => step.clone(),
                    None => return,
                };
                let driver = self.clone();
                join_set.spawn(async move {
                    // Closed-semaphore errors cannot happen; the pool lives
                    // as long as the run.
                    let _permit = driver.semaphore.clone().acquire_owned().await.ok();
                    let result = driver.executor.execute(&driver.run, &step, input).await;
                    (node, result.map(NodeResult::Step))
                });
            }
            NodeId::Group(id) => {
                let group = match self.graph.group(id) {
                    Some(group) => group.clone(),
                    None => return,
                };
                let driver = self.clone();
                join_set.spawn(async move {
                    let result = driver.run_group(group, input).await;
                    (node, result.map(NodeResult::Group))
                });
            }
        }
    }

    fn route(
        &self,
        node: NodeId,
        outputs: &HashMap<String, Value>,
        default_port: &str,
        member_set: &HashSet<NodeId>,
        state: &mut ScopeState,
    ) {
        for edge in self.graph.outgoing_edges(node) {
            if !member_set.contains(&edge.target) {
                continue;
            }
            let port = edge.source_port.as_deref().unwrap_or(default_port);
            let delivery = outputs.get(port).filter(|value| {
                edge.condition
                    .as_deref()
                    .map_or(true, |cond| condition::evaluate(cond, value))
            });
            if let Some(value) = delivery {
                state.deliver(edge.target, &edge.target_port, value.clone());
            }
            state.resolve_edge_into(edge.target);
        }
    }

    fn is_terminal_node(&self, node: NodeId, member_set: &HashSet<NodeId>) -> bool {
        !self
            .graph
            .outgoing_edges(node)
            .any(|edge| member_set.contains(&edge.target))
    }

    /// Drive one block group to its outcome.
    fn run_group(
        self: Arc<Self>,
        group: BlockGroup,
        input: Value,
    ) -> BoxFuture<'static, Result<GroupOutcome, EngineError>> {
        async move {
            let script_ctx = ScriptContext {
                correlation_id: self.run.correlation_id.clone(),
                step_name: group.name.clone(),
            };

            let input = match &group.pre_script {
                Some(code) => match self.eval_script(code, &input, &group.config, &script_ctx).await {
                    Ok(value) => value,
                    Err(error) => return Ok(group_failure(error)),
                },
                None => input,
            };

            // Group-level deadline: the middle layer between the run bound
            // and per-step timeouts.
            let group_timeout = group
                .config
                .get("timeout_seconds")
                .and_then(Value::as_u64)
                .map(Duration::from_secs);
            let body = async {
                match group.group_type {
                    GroupType::Parallel => self.clone().run_body(&group, input, None).await,
                    GroupType::TryCatch => {
                        self.clone().run_body(&group, input, Some("body".to_string())).await
                    }
                    GroupType::Foreach => self.clone().run_foreach(&group, input).await,
                    GroupType::While => self.clone().run_while(&group, input).await,
                    GroupType::Agent => self.clone().run_agent(&group, input).await,
                }
            };
            let outcome = match group_timeout {
                Some(bound) => match tokio::time::timeout(bound, body).await {
                    Ok(outcome) => outcome?,
                    Err(_) => group_failure(EngineError::timeout(format!(
                        "group '{}' deadline of {}ms exceeded",
                        group.name,
                        bound.as_millis()
                    ))),
                },
                None => body.await?,
            };

            if outcome.cancelled || outcome.failure.is_some() {
                return Ok(outcome);
            }
            let mut outcome = outcome;
            if let Some(code) = &group.post_script {
                let current = outcome.outputs.get("out").cloned().unwrap_or(Value::Null);
                match self.eval_script(code, &current, &group.config, &script_ctx).await {
                    Ok(value) => {
                        outcome.outputs.insert("out".to_string(), value);
                    }
                    Err(error) => return Ok(group_failure(error)),
                }
            }
            Ok(outcome)
        }
        .boxed()
    }

    /// parallel / try_catch: run the body subgraph once. Fan-out comes for
    /// free: every zero-in-degree child is an entry and children execute
    /// concurrently on the worker pool.
    async fn run_body(
        self: Arc<Self>,
        group: &BlockGroup,
        input: Value,
        role: Option<String>,
    ) -> Result<GroupOutcome, EngineError> {
        let result = self
            .clone()
            .run_scope(Some(group.id), input, role)
            .await?;
        Ok(scope_to_group(result))
    }

    async fn run_foreach(
        self: Arc<Self>,
        group: &BlockGroup,
        input: Value,
    ) -> Result<GroupOutcome, EngineError> {
        let config = ForeachConfig::from_config(&group.config);
        let items = match config.items(&input) {
            Ok(items) => items,
            Err(error) => return Ok(group_failure(error)),
        };

        let group_id = group.id;
        let results: Vec<Result<ScopeResult, EngineError>> =
            futures_util::stream::iter(items.into_iter().map(|item| {
                let driver = self.clone();
                async move { driver.run_scope(Some(group_id), item, None).await }
            }))
            .buffered(config.concurrency.max(1))
            .collect()
            .await;

        let mut collected = Vec::with_capacity(results.len());
        for (index, result) in results.into_iter().enumerate() {
            match result? {
                ScopeResult::Completed { output } => collected.push(output),
                ScopeResult::Failed { kind, message } => {
                    return Ok(GroupOutcome {
                        outputs: error_output(&kind, &format!("element {index}: {message}")),
                        failure: Some((kind, format!("element {index}: {message}"))),
                        cancelled: false,
                    });
                }
                ScopeResult::Cancelled => {
                    return Ok(GroupOutcome {
                        outputs: HashMap::new(),
                        failure: None,
                        cancelled: true,
                    });
                }
            }
        }

        let mut outputs = HashMap::new();
        outputs.insert("out".to_string(), Value::Array(collected));
        Ok(GroupOutcome {
            outputs,
            failure: None,
            cancelled: false,
        })
    }

    async fn run_while(
        self: Arc<Self>,
        group: &BlockGroup,
        input: Value,
    ) -> Result<GroupOutcome, EngineError> {
        let config = match WhileConfig::from_config(&group.config) {
            Ok(config) => config,
            Err(error) => return Ok(group_failure(error)),
        };

        let mut last = input;
        let mut iterations: u32 = 0;
        while iterations < config.max_iterations && condition::evaluate(&config.condition, &last) {
            if self.run.is_cancelled() {
                return Ok(GroupOutcome {
                    outputs: HashMap::new(),
                    failure: None,
                    cancelled: true,
                });
            }
            match self
                .clone()
                .run_scope(Some(group.id), last.clone(), None)
                .await?
            {
                ScopeResult::Completed { output } => last = output,
                ScopeResult::Failed { kind, message } => {
                    let message = format!("iteration {iterations}: {message}");
                    return Ok(GroupOutcome {
                        outputs: error_output(&kind, &message),
                        failure: Some((kind, message)),
                        cancelled: false,
                    });
                }
                ScopeResult::Cancelled => {
                    return Ok(GroupOutcome {
                        outputs: HashMap::new(),
                        failure: None,
                        cancelled: true,
                    });
                }
            }
            iterations += 1;
        }

        let mut outputs = HashMap::new();
        outputs.insert("out".to_string(), json!({"result": last, "iterations": iterations}));
        Ok(GroupOutcome {
            outputs,
            failure: None,
            cancelled: false,
        })
    }

    /// agent: expose the body steps as a tool catalog and alternate
    /// reasoning turns with tool invocations until a terminal answer or
    /// the turn cap.
    async fn run_agent(
        self: Arc<Self>,
        group: &BlockGroup,
        input: Value,
    ) -> Result<GroupOutcome, EngineError> {
        let config = AgentConfig::from_config(&group.config);
        let adapter = match self.adapters.get(&config.adapter) {
            Some(adapter) => adapter,
            None => {
                return Ok(group_failure(EngineError::config(format!(
                    "agent group '{}' references unknown adapter '{}'",
                    group.name, config.adapter
                ))));
            }
        };

        let tools: HashMap<String, crate::model::Step> = self
            .graph
            .members_of(Some(group.id))
            .iter()
            .filter_map(|&node| match node {
                NodeId::Step(id) => self.graph.step(id).cloned(),
                NodeId::Group(_) => None,
            })
            .map(|step| (step.name.clone(), step))
            .collect();
        let catalog: Vec<Value> = tools
            .values()
            .map(|step| {
                json!({
                    "name": step.name,
                    "type": step.step_type,
                    "description": step
                        .config
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or(""),
                })
            })
            .collect();

        let mut transcript: Vec<Value> = Vec::new();
        for turn in 0..config.max_turns {
            if self.run.is_cancelled() {
                return Ok(GroupOutcome {
                    outputs: HashMap::new(),
                    failure: None,
                    cancelled: true,
                });
            }

            let ectx = self.run.execution_context(None);
            let request = AdapterRequest {
                config: config.llm.clone(),
                input: json!({
                    "goal": input,
                    "tools": catalog,
                    "transcript": transcript,
                    "turn": turn,
                }),
                correlation_id: self.run.correlation_id.clone(),
                timeout_ms: ectx.timeout_ms(),
                metadata: HashMap::new(),
            };
            let response = match adapter.execute(&ectx, request).await {
                Ok(response) => response,
                Err(EngineError::Cancelled) => {
                    return Ok(GroupOutcome {
                        outputs: HashMap::new(),
                        failure: None,
                        cancelled: true,
                    });
                }
                Err(error) => return Ok(group_failure(error)),
            };

            let decision = &response.output;
            if let Some(answer) = decision.get("answer") {
                let mut outputs = HashMap::new();
                outputs.insert(
                    "out".to_string(),
                    json!({"answer": answer, "turns": turn + 1, "transcript": transcript}),
                );
                return Ok(GroupOutcome {
                    outputs,
                    failure: None,
                    cancelled: false,
                });
            }

            let tool_name = match decision.get("tool").and_then(Value::as_str) {
                Some(name) => name.to_string(),
                None => {
                    return Ok(group_failure(EngineError::protocol(
                        config.adapter.clone(),
                        "agent decision must carry either 'answer' or 'tool'",
                    )));
                }
            };
            let tool_input = decision.get("input").cloned().unwrap_or(Value::Null);
            let step = match tools.get(&tool_name) {
                Some(step) => step.clone(),
                None => {
                    return Ok(group_failure(EngineError::validation(format!(
                        "agent requested unknown tool '{tool_name}'"
                    ))));
                }
            };

            let outcome = self.executor.execute(&self.run, &step, tool_input.clone()).await?;
            match outcome.status {
                RunStatus::Cancelled => {
                    return Ok(GroupOutcome {
                        outputs: HashMap::new(),
                        failure: None,
                        cancelled: true,
                    });
                }
                RunStatus::Completed => {
                    let result = contribution(&outcome.outputs, &outcome.default_port);
                    transcript.push(json!({
                        "tool": tool_name,
                        "input": tool_input,
                        "output": result,
                    }));
                }
                _ => {
                    let message = outcome
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "tool step failed".to_string());
                    transcript.push(json!({
                        "tool": tool_name,
                        "input": tool_input,
                        "error": message,
                    }));
                }
            }
        }

        Ok(group_failure(EngineError::internal(format!(
            "agent group '{}' exhausted {} turns without a terminal answer",
            group.name, config.max_turns
        ))))
    }

    async fn eval_script(
        &self,
        code: &str,
        input: &Value,
        config: &Value,
        ctx: &ScriptContext,
    ) -> Result<Value, EngineError> {
        let host = self.script_host.as_ref().ok_or_else(|| {
            EngineError::config("group declares a script but no script host is configured")
        })?;
        host.evaluate(code, input, config, ctx).await
    }
}

fn scope_to_group(result: ScopeResult) -> GroupOutcome {
    match result {
        ScopeResult::Completed { output } => {
            let mut outputs = HashMap::new();
            outputs.insert("out".to_string(), output);
            GroupOutcome {
                outputs,
                failure: None,
                cancelled: false,
            }
        }
        ScopeResult::Failed { kind, message } => GroupOutcome {
            outputs: error_output(&kind, &message),
            failure: Some((kind, message)),
            cancelled: false,
        },
        ScopeResult::Cancelled => GroupOutcome {
            outputs: HashMap::new(),
            failure: None,
            cancelled: true,
        },
    }
}

fn group_failure(error: EngineError) -> GroupOutcome {
    GroupOutcome {
        outputs: error_output(error.kind(), &error.to_string()),
        failure: Some((error.kind().to_string(), error.to_string())),
        cancelled: false,
    }
}

fn error_output(kind: &str, message: &str) -> HashMap<String, Value> {
    let mut outputs = HashMap::new();
    outputs.insert("error".to_string(), json!({"kind": kind, "message": message}));
    outputs
}

/// Collapse a delivered port map into the executor's input payload: a
/// single delivered port passes its value straight through, a multi-port
/// join is keyed by port name.
fn assemble_input(ports: HashMap<String, Value>) -> Value {
    match ports.len() {
        0 => json!({}),
        1 => ports.into_values().next().unwrap_or(Value::Null),
        _ => Value::Object(ports.into_iter().collect()),
    }
}

/// Reduce a port map to the value a terminal node contributes to its
/// scope's aggregate output.
fn contribution(outputs: &HashMap<String, Value>, default_port: &str) -> Value {
    if let Some(value) = outputs.get(default_port) {
        return value.clone();
    }
    if outputs.len() == 1 {
        return outputs.values().next().cloned().unwrap_or(Value::Null);
    }
    Value::Object(
        outputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assemble_input_collapses_single_port() {
        let mut ports = HashMap::new();
        ports.insert("input".to_string(), json!({"a": 1}));
        assert_eq!(assemble_input(ports), json!({"a": 1}));

        let mut ports = HashMap::new();
        ports.insert("left".to_string(), json!(1));
        ports.insert("right".to_string(), json!(2));
        assert_eq!(assemble_input(ports), json!({"left": 1, "right": 2}));

        assert_eq!(assemble_input(HashMap::new()), json!({}));
    }

    #[test]
    fn contribution_prefers_default_port() {
        let mut outputs = HashMap::new();
        outputs.insert("out".to_string(), json!("main"));
        outputs.insert("error".to_string(), json!("side"));
        assert_eq!(contribution(&outputs, "out"), json!("main"));

        let mut outputs = HashMap::new();
        outputs.insert("true".to_string(), json!({"go": 1}));
        assert_eq!(contribution(&outputs, "out"), json!({"go": 1}));
    }
}
