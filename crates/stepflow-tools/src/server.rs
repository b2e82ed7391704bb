//! The engine tool server: named tools over the repository contracts.

use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use stepflow_core::error::EngineError;
use stepflow_core::model::{BlockCategory, Edge, RunStatus, Step, WorkflowStatus};
use stepflow_core::repo::{
    BlockDefinitionRepo, BlockFilter, EdgeRepo, RunRepo, RunFilter, StepRepo, WorkflowRepo,
};
use stepflow_core::resolver::BlockResolver;

use crate::docs;
use crate::types::{ToolDefinition, ToolResult};

/// Tool host over the engine's persistence contracts. One instance serves
/// every copilot session.
pub struct EngineToolServer {
    blocks: Arc<dyn BlockDefinitionRepo>,
    workflows: Arc<dyn WorkflowRepo>,
    steps: Arc<dyn StepRepo>,
    edges: Arc<dyn EdgeRepo>,
    runs: Arc<dyn RunRepo>,
    resolver: Arc<BlockResolver>,
}

impl EngineToolServer {
    pub fn new(
        blocks: Arc<dyn BlockDefinitionRepo>,
        workflows: Arc<dyn WorkflowRepo>,
        steps: Arc<dyn StepRepo>,
        edges: Arc<dyn EdgeRepo>,
        runs: Arc<dyn RunRepo>,
        resolver: Arc<BlockResolver>,
    ) -> Self {
        Self {
            blocks,
            workflows,
            steps,
            edges,
            runs,
            resolver,
        }
    }

    /// The declared tool set, in the order the copilot lists it.
    pub fn tool_definitions() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "list_blocks",
                "List available block definitions, optionally filtered by category or search text",
                json!({
                    "type": "object",
                    "properties": {
                        "category": {"enum": ["ai", "flow", "data", "apps", "custom"]},
                        "search": {"type": "string"}
                    }
                }),
            ),
            ToolDefinition::new(
                "get_block_schema",
                "Full schema surface of one block: config schema, defaults, and inherited ports",
                json!({
                    "type": "object",
                    "properties": {"slug": {"type": "string"}},
                    "required": ["slug"]
                }),
            ),
            ToolDefinition::new(
                "search_blocks",
                "Free-text search over block slugs, names, and descriptions",
                json!({
                    "type": "object",
                    "properties": {"query": {"type": "string"}},
                    "required": ["query"]
                }),
            ),
            ToolDefinition::new(
                "list_workflows",
                "List workflows, optionally filtered by status",
                json!({
                    "type": "object",
                    "properties": {
                        "status": {"enum": ["draft", "published", "archived"]},
                        "limit": {"type": "integer"}
                    }
                }),
            ),
            ToolDefinition::new(
                "get_workflow",
                "One workflow joined with its steps, edges, and groups",
                json!({
                    "type": "object",
                    "properties": {"workflow_id": {"type": "string"}},
                    "required": ["workflow_id"]
                }),
            ),
            ToolDefinition::new(
                "get_workflow_runs",
                "Recent runs of a workflow, newest first",
                json!({
                    "type": "object",
                    "properties": {
                        "workflow_id": {"type": "string"},
                        "status": {"enum": ["pending", "running", "completed", "failed", "cancelled", "skipped"]},
                        "limit": {"type": "integer"}
                    },
                    "required": ["workflow_id"]
                }),
            ),
            ToolDefinition::new(
                "search_documentation",
                "Search the engine documentation index",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "topic": {"type": "string"}
                    },
                    "required": ["query"]
                }),
            ),
            ToolDefinition::new(
                "diagnose_workflow",
                "Structural findings for a workflow: dangling references, unknown ports, unreachable steps",
                json!({
                    "type": "object",
                    "properties": {
                        "workflow_id": {"type": "string"},
                        "focus": {"type": "string"}
                    },
                    "required": ["workflow_id"]
                }),
            ),
            ToolDefinition::new(
                "create_step",
                "Add a step to a workflow",
                json!({
                    "type": "object",
                    "properties": {
                        "workflow_id": {"type": "string"},
                        "name": {"type": "string"},
                        "step_type": {"type": "string"},
                        "config": {"type": "object"}
                    },
                    "required": ["workflow_id", "name", "step_type"]
                }),
            ),
            ToolDefinition::new(
                "update_step",
                "Update a step's name or config",
                json!({
                    "type": "object",
                    "properties": {
                        "step_id": {"type": "string"},
                        "name": {"type": "string"},
                        "config": {"type": "object"}
                    },
                    "required": ["step_id"]
                }),
            ),
            ToolDefinition::new(
                "delete_step",
                "Delete a step and every edge touching it",
                json!({
                    "type": "object",
                    "properties": {"step_id": {"type": "string"}},
                    "required": ["step_id"]
                }),
            ),
            ToolDefinition::new(
                "create_edge",
                "Connect two steps, validating ports against the blocks' inherited surfaces",
                json!({
                    "type": "object",
                    "properties": {
                        "workflow_id": {"type": "string"},
                        "source_step_id": {"type": "string"},
                        "target_step_id": {"type": "string"},
                        "source_port": {"type": "string"},
                        "target_port": {"type": "string"},
                        "condition": {"type": "string"}
                    },
                    "required": ["workflow_id", "source_step_id", "target_step_id"]
                }),
            ),
            ToolDefinition::new(
                "delete_edge",
                "Delete one edge",
                json!({
                    "type": "object",
                    "properties": {"edge_id": {"type": "string"}},
                    "required": ["edge_id"]
                }),
            ),
            ToolDefinition::new(
                "validate_workflow",
                "Pass/fail structural validation of a workflow",
                json!({
                    "type": "object",
                    "properties": {"workflow_id": {"type": "string"}},
                    "required": ["workflow_id"]
                }),
            ),
        ]
    }

    /// Dispatch one tool call. Unknown tools and all failures come back as
    /// tool-result errors, never as `Err`.
    pub async fn dispatch(&self, name: &str, args: Value) -> ToolResult {
        debug!(tool = name, "dispatching tool call");
        let result = match name {
            "list_blocks" => self.list_blocks(&args).await,
            "get_block_schema" => self.get_block_schema(&args).await,
            "search_blocks" => self.search_blocks(&args).await,
            "list_workflows" => self.list_workflows(&args).await,
            "get_workflow" => self.get_workflow(&args).await,
            "get_workflow_runs" => self.get_workflow_runs(&args).await,
            "search_documentation" => self.search_documentation(&args),
            "diagnose_workflow" => self.diagnose_workflow(&args).await,
            "create_step" => self.create_step(&args).await,
            "update_step" => self.update_step(&args).await,
            "delete_step" => self.delete_step(&args).await,
            "create_edge" => self.create_edge(&args).await,
            "delete_edge" => self.delete_edge(&args).await,
            "validate_workflow" => self.validate_workflow(&args).await,
            other => Err(format!("unknown tool '{other}'")),
        };
        match result {
            Ok(content) => ToolResult::success(content),
            Err(message) => ToolResult::error(message),
        }
    }

    async fn list_blocks(&self, args: &Value) -> Result<Value, String> {
        let category = match args.get("category").and_then(Value::as_str) {
            Some(raw) => Some(parse_category(raw)?),
            None => None,
        };
        let filter = BlockFilter {
            category,
            search: args.get("search").and_then(Value::as_str).map(str::to_string),
            enabled_only: true,
        };
        let blocks = self.blocks.list(None, filter).await.map_err(stringify)?;
        Ok(json!(blocks
            .iter()
            .map(|b| {
                json!({
                    "slug": b.slug,
                    "name": b.name,
                    "description": b.description,
                    "category": b.category,
                    "version": b.version,
                    "parent_slug": b.parent_slug,
                })
            })
            .collect::<Vec<_>>()))
    }

    async fn get_block_schema(&self, args: &Value) -> Result<Value, String> {
        let slug = str_arg(args, "slug")?;
        let block = self
            .blocks
            .get_by_slug(None, slug)
            .await
            .map_err(stringify)?
            .ok_or_else(|| format!("block '{slug}' not found"))?;
        let effective = self.resolver.resolve(None, slug).await.map_err(stringify)?;
        Ok(json!({
            "slug": block.slug,
            "name": effective.name,
            "version": block.version,
            "config_schema": block.config_schema,
            "output_schema": block.output_schema,
            "config_defaults": effective.config_defaults,
            "inputs": effective.inputs,
            "outputs": effective.outputs,
            "required_credentials": effective.required_credentials,
        }))
    }

    async fn search_blocks(&self, args: &Value) -> Result<Value, String> {
        let query = str_arg(args, "query")?;
        let filter = BlockFilter {
            category: None,
            search: Some(query.to_string()),
            enabled_only: false,
        };
        let blocks = self.blocks.list(None, filter).await.map_err(stringify)?;
        Ok(json!(blocks
            .iter()
            .map(|b| json!({"slug": b.slug, "name": b.name, "description": b.description}))
            .collect::<Vec<_>>()))
    }

    async fn list_workflows(&self, args: &Value) -> Result<Value, String> {
        let status = match args.get("status").and_then(Value::as_str) {
            Some(raw) => Some(parse_workflow_status(raw)?),
            None => None,
        };
        let mut workflows = self.workflows.list(None, status).await.map_err(stringify)?;
        if let Some(limit) = args.get("limit").and_then(Value::as_u64) {
            workflows.truncate(limit as usize);
        }
        Ok(json!(workflows
            .iter()
            .map(|w| {
                json!({
                    "id": w.id,
                    "name": w.name,
                    "status": w.status,
                    "version": w.version,
                    "system_slug": w.system_slug,
                })
            })
            .collect::<Vec<_>>()))
    }

    async fn get_workflow(&self, args: &Value) -> Result<Value, String> {
        let id = uuid_arg(args, "workflow_id")?;
        let graph = self
            .workflows
            .get_with_graph(id)
            .await
            .map_err(stringify)?
            .ok_or_else(|| format!("workflow {id} not found"))?;
        Ok(json!({
            "workflow": graph.workflow,
            "steps": graph.steps,
            "edges": graph.edges,
            "groups": graph.groups,
        }))
    }

    async fn get_workflow_runs(&self, args: &Value) -> Result<Value, String> {
        let id = uuid_arg(args, "workflow_id")?;
        let status = match args.get("status").and_then(Value::as_str) {
            Some(raw) => Some(parse_run_status(raw)?),
            None => None,
        };
        let filter = RunFilter {
            status,
            limit: args.get("limit").and_then(Value::as_u64).map(|l| l as usize),
        };
        let runs = self
            .runs
            .list_by_workflow(id, filter)
            .await
            .map_err(stringify)?;
        Ok(json!(runs))
    }

    fn search_documentation(&self, args: &Value) -> Result<Value, String> {
        let query = str_arg(args, "query")?;
        let topic = args.get("topic").and_then(Value::as_str);
        Ok(json!(docs::search(query, topic)))
    }

    async fn diagnose_workflow(&self, args: &Value) -> Result<Value, String> {
        let id = uuid_arg(args, "workflow_id")?;
        let focus = args.get("focus").and_then(Value::as_str);
        let findings = self.collect_findings(id).await?;
        let findings: Vec<Value> = match focus {
            Some(focus) => findings
                .into_iter()
                .filter(|f| f["area"] == focus)
                .collect(),
            None => findings,
        };
        Ok(json!({"findings": findings}))
    }

    async fn validate_workflow(&self, args: &Value) -> Result<Value, String> {
        let id = uuid_arg(args, "workflow_id")?;
        let findings = self.collect_findings(id).await?;
        Ok(json!({"valid": findings.is_empty(), "errors": findings}))
    }

    /// Structural checks shared by diagnose and validate.
    async fn collect_findings(&self, workflow_id: Uuid) -> Result<Vec<Value>, String> {
        let graph = self
            .workflows
            .get_with_graph(workflow_id)
            .await
            .map_err(stringify)?
            .ok_or_else(|| format!("workflow {workflow_id} not found"))?;

        let mut findings = Vec::new();

        // Unknown block slugs and port surfaces.
        for step in &graph.steps {
            if let Err(error) = self.resolver.resolve(None, &step.step_type).await {
                findings.push(json!({
                    "area": "blocks",
                    "step": step.name,
                    "message": format!("step '{}': {error}", step.name),
                }));
            }
        }

        // Edge endpoint integrity and port existence.
        let step_ids: HashSet<Uuid> = graph.steps.iter().map(|s| s.id).collect();
        let group_ids: HashSet<Uuid> = graph.groups.iter().map(|g| g.id).collect();
        for edge in &graph.edges {
            if !edge.endpoints_valid() {
                findings.push(json!({
                    "area": "edges",
                    "edge": edge.id,
                    "message": format!("edge {} must have exactly one source and one target", edge.id),
                }));
                continue;
            }
            if let Some(source) = edge.source_step_id {
                if !step_ids.contains(&source) {
                    findings.push(json!({
                        "area": "edges",
                        "edge": edge.id,
                        "message": format!("edge {} references unknown source step", edge.id),
                    }));
                } else if !edge.source_port.is_empty() {
                    let step = graph.steps.iter().find(|s| s.id == source).expect("checked");
                    if let Ok(effective) = self.resolver.resolve(None, &step.step_type).await {
                        if !effective.has_output_port(&edge.source_port) {
                            findings.push(json!({
                                "area": "ports",
                                "edge": edge.id,
                                "message": format!(
                                    "output port '{}' does not exist on block '{}'",
                                    edge.source_port, step.step_type
                                ),
                            }));
                        }
                    }
                }
            }
            if let Some(target) = edge.target_step_id {
                if !step_ids.contains(&target) {
                    findings.push(json!({
                        "area": "edges",
                        "edge": edge.id,
                        "message": format!("edge {} references unknown target step", edge.id),
                    }));
                }
            }
            if let Some(group) = edge.target_group_id {
                if !group_ids.contains(&group) {
                    findings.push(json!({
                        "area": "edges",
                        "edge": edge.id,
                        "message": format!("edge {} references unknown target group", edge.id),
                    }));
                }
            }
        }

        // Reachability from entry steps.
        let entries: Vec<Uuid> = graph
            .steps
            .iter()
            .filter(|s| s.trigger_type.is_some() || s.step_type == "start")
            .map(|s| s.id)
            .collect();
        if entries.is_empty() && !graph.steps.is_empty() {
            findings.push(json!({
                "area": "structure",
                "message": "workflow has no entry step",
            }));
        } else {
            let mut reachable: HashSet<Uuid> = entries.iter().copied().collect();
            let mut frontier: Vec<Uuid> = entries;
            while let Some(node) = frontier.pop() {
                for edge in &graph.edges {
                    if edge.source_step_id == Some(node) || edge.source_group_id == Some(node) {
                        for next in [edge.target_step_id, edge.target_group_id].into_iter().flatten() {
                            if reachable.insert(next) {
                                frontier.push(next);
                            }
                        }
                    }
                }
            }
            // Steps inside groups are driven by their group, not by edges.
            for step in graph.steps.iter().filter(|s| s.block_group_id.is_none()) {
                if !reachable.contains(&step.id) {
                    findings.push(json!({
                        "area": "structure",
                        "step": step.name,
                        "message": format!("step '{}' is unreachable from the entry", step.name),
                    }));
                }
            }
        }

        Ok(findings)
    }

    async fn create_step(&self, args: &Value) -> Result<Value, String> {
        let workflow_id = uuid_arg(args, "workflow_id")?;
        let name = str_arg(args, "name")?;
        let step_type = str_arg(args, "step_type")?;

        self.workflows
            .get_by_id(workflow_id)
            .await
            .map_err(stringify)?
            .ok_or_else(|| format!("workflow {workflow_id} not found"))?;
        // The slug must resolve before the step is worth persisting.
        self.resolver
            .resolve(None, step_type)
            .await
            .map_err(stringify)?;

        let mut step = Step::new(workflow_id, name, step_type);
        if let Some(config) = args.get("config") {
            step.config = config.clone();
        }
        self.steps.create(&step).await.map_err(stringify)?;
        Ok(json!({"step_id": step.id, "name": step.name}))
    }

    async fn update_step(&self, args: &Value) -> Result<Value, String> {
        let step_id = uuid_arg(args, "step_id")?;
        let mut step = self
            .steps
            .get_by_id(step_id)
            .await
            .map_err(stringify)?
            .ok_or_else(|| format!("step {step_id} not found"))?;
        if let Some(name) = args.get("name").and_then(Value::as_str) {
            step.name = name.to_string();
        }
        if let Some(config) = args.get("config") {
            step.config = config.clone();
        }
        self.steps.update(&step).await.map_err(stringify)?;
        Ok(json!({"step_id": step.id, "name": step.name}))
    }

    async fn delete_step(&self, args: &Value) -> Result<Value, String> {
        let step_id = uuid_arg(args, "step_id")?;
        let step = self
            .steps
            .get_by_id(step_id)
            .await
            .map_err(stringify)?
            .ok_or_else(|| format!("step {step_id} not found"))?;

        // Edges touching the step go with it.
        let edges = self
            .edges
            .list_by_workflow(step.workflow_id)
            .await
            .map_err(stringify)?;
        let mut removed_edges = 0;
        for edge in edges {
            if edge.source_step_id == Some(step_id) || edge.target_step_id == Some(step_id) {
                self.edges.delete(edge.id).await.map_err(stringify)?;
                removed_edges += 1;
            }
        }
        self.steps.delete(step_id).await.map_err(stringify)?;
        Ok(json!({"deleted": step_id, "removed_edges": removed_edges}))
    }

    async fn create_edge(&self, args: &Value) -> Result<Value, String> {
        let workflow_id = uuid_arg(args, "workflow_id")?;
        let source_id = uuid_arg(args, "source_step_id")?;
        let target_id = uuid_arg(args, "target_step_id")?;

        let source = self
            .steps
            .get_by_id(source_id)
            .await
            .map_err(stringify)?
            .ok_or_else(|| format!("source step {source_id} not found"))?;
        let target = self
            .steps
            .get_by_id(target_id)
            .await
            .map_err(stringify)?
            .ok_or_else(|| format!("target step {target_id} not found"))?;

        let mut edge = Edge::between_steps(workflow_id, source.id, target.id);
        if let Some(port) = args.get("source_port").and_then(Value::as_str) {
            let effective = self
                .resolver
                .resolve(None, &source.step_type)
                .await
                .map_err(stringify)?;
            if !effective.has_output_port(port) {
                return Err(format!(
                    "output port '{port}' does not exist on block '{}'",
                    source.step_type
                ));
            }
            edge.source_port = port.to_string();
        }
        if let Some(port) = args.get("target_port").and_then(Value::as_str) {
            let effective = self
                .resolver
                .resolve(None, &target.step_type)
                .await
                .map_err(stringify)?;
            if !effective.has_input_port(port) {
                return Err(format!(
                    "input port '{port}' does not exist on block '{}'",
                    target.step_type
                ));
            }
            edge.target_port = port.to_string();
        }
        if let Some(condition) = args.get("condition").and_then(Value::as_str) {
            edge.condition = Some(condition.to_string());
        }
        self.edges.create(&edge).await.map_err(stringify)?;
        Ok(json!({"edge_id": edge.id}))
    }

    async fn delete_edge(&self, args: &Value) -> Result<Value, String> {
        let edge_id = uuid_arg(args, "edge_id")?;
        self.edges
            .get_by_id(edge_id)
            .await
            .map_err(stringify)?
            .ok_or_else(|| format!("edge {edge_id} not found"))?;
        self.edges.delete(edge_id).await.map_err(stringify)?;
        Ok(json!({"deleted": edge_id}))
    }
}

fn stringify(error: EngineError) -> String {
    error.to_string()
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("missing required argument '{key}'"))
}

fn uuid_arg(args: &Value, key: &str) -> Result<Uuid, String> {
    str_arg(args, key)?
        .parse()
        .map_err(|_| format!("argument '{key}' must be a UUID"))
}

fn parse_category(raw: &str) -> Result<BlockCategory, String> {
    serde_json::from_value(Value::String(raw.to_string()))
        .map_err(|_| format!("unknown category '{raw}'"))
}

fn parse_workflow_status(raw: &str) -> Result<WorkflowStatus, String> {
    serde_json::from_value(Value::String(raw.to_string()))
        .map_err(|_| format!("unknown workflow status '{raw}'"))
}

fn parse_run_status(raw: &str) -> Result<RunStatus, String> {
    serde_json::from_value(Value::String(raw.to_string()))
        .map_err(|_| format!("unknown run status '{raw}'"))
}
