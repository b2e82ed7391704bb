//! Workflow and project seed migration.
//!
//! Seeds reference steps and groups by temp keys; migration creates groups
//! first (two passes, so parents can be wired from the key→id map), then
//! steps (resolving block slugs to definition ids), then edges (validating
//! every port against the inherited port surface of its block). Updates
//! delete edges, steps, and groups in that order and recreate from seed —
//! simpler than a field-wise diff and guaranteed consistent. Only
//! system-owned workflows are ever touched.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use stepflow_core::error::EngineError;
use stepflow_core::model::{
    BlockGroup, Edge, GroupType, Position, Step, TriggerType, Workflow, WorkflowStatus,
    GROUP_INPUT_PORT,
};
use stepflow_core::repo::{
    BlockDefinitionRepo, BlockGroupRepo, EdgeRepo, StepRepo, WorkflowRepo,
};
use stepflow_core::resolver::BlockResolver;

use crate::{MigrationAction, MigrationReport};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSeed {
    /// Temp id, unique within the seed
    pub key: String,
    pub name: String,
    pub step_type: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub position: Position,
    /// Temp key of the containing group
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub trigger: Option<TriggerType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSeed {
    pub key: String,
    pub name: String,
    pub group_type: GroupType,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub pre_script: Option<String>,
    #[serde(default)]
    pub post_script: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSeed {
    /// Temp key of the source step or group
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub source_port: Option<String>,
    #[serde(default)]
    pub target_port: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSeed {
    /// System slug; migration matches persisted workflows on this
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_status")]
    pub status: WorkflowStatus,
    #[serde(default = "default_version")]
    pub version: i32,
    #[serde(default)]
    pub input_schema: Value,
    #[serde(default)]
    pub output_schema: Value,
    #[serde(default)]
    pub steps: Vec<StepSeed>,
    #[serde(default)]
    pub groups: Vec<GroupSeed>,
    #[serde(default)]
    pub edges: Vec<EdgeSeed>,
}

fn default_status() -> WorkflowStatus {
    WorkflowStatus::Published
}

fn default_version() -> i32 {
    1
}

/// Projects share the workflow container shape; the same migrator serves
/// both seed kinds.
pub type ProjectMigrator = WorkflowMigrator;

pub struct WorkflowMigrator {
    workflows: Arc<dyn WorkflowRepo>,
    steps: Arc<dyn StepRepo>,
    edges: Arc<dyn EdgeRepo>,
    groups: Arc<dyn BlockGroupRepo>,
    blocks: Arc<dyn BlockDefinitionRepo>,
    resolver: Arc<BlockResolver>,
}

impl WorkflowMigrator {
    pub fn new(
        workflows: Arc<dyn WorkflowRepo>,
        steps: Arc<dyn StepRepo>,
        edges: Arc<dyn EdgeRepo>,
        groups: Arc<dyn BlockGroupRepo>,
        blocks: Arc<dyn BlockDefinitionRepo>,
        resolver: Arc<BlockResolver>,
    ) -> Self {
        Self {
            workflows,
            steps,
            edges,
            groups,
            blocks,
            resolver,
        }
    }

    pub async fn migrate(&self, seeds: &[WorkflowSeed]) -> Result<MigrationReport, EngineError> {
        let mut report = MigrationReport::default();
        for seed in seeds {
            let action = self.migrate_one(seed).await?;
            report.push(seed.slug.clone(), action);
        }
        info!(
            created = report.created(),
            updated = report.updated(),
            unchanged = report.unchanged(),
            "workflow seed migration finished"
        );
        Ok(report)
    }

    async fn migrate_one(&self, seed: &WorkflowSeed) -> Result<MigrationAction, EngineError> {
        self.validate(seed).await?;

        match self.workflows.get_by_system_slug(None, &seed.slug).await? {
            None => {
                let workflow = self.build_workflow(seed, None).await?;
                self.workflows.create(&workflow).await?;
                self.create_rows(seed, &workflow).await?;
                debug!(slug = %seed.slug, "created seed workflow");
                Ok(MigrationAction::Created)
            }
            Some(existing) => {
                if existing.version == seed.version {
                    return Ok(MigrationAction::Unchanged);
                }
                // Delete-and-recreate: edges first so nothing dangles, then
                // steps, then groups.
                self.edges.delete_by_workflow(existing.id).await?;
                self.steps.delete_by_workflow(existing.id).await?;
                self.groups.delete_by_workflow(existing.id).await?;

                let mut workflow = self.build_workflow(seed, Some(existing.id)).await?;
                workflow.created_at = existing.created_at;
                self.workflows.update(&workflow).await?;
                self.create_rows(seed, &workflow).await?;
                debug!(slug = %seed.slug, version = seed.version, "recreated seed workflow");
                Ok(MigrationAction::Updated)
            }
        }
    }

    /// Temp-key and port validation over the whole seed before any write.
    async fn validate(&self, seed: &WorkflowSeed) -> Result<(), EngineError> {
        let mut step_keys: HashMap<&str, &StepSeed> = HashMap::new();
        for step in &seed.steps {
            if step_keys.insert(step.key.as_str(), step).is_some() {
                return Err(EngineError::validation(format!(
                    "workflow seed '{}' repeats step key '{}'",
                    seed.slug, step.key
                )));
            }
        }
        let mut group_keys: HashMap<&str, &GroupSeed> = HashMap::new();
        for group in &seed.groups {
            if step_keys.contains_key(group.key.as_str())
                || group_keys.insert(group.key.as_str(), group).is_some()
            {
                return Err(EngineError::validation(format!(
                    "workflow seed '{}' repeats key '{}'",
                    seed.slug, group.key
                )));
            }
            if let Some(parent) = &group.parent {
                if !seed.groups.iter().any(|g| &g.key == parent) {
                    return Err(EngineError::validation(format!(
                        "group '{}' references unknown parent '{}'",
                        group.key, parent
                    )));
                }
            }
        }
        for step in &seed.steps {
            if let Some(group) = &step.group {
                if !group_keys.contains_key(group.as_str()) {
                    return Err(EngineError::validation(format!(
                        "step '{}' references unknown group '{}'",
                        step.key, group
                    )));
                }
            }
        }

        for edge in &seed.edges {
            // Source port must exist among the source block's inherited
            // outputs; a group source emits on `out`/`error`.
            match (step_keys.get(edge.source.as_str()), group_keys.get(edge.source.as_str())) {
                (Some(step), _) => {
                    if let Some(port) = edge.source_port.as_deref().filter(|p| !p.is_empty()) {
                        let effective = self.resolver.resolve(None, &step.step_type).await?;
                        if !effective.has_output_port(port) {
                            return Err(EngineError::validation(format!(
                                "edge source port '{port}' does not exist on block '{}'",
                                step.step_type
                            )));
                        }
                    }
                }
                (None, Some(_)) => {
                    if let Some(port) = edge.source_port.as_deref() {
                        if port != "out" && port != "error" {
                            return Err(EngineError::validation(format!(
                                "edge source port '{port}' does not exist on group '{}'",
                                edge.source
                            )));
                        }
                    }
                }
                (None, None) => {
                    return Err(EngineError::validation(format!(
                        "edge references unknown source '{}'",
                        edge.source
                    )));
                }
            }

            match (step_keys.get(edge.target.as_str()), group_keys.get(edge.target.as_str())) {
                (Some(step), _) => {
                    let port = edge.target_port.as_deref().unwrap_or("input");
                    let effective = self.resolver.resolve(None, &step.step_type).await?;
                    if !effective.has_input_port(port) {
                        return Err(EngineError::validation(format!(
                            "edge target port '{port}' does not exist on block '{}'",
                            step.step_type
                        )));
                    }
                }
                (None, Some(_)) => {
                    if let Some(port) = edge.target_port.as_deref() {
                        if port != GROUP_INPUT_PORT {
                            return Err(EngineError::validation(format!(
                                "edges into groups use the reserved '{GROUP_INPUT_PORT}' port, got '{port}'"
                            )));
                        }
                    }
                }
                (None, None) => {
                    return Err(EngineError::validation(format!(
                        "edge references unknown target '{}'",
                        edge.target
                    )));
                }
            }
        }
        Ok(())
    }

    async fn build_workflow(
        &self,
        seed: &WorkflowSeed,
        existing_id: Option<Uuid>,
    ) -> Result<Workflow, EngineError> {
        let mut workflow = Workflow::new(None, seed.name.clone());
        if let Some(id) = existing_id {
            workflow.id = id;
        }
        workflow.description = seed.description.clone();
        workflow.status = seed.status;
        workflow.version = seed.version;
        workflow.system_slug = Some(seed.slug.clone());
        workflow.output_schema = seed.output_schema.clone();
        workflow.input_schema = self.derive_input_schema(seed).await?;
        Ok(workflow)
    }

    /// Prefer the input-port schema of the first non-start step reachable
    /// from the start step; fall back to the seed's declared schema.
    async fn derive_input_schema(&self, seed: &WorkflowSeed) -> Result<Value, EngineError> {
        let start = seed
            .steps
            .iter()
            .find(|s| s.trigger.is_some() || s.step_type == "start");
        let first = start.and_then(|start| {
            seed.edges
                .iter()
                .find(|e| e.source == start.key)
                .and_then(|e| seed.steps.iter().find(|s| s.key == e.target))
        });

        if let Some(step) = first {
            let effective = self.resolver.resolve(None, &step.step_type).await?;
            if let Some(port) = effective.input_port("input") {
                if !port.schema.is_null() {
                    return Ok(port.schema.clone());
                }
            }
        }
        Ok(seed.input_schema.clone())
    }

    async fn create_rows(&self, seed: &WorkflowSeed, workflow: &Workflow) -> Result<(), EngineError> {
        // Groups, pass one: create with parents unset.
        let mut group_ids: HashMap<&str, Uuid> = HashMap::new();
        let mut created_groups: Vec<BlockGroup> = Vec::new();
        for group_seed in &seed.groups {
            let mut group = BlockGroup::new(workflow.id, group_seed.name.clone(), group_seed.group_type);
            group.config = group_seed.config.clone();
            group.pre_script = group_seed.pre_script.clone();
            group.post_script = group_seed.post_script.clone();
            self.groups.create(&group).await?;
            group_ids.insert(group_seed.key.as_str(), group.id);
            created_groups.push(group);
        }
        // Pass two: wire parent references from the key→id map.
        for (group_seed, group) in seed.groups.iter().zip(created_groups.iter_mut()) {
            if let Some(parent_key) = &group_seed.parent {
                group.parent_group_id = group_ids.get(parent_key.as_str()).copied();
                self.groups.update(group).await?;
            }
        }

        let mut step_ids: HashMap<&str, Uuid> = HashMap::new();
        for step_seed in &seed.steps {
            let mut step = Step::new(workflow.id, step_seed.name.clone(), step_seed.step_type.clone());
            step.config = step_seed.config.clone();
            step.position = step_seed.position;
            step.trigger_type = step_seed.trigger;
            if let Some(role) = &step_seed.role {
                step.group_role = role.clone();
            }
            if let Some(group_key) = &step_seed.group {
                step.block_group_id = group_ids.get(group_key.as_str()).copied();
            }
            // Bind the step to the concrete definition backing its slug.
            step.block_definition_id = self
                .blocks
                .get_by_slug(None, &step_seed.step_type)
                .await?
                .map(|block| block.id);
            self.steps.create(&step).await?;
            step_ids.insert(step_seed.key.as_str(), step.id);
        }

        for edge_seed in &seed.edges {
            let mut edge = Edge {
                id: Uuid::new_v4(),
                tenant_id: None,
                workflow_id: workflow.id,
                source_step_id: step_ids.get(edge_seed.source.as_str()).copied(),
                source_group_id: group_ids.get(edge_seed.source.as_str()).copied(),
                target_step_id: step_ids.get(edge_seed.target.as_str()).copied(),
                target_group_id: group_ids.get(edge_seed.target.as_str()).copied(),
                source_port: edge_seed.source_port.clone().unwrap_or_default(),
                target_port: edge_seed.target_port.clone().unwrap_or_else(|| "input".to_string()),
                condition: edge_seed.condition.clone(),
            };
            if edge.target_group_id.is_some() {
                edge.target_port = GROUP_INPUT_PORT.to_string();
            }
            self.edges.create(&edge).await?;
        }
        Ok(())
    }
}
