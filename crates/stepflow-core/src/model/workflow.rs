use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Reserved target port for edges that feed a block group.
pub const GROUP_INPUT_PORT: &str = "group-input";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Draft,
    Published,
    Archived,
}

/// Classification of an entry step, controlling how a run is initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Manual,
    Schedule,
    Webhook,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

/// A named container of steps and edges. Step/edge/group rows are loaded
/// separately and joined into [`WorkflowGraphData`] when a run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub status: WorkflowStatus,
    pub version: i32,
    #[serde(default)]
    pub input_schema: Value,
    #[serde(default)]
    pub output_schema: Value,
    /// Set for seed-managed workflows; migration matches on this
    #[serde(default)]
    pub system_slug: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(tenant_id: Option<Uuid>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.into(),
            description: String::new(),
            status: WorkflowStatus::Draft,
            version: 1,
            input_schema: Value::Null,
            output_schema: Value::Null,
            system_slug: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// An instance of a block within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub workflow_id: Uuid,
    /// Unique within the workflow; template references use this name
    pub name: String,
    /// Block slug this step instantiates
    pub step_type: String,
    /// Per-instance overlay on the block's config defaults
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub block_definition_id: Option<Uuid>,
    #[serde(default)]
    pub block_group_id: Option<Uuid>,
    #[serde(default = "default_role")]
    pub group_role: String,
    #[serde(default)]
    pub trigger_type: Option<TriggerType>,
    #[serde(default)]
    pub trigger_config: Option<Value>,
    #[serde(default)]
    pub credentials: HashMap<String, String>,
}

fn default_role() -> String {
    "body".to_string()
}

impl Step {
    pub fn new(workflow_id: Uuid, name: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: None,
            workflow_id,
            name: name.into(),
            step_type: step_type.into(),
            config: Value::Null,
            position: Position::default(),
            block_definition_id: None,
            block_group_id: None,
            group_role: default_role(),
            trigger_type: None,
            trigger_config: None,
            credentials: HashMap::new(),
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn in_group(mut self, group_id: Uuid) -> Self {
        self.block_group_id = Some(group_id);
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerType) -> Self {
        self.trigger_type = Some(trigger);
        self
    }
}

/// A directed, port-typed, optionally conditional connection. Exactly one
/// of the source fields and exactly one of the target fields is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub workflow_id: Uuid,
    #[serde(default)]
    pub source_step_id: Option<Uuid>,
    #[serde(default)]
    pub source_group_id: Option<Uuid>,
    #[serde(default)]
    pub target_step_id: Option<Uuid>,
    #[serde(default)]
    pub target_group_id: Option<Uuid>,
    /// Empty means "the source's default output port"
    #[serde(default)]
    pub source_port: String,
    #[serde(default = "default_target_port")]
    pub target_port: String,
    /// Narrow path-comparison expression; false suppresses the edge
    #[serde(default)]
    pub condition: Option<String>,
}

fn default_target_port() -> String {
    "input".to_string()
}

impl Edge {
    pub fn between_steps(workflow_id: Uuid, source: Uuid, target: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: None,
            workflow_id,
            source_step_id: Some(source),
            source_group_id: None,
            target_step_id: Some(target),
            target_group_id: None,
            source_port: String::new(),
            target_port: default_target_port(),
            condition: None,
        }
    }

    pub fn from_port(mut self, port: impl Into<String>) -> Self {
        self.source_port = port.into();
        self
    }

    pub fn to_port(mut self, port: impl Into<String>) -> Self {
        self.target_port = port.into();
        self
    }

    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn into_group(mut self, group_id: Uuid) -> Self {
        self.target_step_id = None;
        self.target_group_id = Some(group_id);
        self.target_port = GROUP_INPUT_PORT.to_string();
        self
    }

    pub fn out_of_group(mut self, group_id: Uuid) -> Self {
        self.source_step_id = None;
        self.source_group_id = Some(group_id);
        self
    }

    /// XOR-endpoint invariant: exactly one source and one target.
    pub fn endpoints_valid(&self) -> bool {
        (self.source_step_id.is_some() ^ self.source_group_id.is_some())
            && (self.target_step_id.is_some() ^ self.target_group_id.is_some())
    }
}

/// Container semantics the scheduler drives over a group's body subgraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupType {
    Parallel,
    TryCatch,
    Foreach,
    While,
    Agent,
}

/// A container construct wrapping a subgraph of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockGroup {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub workflow_id: Uuid,
    pub name: String,
    pub group_type: GroupType,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub pre_script: Option<String>,
    #[serde(default)]
    pub post_script: Option<String>,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub size: Size,
    /// Group nesting; acyclic by invariant
    #[serde(default)]
    pub parent_group_id: Option<Uuid>,
    #[serde(default)]
    pub role: Option<String>,
}

impl BlockGroup {
    pub fn new(workflow_id: Uuid, name: impl Into<String>, group_type: GroupType) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: None,
            workflow_id,
            name: name.into(),
            group_type,
            config: Value::Null,
            pre_script: None,
            post_script: None,
            position: Position::default(),
            size: Size::default(),
            parent_group_id: None,
            role: None,
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }
}

/// A workflow joined with its graph rows, as handed to the scheduler.
#[derive(Debug, Clone)]
pub struct WorkflowGraphData {
    pub workflow: Workflow,
    pub steps: Vec<Step>,
    pub edges: Vec<Edge>,
    pub groups: Vec<BlockGroup>,
}
