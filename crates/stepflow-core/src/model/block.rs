use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Coarse catalog grouping used by the block browser and the copilot tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockCategory {
    Ai,
    Flow,
    Data,
    Apps,
    Custom,
}

/// A named, typed input slot on a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputPort {
    pub name: String,
    pub label: String,
    /// JSON-schema fragment describing accepted payloads
    #[serde(default)]
    pub schema: Value,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

/// A named, typed output slot on a block. At most one output port per block
/// is marked default; unrouted step outputs land there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputPort {
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub schema: Value,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub description: String,
}

impl InputPort {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            schema: Value::Null,
            required: false,
            description: String::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }
}

impl OutputPort {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            schema: Value::Null,
            is_default: false,
            description: String::new(),
        }
    }

    pub fn default_port(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }
}

/// A provider error code a block declares, with its retry classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockErrorCode {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub retryable: bool,
}

/// One step of a block's internal expansion. Blocks that are macros over
/// other blocks carry these instead of executable code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalStep {
    pub name: String,
    /// Slug of the block this internal step instantiates
    pub block_slug: String,
    #[serde(default)]
    pub config: Value,
}

/// A reusable node type: the persisted form of everything a step can be.
///
/// System blocks carry `tenant_id = None` and are owned by seed migration;
/// tenant blocks are never overwritten by seeds. `parent_slug` chains are
/// flattened by the resolver and must stay acyclic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockDefinition {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    /// Globally unique within its tenant scope
    pub slug: String,
    /// Monotonically non-decreasing per slug
    pub version: i32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: BlockCategory,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub config_schema: Value,
    #[serde(default)]
    pub output_schema: Value,
    #[serde(default)]
    pub inputs: Vec<InputPort>,
    #[serde(default)]
    pub outputs: Vec<OutputPort>,
    /// Executable snippet run by the script host instead of an adapter
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub pre_script: Option<String>,
    #[serde(default)]
    pub post_script: Option<String>,
    #[serde(default)]
    pub config_defaults: Option<Value>,
    #[serde(default)]
    pub internal_steps: Vec<InternalStep>,
    #[serde(default)]
    pub parent_slug: Option<String>,
    #[serde(default)]
    pub error_codes: Vec<BlockErrorCode>,
    #[serde(default)]
    pub required_credentials: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub is_container: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl BlockDefinition {
    /// A minimal system-owned definition; seeds and tests build on this.
    pub fn system(slug: impl Into<String>, category: BlockCategory) -> Self {
        let now = Utc::now();
        let slug = slug.into();
        Self {
            id: Uuid::new_v4(),
            tenant_id: None,
            name: slug.clone(),
            slug,
            version: 1,
            description: String::new(),
            category,
            subcategory: None,
            icon: String::new(),
            config_schema: Value::Null,
            output_schema: Value::Null,
            inputs: vec![InputPort::new("input").required()],
            outputs: vec![OutputPort::new("out").default_port()],
            code: None,
            pre_script: None,
            post_script: None,
            config_defaults: None,
            internal_steps: Vec::new(),
            parent_slug: None,
            error_codes: Vec::new(),
            required_credentials: Vec::new(),
            enabled: true,
            is_container: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// The default output port name, falling back to the first declared
    /// output, then to `"out"`.
    pub fn default_output_port(&self) -> &str {
        self.outputs
            .iter()
            .find(|p| p.is_default)
            .or_else(|| self.outputs.first())
            .map(|p| p.name.as_str())
            .unwrap_or("out")
    }

    pub fn has_output_port(&self, name: &str) -> bool {
        self.outputs.iter().any(|p| p.name == name)
    }

    pub fn has_input_port(&self, name: &str) -> bool {
        self.inputs.iter().any(|p| p.name == name)
    }
}

/// Immutable snapshot of a block definition taken before seed updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockVersion {
    pub id: Uuid,
    pub block_definition_id: Uuid,
    pub version: i32,
    /// Why this snapshot was taken, e.g. "Initial seed"
    pub reason: String,
    /// The full definition as it stood
    pub snapshot: Value,
    pub created_at: DateTime<Utc>,
}

impl BlockVersion {
    pub fn of(block: &BlockDefinition, reason: impl Into<String>) -> Result<Self, crate::error::EngineError> {
        Ok(Self {
            id: Uuid::new_v4(),
            block_definition_id: block.id,
            version: block.version,
            reason: reason.into(),
            snapshot: serde_json::to_value(block)?,
            created_at: Utc::now(),
        })
    }
}
