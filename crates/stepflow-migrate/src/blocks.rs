//! Block seed registry and the topological upsert migrator.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use stepflow_core::error::EngineError;
use stepflow_core::model::{
    BlockCategory, BlockDefinition, BlockErrorCode, BlockVersion, InputPort, InternalStep,
    OutputPort,
};
use stepflow_core::repo::{BlockDefinitionRepo, BlockVersionRepo};
use stepflow_core::util::json::json_equal;

use crate::{MigrationAction, MigrationReport};

/// The seed form of a block definition: everything persisted minus ids and
/// timestamps, which the migrator assigns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockSeed {
    pub slug: String,
    #[serde(default = "default_version")]
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
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub is_container: bool,
}

fn default_version() -> i32 {
    1
}

fn default_enabled() -> bool {
    true
}

impl BlockSeed {
    pub fn new(slug: impl Into<String>, category: BlockCategory) -> Self {
        let slug = slug.into();
        Self {
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
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_slug = Some(parent.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_defaults(mut self, defaults: Value) -> Self {
        self.config_defaults = Some(defaults);
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<OutputPort>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    /// Materialize as a fresh system-owned row.
    fn into_definition(&self) -> BlockDefinition {
        let now = Utc::now();
        BlockDefinition {
            id: Uuid::new_v4(),
            tenant_id: None,
            slug: self.slug.clone(),
            version: self.version,
            name: self.name.clone(),
            description: self.description.clone(),
            category: self.category,
            subcategory: self.subcategory.clone(),
            icon: self.icon.clone(),
            config_schema: self.config_schema.clone(),
            output_schema: self.output_schema.clone(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            code: self.code.clone(),
            pre_script: self.pre_script.clone(),
            post_script: self.post_script.clone(),
            config_defaults: self.config_defaults.clone(),
            internal_steps: self.internal_steps.clone(),
            parent_slug: self.parent_slug.clone(),
            error_codes: self.error_codes.clone(),
            required_credentials: self.required_credentials.clone(),
            enabled: self.enabled,
            is_container: self.is_container,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply this seed over an existing row, preserving identity and
    /// keeping the version monotone.
    fn apply_to(&self, existing: &BlockDefinition) -> BlockDefinition {
        let mut updated = self.into_definition();
        updated.id = existing.id;
        updated.created_at = existing.created_at;
        updated.version = self.version.max(existing.version);
        updated
    }
}

/// An ordered collection of block seeds; registration order is irrelevant,
/// the migrator orders by parent references.
#[derive(Debug, Clone, Default)]
pub struct BlockRegistry {
    seeds: Vec<BlockSeed>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, seed: BlockSeed) -> &mut Self {
        self.seeds.push(seed);
        self
    }

    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }

    pub fn seeds(&self) -> &[BlockSeed] {
        &self.seeds
    }
}

/// Field-wise structural comparison between a persisted row and its seed.
/// JSON fields compare by normalized value; port and error-code lists
/// element-wise; inheritance fields participate.
fn seed_matches(existing: &BlockDefinition, seed: &BlockSeed) -> bool {
    existing.version == seed.version
        && existing.name == seed.name
        && existing.description == seed.description
        && existing.category == seed.category
        && existing.subcategory == seed.subcategory
        && existing.icon == seed.icon
        && json_equal(&existing.config_schema, &seed.config_schema)
        && json_equal(&existing.output_schema, &seed.output_schema)
        && existing.inputs == seed.inputs
        && existing.outputs == seed.outputs
        && existing.code == seed.code
        && existing.pre_script == seed.pre_script
        && existing.post_script == seed.post_script
        && match (&existing.config_defaults, &seed.config_defaults) {
            (Some(a), Some(b)) => json_equal(a, b),
            (None, None) => true,
            _ => false,
        }
        && existing.internal_steps == seed.internal_steps
        && existing.parent_slug == seed.parent_slug
        && existing.error_codes == seed.error_codes
        && existing.required_credentials == seed.required_credentials
        && existing.enabled == seed.enabled
        && existing.is_container == seed.is_container
}

/// Topological upsert of a seed registry into the system block catalog.
pub struct BlockMigrator {
    blocks: Arc<dyn BlockDefinitionRepo>,
    versions: Arc<dyn BlockVersionRepo>,
}

impl BlockMigrator {
    pub fn new(blocks: Arc<dyn BlockDefinitionRepo>, versions: Arc<dyn BlockVersionRepo>) -> Self {
        Self { blocks, versions }
    }

    pub async fn migrate(&self, registry: &BlockRegistry) -> Result<MigrationReport, EngineError> {
        let seeds: HashMap<&str, &BlockSeed> = registry
            .seeds()
            .iter()
            .map(|seed| (seed.slug.as_str(), seed))
            .collect();

        // Kahn: parents before children. Only parents that are themselves
        // part of this registry contribute to the in-degree; a parent that
        // already lives in storage imposes no ordering here.
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
        for seed in registry.seeds() {
            let degree = seed
                .parent_slug
                .as_deref()
                .filter(|parent| seeds.contains_key(parent))
                .map(|parent| {
                    children.entry(parent).or_default().push(seed.slug.as_str());
                    1
                })
                .unwrap_or(0);
            in_degree.insert(seed.slug.as_str(), degree);
        }

        let mut queue: VecDeque<&str> = {
            let mut roots: Vec<&str> = in_degree
                .iter()
                .filter(|(_, &degree)| degree == 0)
                .map(|(&slug, _)| slug)
                .collect();
            roots.sort();
            roots.into()
        };

        let mut report = MigrationReport::default();
        let mut processed = 0usize;
        while let Some(slug) = queue.pop_front() {
            let seed = seeds[slug];
            let action = self.upsert(seed).await?;
            report.push(slug, action);
            processed += 1;

            if let Some(next) = children.get(slug) {
                let mut unlocked: Vec<&str> = Vec::new();
                for &child in next {
                    let degree = in_degree.get_mut(child).expect("child is registered");
                    *degree -= 1;
                    if *degree == 0 {
                        unlocked.push(child);
                    }
                }
                unlocked.sort();
                queue.extend(unlocked);
            }
        }

        if processed < registry.len() {
            let mut remaining: Vec<String> = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(slug, _)| slug.to_string())
                .collect();
            remaining.sort();
            return Err(EngineError::CircularDependency { remaining });
        }

        info!(
            created = report.created(),
            updated = report.updated(),
            unchanged = report.unchanged(),
            skipped = report.skipped(),
            "block seed migration finished"
        );
        Ok(report)
    }

    async fn upsert(&self, seed: &BlockSeed) -> Result<MigrationAction, EngineError> {
        let rows = self.blocks.find_by_slug(&seed.slug).await?;
        let system_row = rows.iter().find(|b| b.tenant_id.is_none());

        match system_row {
            None if !rows.is_empty() => {
                // The slug exists only as tenant-owned rows; hands off.
                debug!(slug = %seed.slug, "slug is tenant-owned, skipping seed");
                Ok(MigrationAction::Skipped)
            }
            None => {
                let definition = seed.into_definition();
                self.blocks.create(&definition).await?;
                self.versions
                    .create(&BlockVersion::of(&definition, "Initial seed")?)
                    .await?;
                debug!(slug = %seed.slug, version = definition.version, "created seed block");
                Ok(MigrationAction::Created)
            }
            Some(existing) => {
                if seed_matches(existing, seed) {
                    return Ok(MigrationAction::Unchanged);
                }
                if seed.version != existing.version {
                    self.versions
                        .create(&BlockVersion::of(existing, "Pre-update snapshot")?)
                        .await?;
                }
                let updated = seed.apply_to(existing);
                self.blocks.update(&updated).await?;
                debug!(slug = %seed.slug, version = updated.version, "updated seed block");
                Ok(MigrationAction::Updated)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn seed_matches_is_structural() {
        let seed = BlockSeed::new("http", BlockCategory::Apps)
            .with_defaults(json!({"method": "GET", "nested": {"a": 1, "b": 2}}));
        let row = seed.into_definition();
        assert!(seed_matches(&row, &seed));

        // Key order in JSON does not count as a change.
        let mut reordered = seed.clone();
        reordered.config_defaults =
            Some(serde_json::from_str(r#"{"nested": {"b": 2, "a": 1}, "method": "GET"}"#).unwrap());
        assert!(seed_matches(&row, &reordered));

        let mut changed = seed.clone();
        changed.code = Some("fetch()".into());
        assert!(!seed_matches(&row, &changed));

        let mut bumped = seed;
        bumped.version = 2;
        assert!(!seed_matches(&row, &bumped));
    }

    #[test]
    fn apply_to_keeps_identity_and_monotone_version() {
        let seed = BlockSeed::new("http", BlockCategory::Apps);
        let existing = seed.into_definition();

        let mut regressed = seed.clone();
        regressed.version = 0;
        let updated = regressed.apply_to(&existing);
        assert_eq!(updated.id, existing.id);
        assert_eq!(updated.version, existing.version);

        let bumped = seed.with_version(3).apply_to(&existing);
        assert_eq!(bumped.version, 3);
    }
}
