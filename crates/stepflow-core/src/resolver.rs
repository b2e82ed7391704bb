//! # Block Resolver
//!
//! Flattens a block definition up its parent chain (`github-api` →
//! `bearer-api` → `rest-api` → `http`) into an [`EffectiveBlock`]: a flat
//! value downstream code consumes without ever walking the chain again.
//!
//! Merge rules, applied root to leaf:
//! - scalar fields (name, description, code, icon, pre/post scripts):
//!   child overrides parent when non-empty
//! - `config_defaults`: deep-merged, child keys win
//! - port lists: union by name, a child port fully replaces a same-named
//!   parent port
//! - error codes: union by code
//! - `internal_steps`: child replaces parent when non-empty
//!
//! Resolution is pure and cached by (tenant scope, slug, version); cache
//! entries are immutable once inserted.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{
    BlockCategory, BlockDefinition, BlockErrorCode, InputPort, InternalStep, OutputPort,
};
use crate::repo::BlockDefinitionRepo;
use crate::util::json::deep_merge;

/// The flattened result of parent-chain resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveBlock {
    pub slug: String,
    pub version: i32,
    /// Slug of the chain's root ancestor (equals `slug` for root blocks);
    /// the executor's adapter lookup falls back to this
    pub root_slug: String,
    pub name: String,
    pub description: String,
    pub category: BlockCategory,
    pub subcategory: Option<String>,
    pub icon: String,
    pub config_defaults: Value,
    pub inputs: Vec<InputPort>,
    pub outputs: Vec<OutputPort>,
    pub code: Option<String>,
    pub pre_script: Option<String>,
    pub post_script: Option<String>,
    pub internal_steps: Vec<InternalStep>,
    pub error_codes: Vec<BlockErrorCode>,
    pub required_credentials: Vec<String>,
    pub enabled: bool,
    pub is_container: bool,
}

impl EffectiveBlock {
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

    pub fn input_port(&self, name: &str) -> Option<&InputPort> {
        self.inputs.iter().find(|p| p.name == name)
    }

    /// Retry override declared for a provider error code, if any.
    pub fn code_retryable(&self, code: &str) -> Option<bool> {
        self.error_codes
            .iter()
            .find(|c| c.code == code)
            .map(|c| c.retryable)
    }
}

/// Pure fold of a parent chain, ordered root first, leaf last.
///
/// This is the whole merge algorithm; [`BlockResolver`] only adds chain
/// collection and caching on top.
pub fn flatten_chain(chain: &[BlockDefinition]) -> EffectiveBlock {
    debug_assert!(!chain.is_empty(), "flatten_chain requires at least one block");
    let root = &chain[0];
    let leaf = &chain[chain.len() - 1];

    let mut effective = EffectiveBlock {
        slug: leaf.slug.clone(),
        version: leaf.version,
        root_slug: root.slug.clone(),
        name: root.name.clone(),
        description: root.description.clone(),
        category: leaf.category,
        subcategory: leaf.subcategory.clone(),
        icon: root.icon.clone(),
        config_defaults: root
            .config_defaults
            .clone()
            .unwrap_or_else(|| Value::Object(Default::default())),
        inputs: root.inputs.clone(),
        outputs: root.outputs.clone(),
        code: root.code.clone(),
        pre_script: root.pre_script.clone(),
        post_script: root.post_script.clone(),
        internal_steps: root.internal_steps.clone(),
        error_codes: root.error_codes.clone(),
        required_credentials: root.required_credentials.clone(),
        enabled: leaf.enabled,
        is_container: leaf.is_container,
    };

    for child in &chain[1..] {
        if !child.name.is_empty() {
            effective.name = child.name.clone();
        }
        if !child.description.is_empty() {
            effective.description = child.description.clone();
        }
        if !child.icon.is_empty() {
            effective.icon = child.icon.clone();
        }
        if child.code.as_deref().is_some_and(|c| !c.is_empty()) {
            effective.code = child.code.clone();
        }
        if child.pre_script.as_deref().is_some_and(|s| !s.is_empty()) {
            effective.pre_script = child.pre_script.clone();
        }
        if child.post_script.as_deref().is_some_and(|s| !s.is_empty()) {
            effective.post_script = child.post_script.clone();
        }
        if let Some(defaults) = &child.config_defaults {
            effective.config_defaults = deep_merge(&effective.config_defaults, defaults);
        }
        merge_input_ports(&mut effective.inputs, &child.inputs);
        merge_output_ports(&mut effective.outputs, &child.outputs);
        merge_error_codes(&mut effective.error_codes, &child.error_codes);
        if !child.internal_steps.is_empty() {
            effective.internal_steps = child.internal_steps.clone();
        }
        for credential in &child.required_credentials {
            if !effective.required_credentials.contains(credential) {
                effective.required_credentials.push(credential.clone());
            }
        }
    }

    effective
}

fn merge_input_ports(base: &mut Vec<InputPort>, overlay: &[InputPort]) {
    for port in overlay {
        match base.iter_mut().find(|p| p.name == port.name) {
            Some(existing) => *existing = port.clone(),
            None => base.push(port.clone()),
        }
    }
}

fn merge_output_ports(base: &mut Vec<OutputPort>, overlay: &[OutputPort]) {
    for port in overlay {
        match base.iter_mut().find(|p| p.name == port.name) {
            Some(existing) => *existing = port.clone(),
            None => base.push(port.clone()),
        }
    }
}

fn merge_error_codes(base: &mut Vec<BlockErrorCode>, overlay: &[BlockErrorCode]) {
    for code in overlay {
        match base.iter_mut().find(|c| c.code == code.code) {
            Some(existing) => *existing = code.clone(),
            None => base.push(code.clone()),
        }
    }
}

/// Collect the parent chain for a leaf out of an in-memory catalog map,
/// root first. The async [`BlockResolver`] does the same walk through the
/// repository; this form serves catalogs that are already in memory.
pub fn collect_chain<'a>(
    catalog: &'a HashMap<String, BlockDefinition>,
    leaf_slug: &str,
) -> Result<Vec<&'a BlockDefinition>, EngineError> {
    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    let mut current = leaf_slug.to_string();

    loop {
        if !visited.insert(current.clone()) {
            return Err(EngineError::CycleDetected {
                slug: leaf_slug.to_string(),
            });
        }
        let block = catalog.get(&current).ok_or_else(|| {
            if current == leaf_slug {
                EngineError::not_found("block definition", &current)
            } else {
                EngineError::UnknownParent {
                    slug: chain
                        .last()
                        .map(|b: &&BlockDefinition| b.slug.clone())
                        .unwrap_or_else(|| leaf_slug.to_string()),
                    parent: current.clone(),
                }
            }
        })?;
        chain.push(block);
        match &block.parent_slug {
            Some(parent) => current = parent.clone(),
            None => break,
        }
    }

    chain.reverse();
    Ok(chain)
}

/// Repository-backed resolver with a concurrent (scope, slug, version)
/// cache of flattened results.
pub struct BlockResolver {
    blocks: Arc<dyn BlockDefinitionRepo>,
    cache: RwLock<HashMap<(Option<Uuid>, String, i32), Arc<EffectiveBlock>>>,
}

impl BlockResolver {
    pub fn new(blocks: Arc<dyn BlockDefinitionRepo>) -> Self {
        Self {
            blocks,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Load a block by slug, preferring the tenant's own definition and
    /// falling back to the system catalog.
    async fn load(
        &self,
        tenant: Option<Uuid>,
        slug: &str,
    ) -> Result<Option<BlockDefinition>, EngineError> {
        if tenant.is_some() {
            if let Some(block) = self.blocks.get_by_slug(tenant, slug).await? {
                return Ok(Some(block));
            }
        }
        self.blocks.get_by_slug(None, slug).await
    }

    /// Resolve a slug to its effective definition.
    pub async fn resolve(
        &self,
        tenant: Option<Uuid>,
        slug: &str,
    ) -> Result<Arc<EffectiveBlock>, EngineError> {
        let leaf = self
            .load(tenant, slug)
            .await?
            .ok_or_else(|| EngineError::not_found("block definition", slug))?;

        let key = (tenant, leaf.slug.clone(), leaf.version);
        if let Some(hit) = self.cache.read().expect("resolver cache lock poisoned").get(&key) {
            return Ok(hit.clone());
        }

        let mut chain = vec![leaf];
        let mut visited: HashSet<String> =
            chain.iter().map(|b| b.slug.clone()).collect();
        while let Some(parent_slug) = chain.last().and_then(|b| b.parent_slug.clone()) {
            if !visited.insert(parent_slug.clone()) {
                return Err(EngineError::CycleDetected {
                    slug: slug.to_string(),
                });
            }
            let parent = self.load(tenant, &parent_slug).await?.ok_or_else(|| {
                EngineError::UnknownParent {
                    slug: chain.last().map(|b| b.slug.clone()).unwrap_or_default(),
                    parent: parent_slug.clone(),
                }
            })?;
            chain.push(parent);
        }
        chain.reverse();

        let effective = Arc::new(flatten_chain(&chain));
        self.cache
            .write()
            .expect("resolver cache lock poisoned")
            .insert(key, effective.clone());
        Ok(effective)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BlockCategory;
    use crate::repo::memory::InMemoryBlockDefinitionRepo;
    use serde_json::json;

    fn block(slug: &str, parent: Option<&str>) -> BlockDefinition {
        let mut block = BlockDefinition::system(slug, BlockCategory::Apps);
        block.parent_slug = parent.map(str::to_string);
        block
    }

    fn api_chain() -> Vec<BlockDefinition> {
        let mut http = block("http", None);
        http.config_defaults = Some(json!({"method": "GET", "timeout_sec": 30}));
        http.outputs = vec![
            OutputPort::new("out").default_port(),
            OutputPort::new("error"),
        ];
        http.error_codes = vec![BlockErrorCode {
            code: "ECONN".into(),
            name: "connection".into(),
            description: String::new(),
            retryable: true,
        }];

        let mut rest = block("rest-api", Some("http"));
        rest.config_defaults = Some(json!({"headers": {"Accept": "application/json"}}));

        let mut bearer = block("bearer-api", Some("rest-api"));
        bearer.config_defaults = Some(json!({"headers": {"Authorization": "Bearer {{ctx.token}}"}}));
        bearer.required_credentials = vec!["api_token".into()];

        let mut github = block("github-api", Some("bearer-api"));
        github.name = "GitHub API".into();
        github.config_defaults = Some(json!({"base_url": "https://api.github.com"}));

        vec![http, rest, bearer, github]
    }

    #[test]
    fn chain_flattening_merges_defaults_and_scalars() {
        let chain = api_chain();
        let effective = flatten_chain(&chain);

        assert_eq!(effective.slug, "github-api");
        assert_eq!(effective.root_slug, "http");
        assert_eq!(effective.name, "GitHub API");
        assert_eq!(effective.config_defaults["method"], "GET");
        assert_eq!(
            effective.config_defaults["headers"]["Accept"],
            "application/json"
        );
        assert_eq!(
            effective.config_defaults["headers"]["Authorization"],
            "Bearer {{ctx.token}}"
        );
        assert_eq!(effective.config_defaults["base_url"], "https://api.github.com");
        assert!(effective.has_output_port("error"));
        assert_eq!(effective.required_credentials, vec!["api_token".to_string()]);
    }

    #[test]
    fn child_port_replaces_same_named_parent_port() {
        let mut parent = block("base", None);
        parent.outputs = vec![OutputPort::new("out").default_port()];
        let mut child = block("child", Some("base"));
        child.outputs = vec![OutputPort::new("out")
            .default_port()
            .with_schema(json!({"type": "string"}))];

        let effective = flatten_chain(&[parent, child]);
        assert_eq!(effective.outputs.len(), 1);
        assert_eq!(effective.outputs[0].schema, json!({"type": "string"}));
    }

    #[test]
    fn resolution_is_idempotent() {
        let chain = api_chain();
        let once = flatten_chain(&chain);

        // Re-resolving the flattened value (a chain of one) is identity.
        let mut as_block = block("github-api", None);
        as_block.name = once.name.clone();
        as_block.description = once.description.clone();
        as_block.config_defaults = Some(once.config_defaults.clone());
        as_block.inputs = once.inputs.clone();
        as_block.outputs = once.outputs.clone();
        as_block.error_codes = once.error_codes.clone();
        as_block.internal_steps = once.internal_steps.clone();
        as_block.required_credentials = once.required_credentials.clone();

        let twice = flatten_chain(&[as_block]);
        assert_eq!(twice.config_defaults, once.config_defaults);
        assert_eq!(twice.inputs, once.inputs);
        assert_eq!(twice.outputs, once.outputs);
        assert_eq!(twice.error_codes, once.error_codes);
    }

    #[test]
    fn collect_chain_detects_cycles_and_unknown_parents() {
        let mut catalog = HashMap::new();
        catalog.insert("a".to_string(), block("a", Some("b")));
        catalog.insert("b".to_string(), block("b", Some("a")));
        let err = collect_chain(&catalog, "a").unwrap_err();
        assert!(matches!(err, EngineError::CycleDetected { .. }));

        let mut catalog = HashMap::new();
        catalog.insert("orphan".to_string(), block("orphan", Some("ghost")));
        let err = collect_chain(&catalog, "orphan").unwrap_err();
        assert!(matches!(err, EngineError::UnknownParent { ref parent, .. } if parent == "ghost"));
    }

    #[tokio::test]
    async fn repo_backed_resolution_caches_and_detects_cycles() {
        let repo = Arc::new(InMemoryBlockDefinitionRepo::default());
        use crate::repo::BlockDefinitionRepo as _;
        for b in api_chain() {
            repo.create(&b).await.unwrap();
        }
        let resolver = BlockResolver::new(repo.clone());

        let first = resolver.resolve(None, "github-api").await.unwrap();
        let second = resolver.resolve(None, "github-api").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second), "second hit should come from cache");

        let mut looped = block("self", Some("self"));
        looped.slug = "self".into();
        repo.create(&looped).await.unwrap();
        let err = resolver.resolve(None, "self").await.unwrap_err();
        assert!(matches!(err, EngineError::CycleDetected { .. }));
    }

    #[tokio::test]
    async fn tenant_definitions_shadow_system_ones() {
        let repo = Arc::new(InMemoryBlockDefinitionRepo::default());
        use crate::repo::BlockDefinitionRepo as _;
        let tenant = Uuid::new_v4();

        let system = block("greeter", None);
        repo.create(&system).await.unwrap();
        let mut tenant_block = block("greeter", None);
        tenant_block.id = Uuid::new_v4();
        tenant_block.tenant_id = Some(tenant);
        tenant_block.name = "Tenant greeter".into();
        repo.create(&tenant_block).await.unwrap();

        let resolver = BlockResolver::new(repo);
        let effective = resolver.resolve(Some(tenant), "greeter").await.unwrap();
        assert_eq!(effective.name, "Tenant greeter");
        let effective = resolver.resolve(None, "greeter").await.unwrap();
        assert_eq!(effective.name, "greeter");
    }
}
