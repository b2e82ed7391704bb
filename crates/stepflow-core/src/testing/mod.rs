//! Test fixtures shared by the crate's integration tests and by downstream
//! crates exercising the engine against the in-memory backend.

use serde_json::json;
use std::sync::Arc;

use crate::adapter::{Adapter, AdapterRegistry, PassthroughAdapter};
use crate::config::EngineConfig;
use crate::executor::StepExecutor;
use crate::model::{
    BlockCategory, BlockDefinition, BlockGroup, Edge, OutputPort, Step, Workflow,
};
use crate::repo::memory::MemoryStore;
use crate::repo::{
    BlockDefinitionRepo as _, BlockGroupRepo as _, EdgeRepo as _, StepRepo as _, WorkflowRepo as _,
};
use crate::resolver::BlockResolver;
use crate::scheduler::Scheduler;
use crate::script::ScriptHost;

/// A fully wired engine over the in-memory backend.
pub struct TestEngine {
    pub store: MemoryStore,
    pub scheduler: Scheduler,
}

/// Builder for [`TestEngine`]: seed blocks, register adapters, go.
pub struct TestEngineBuilder {
    store: MemoryStore,
    registry: AdapterRegistry,
    script_host: Option<Arc<dyn ScriptHost>>,
    config: EngineConfig,
    blocks: Vec<BlockDefinition>,
}

impl TestEngineBuilder {
    pub fn new() -> Self {
        let mut builder = Self {
            store: MemoryStore::new(),
            registry: AdapterRegistry::new(),
            script_host: None,
            config: EngineConfig::default(),
            blocks: Vec::new(),
        };
        builder.registry.register(Arc::new(PassthroughAdapter::new("start")));
        builder.blocks.push(start_block());
        builder
    }

    pub fn with_block(mut self, block: BlockDefinition) -> Self {
        self.blocks.push(block);
        self
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.registry.register(adapter);
        self
    }

    pub fn with_script_host(mut self, host: Arc<dyn ScriptHost>) -> Self {
        self.script_host = Some(host);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn build(self) -> TestEngine {
        for block in &self.blocks {
            self.store
                .blocks
                .create(block)
                .await
                .expect("failed to seed block definition");
        }
        let resolver = Arc::new(BlockResolver::new(self.store.blocks.clone()));
        let adapters = Arc::new(self.registry);
        let mut executor = StepExecutor::new(
            resolver,
            adapters.clone(),
            self.store.step_runs.clone(),
            self.config.clone(),
        );
        if let Some(host) = &self.script_host {
            executor = executor.with_script_host(host.clone());
        }
        let mut scheduler = Scheduler::new(
            self.store.workflows.clone(),
            self.store.runs.clone(),
            Arc::new(executor),
            adapters,
            self.config,
        );
        if let Some(host) = self.script_host {
            scheduler = scheduler.with_script_host(host);
        }
        TestEngine {
            store: self.store,
            scheduler,
        }
    }
}

impl Default for TestEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The entry block every fixture workflow starts from.
pub fn start_block() -> BlockDefinition {
    let mut block = BlockDefinition::system("start", BlockCategory::Flow);
    block.name = "Start".into();
    block.inputs = vec![];
    block.outputs = vec![OutputPort::new("out").default_port()];
    block
}

/// A plain single-output block bound to the adapter with the same slug.
pub fn adapter_block(slug: &str) -> BlockDefinition {
    BlockDefinition::system(slug, BlockCategory::Custom)
}

/// A two-way router block with `true`/`false` output ports.
pub fn branch_block(slug: &str) -> BlockDefinition {
    let mut block = BlockDefinition::system(slug, BlockCategory::Flow);
    block.outputs = vec![
        OutputPort::new("true").default_port(),
        OutputPort::new("false"),
    ];
    block
}

/// Persist a workflow with its graph rows.
pub async fn install_workflow(
    store: &MemoryStore,
    workflow: &Workflow,
    steps: &[Step],
    edges: &[Edge],
    groups: &[BlockGroup],
) {
    store
        .workflows
        .create(workflow)
        .await
        .expect("failed to create workflow");
    for group in groups {
        store.groups.create(group).await.expect("failed to create group");
    }
    for step in steps {
        store.steps.create(step).await.expect("failed to create step");
    }
    for edge in edges {
        store.edges.create(edge).await.expect("failed to create edge");
    }
}

/// The conventional `{}`-input start step for a fixture workflow.
pub fn start_step(workflow: &Workflow, name: &str) -> Step {
    Step::new(workflow.id, name, "start").with_config(json!({}))
}
