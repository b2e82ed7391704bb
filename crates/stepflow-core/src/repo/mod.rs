//! # Repository Contracts
//!
//! Every persistence dependency of the engine is abstracted behind a narrow
//! async interface. Tenant scoping is always an explicit argument, never
//! inferred from ambient state; `tenant = None` addresses system-owned
//! rows. Deadline propagation is realized the idiomatic async-Rust way:
//! callers bound repository futures with their own timeout, and a dropped
//! future abandons the operation.
//!
//! Concrete implementations live with the deployment; [`memory`] ships the
//! in-memory backend used by tests and by single-node deployments.

pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{
    BlockCategory, BlockDefinition, BlockGroup, BlockVersion, Edge, RunStatus, Step, StepRun,
    Workflow, WorkflowGraphData, WorkflowRun, WorkflowStatus,
};

/// Listing filter for the block catalog.
#[derive(Debug, Clone, Default)]
pub struct BlockFilter {
    pub category: Option<BlockCategory>,
    /// Case-insensitive match against slug, name, and description
    pub search: Option<String>,
    pub enabled_only: bool,
}

/// Listing filter for runs.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub status: Option<RunStatus>,
    pub limit: Option<usize>,
}

#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
#[async_trait]
pub trait BlockDefinitionRepo: Send + Sync {
    /// Exact-scope lookup: `tenant = None` finds only system rows.
    async fn get_by_slug(
        &self,
        tenant: Option<Uuid>,
        slug: &str,
    ) -> Result<Option<BlockDefinition>, EngineError>;

    /// Unscoped lookup across all tenants. Seed migration uses this to
    /// avoid clobbering tenant-owned slugs.
    async fn find_by_slug(&self, slug: &str) -> Result<Vec<BlockDefinition>, EngineError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<BlockDefinition>, EngineError>;

    async fn list(
        &self,
        tenant: Option<Uuid>,
        filter: BlockFilter,
    ) -> Result<Vec<BlockDefinition>, EngineError>;

    async fn create(&self, block: &BlockDefinition) -> Result<(), EngineError>;

    async fn update(&self, block: &BlockDefinition) -> Result<(), EngineError>;

    async fn delete(&self, id: Uuid) -> Result<(), EngineError>;
}

#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
#[async_trait]
pub trait BlockVersionRepo: Send + Sync {
    async fn create(&self, version: &BlockVersion) -> Result<(), EngineError>;

    async fn list_by_block(&self, block_id: Uuid) -> Result<Vec<BlockVersion>, EngineError>;
}

#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
#[async_trait]
pub trait WorkflowRepo: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Workflow>, EngineError>;

    /// Seed-managed workflows are addressed by their system slug.
    async fn get_by_system_slug(
        &self,
        tenant: Option<Uuid>,
        slug: &str,
    ) -> Result<Option<Workflow>, EngineError>;

    async fn list(
        &self,
        tenant: Option<Uuid>,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<Workflow>, EngineError>;

    async fn create(&self, workflow: &Workflow) -> Result<(), EngineError>;

    async fn update(&self, workflow: &Workflow) -> Result<(), EngineError>;

    /// The workflow joined with its step/edge/group rows, as the scheduler
    /// consumes it.
    async fn get_with_graph(&self, id: Uuid) -> Result<Option<WorkflowGraphData>, EngineError>;
}

#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
#[async_trait]
pub trait StepRepo: Send + Sync {
    async fn list_by_workflow(&self, workflow_id: Uuid) -> Result<Vec<Step>, EngineError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Step>, EngineError>;

    async fn create(&self, step: &Step) -> Result<(), EngineError>;

    async fn update(&self, step: &Step) -> Result<(), EngineError>;

    async fn delete(&self, id: Uuid) -> Result<(), EngineError>;

    async fn delete_by_workflow(&self, workflow_id: Uuid) -> Result<usize, EngineError>;
}

#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
#[async_trait]
pub trait EdgeRepo: Send + Sync {
    async fn list_by_workflow(&self, workflow_id: Uuid) -> Result<Vec<Edge>, EngineError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Edge>, EngineError>;

    async fn create(&self, edge: &Edge) -> Result<(), EngineError>;

    async fn delete(&self, id: Uuid) -> Result<(), EngineError>;

    async fn delete_by_workflow(&self, workflow_id: Uuid) -> Result<usize, EngineError>;
}

#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
#[async_trait]
pub trait BlockGroupRepo: Send + Sync {
    async fn list_by_workflow(&self, workflow_id: Uuid) -> Result<Vec<BlockGroup>, EngineError>;

    async fn create(&self, group: &BlockGroup) -> Result<(), EngineError>;

    async fn update(&self, group: &BlockGroup) -> Result<(), EngineError>;

    async fn delete_by_workflow(&self, workflow_id: Uuid) -> Result<usize, EngineError>;
}

#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
#[async_trait]
pub trait RunRepo: Send + Sync {
    async fn create(&self, run: &WorkflowRun) -> Result<(), EngineError>;

    /// Status transitions must stay monotone; implementations reject
    /// updates that would mutate a terminal record.
    async fn update(&self, run: &WorkflowRun) -> Result<(), EngineError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<WorkflowRun>, EngineError>;

    async fn list_by_workflow(
        &self,
        workflow_id: Uuid,
        filter: RunFilter,
    ) -> Result<Vec<WorkflowRun>, EngineError>;
}

#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
#[async_trait]
pub trait StepRunRepo: Send + Sync {
    async fn create(&self, step_run: &StepRun) -> Result<(), EngineError>;

    /// Same monotonicity rule as [`RunRepo::update`].
    async fn update(&self, step_run: &StepRun) -> Result<(), EngineError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<StepRun>, EngineError>;

    async fn list_by_run(&self, workflow_run_id: Uuid) -> Result<Vec<StepRun>, EngineError>;
}
