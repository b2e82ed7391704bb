//! In-memory repository backend. Serves as the storage layer for
//! single-node deployments and as the default double in tests: the
//! contracts are enforced for real (tenant scoping, monotone status
//! transitions, terminal immutability), only durability is absent.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{BlockFilter, RunFilter};
use crate::error::EngineError;
use crate::model::{
    BlockDefinition, BlockGroup, BlockVersion, Edge, Step, StepRun, Workflow, WorkflowGraphData,
    WorkflowRun, WorkflowStatus,
};
use crate::repo::{
    BlockDefinitionRepo, BlockGroupRepo, BlockVersionRepo, EdgeRepo, RunRepo, StepRepo,
    StepRunRepo, WorkflowRepo,
};

#[derive(Default)]
pub struct InMemoryBlockDefinitionRepo {
    rows: RwLock<HashMap<Uuid, BlockDefinition>>,
}

#[async_trait]
impl BlockDefinitionRepo for InMemoryBlockDefinitionRepo {
    async fn get_by_slug(
        &self,
        tenant: Option<Uuid>,
        slug: &str,
    ) -> Result<Option<BlockDefinition>, EngineError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .find(|b| b.tenant_id == tenant && b.slug == slug)
            .cloned())
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Vec<BlockDefinition>, EngineError> {
        let rows = self.rows.read().await;
        Ok(rows.values().filter(|b| b.slug == slug).cloned().collect())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<BlockDefinition>, EngineError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn list(
        &self,
        tenant: Option<Uuid>,
        filter: BlockFilter,
    ) -> Result<Vec<BlockDefinition>, EngineError> {
        let rows = self.rows.read().await;
        let needle = filter.search.as_deref().map(str::to_lowercase);
        let mut matches: Vec<BlockDefinition> = rows
            .values()
            .filter(|b| b.tenant_id == tenant || b.tenant_id.is_none())
            .filter(|b| filter.category.map_or(true, |c| b.category == c))
            .filter(|b| !filter.enabled_only || b.enabled)
            .filter(|b| {
                needle.as_deref().map_or(true, |needle| {
                    b.slug.to_lowercase().contains(needle)
                        || b.name.to_lowercase().contains(needle)
                        || b.description.to_lowercase().contains(needle)
                })
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(matches)
    }

    async fn create(&self, block: &BlockDefinition) -> Result<(), EngineError> {
        let mut rows = self.rows.write().await;
        let duplicate = rows
            .values()
            .any(|b| b.tenant_id == block.tenant_id && b.slug == block.slug);
        if duplicate {
            return Err(EngineError::repository(format!(
                "block slug '{}' already exists in scope",
                block.slug
            )));
        }
        rows.insert(block.id, block.clone());
        Ok(())
    }

    async fn update(&self, block: &BlockDefinition) -> Result<(), EngineError> {
        let mut rows = self.rows.write().await;
        match rows.get(&block.id) {
            Some(existing) if block.version < existing.version => {
                Err(EngineError::repository(format!(
                    "version regression for block '{}': {} -> {}",
                    block.slug, existing.version, block.version
                )))
            }
            Some(_) => {
                rows.insert(block.id, block.clone());
                Ok(())
            }
            None => Err(EngineError::not_found("block definition", block.id)),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<(), EngineError> {
        self.rows.write().await.remove(&id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryBlockVersionRepo {
    rows: RwLock<Vec<BlockVersion>>,
}

#[async_trait]
impl BlockVersionRepo for InMemoryBlockVersionRepo {
    async fn create(&self, version: &BlockVersion) -> Result<(), EngineError> {
        self.rows.write().await.push(version.clone());
        Ok(())
    }

    async fn list_by_block(&self, block_id: Uuid) -> Result<Vec<BlockVersion>, EngineError> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .filter(|v| v.block_definition_id == block_id)
            .cloned()
            .collect())
    }
}

pub struct InMemoryWorkflowRepo {
    rows: RwLock<HashMap<Uuid, Workflow>>,
    steps: Arc<InMemoryStepRepo>,
    edges: Arc<InMemoryEdgeRepo>,
    groups: Arc<InMemoryBlockGroupRepo>,
}

#[async_trait]
impl WorkflowRepo for InMemoryWorkflowRepo {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Workflow>, EngineError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn get_by_system_slug(
        &self,
        tenant: Option<Uuid>,
        slug: &str,
    ) -> Result<Option<Workflow>, EngineError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .find(|w| w.tenant_id == tenant && w.system_slug.as_deref() == Some(slug))
            .cloned())
    }

    async fn list(
        &self,
        tenant: Option<Uuid>,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<Workflow>, EngineError> {
        let rows = self.rows.read().await;
        let mut matches: Vec<Workflow> = rows
            .values()
            .filter(|w| w.tenant_id == tenant)
            .filter(|w| status.map_or(true, |s| w.status == s))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(matches)
    }

    async fn create(&self, workflow: &Workflow) -> Result<(), EngineError> {
        self.rows.write().await.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn update(&self, workflow: &Workflow) -> Result<(), EngineError> {
        let mut rows = self.rows.write().await;
        if !rows.contains_key(&workflow.id) {
            return Err(EngineError::not_found("workflow", workflow.id));
        }
        rows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn get_with_graph(&self, id: Uuid) -> Result<Option<WorkflowGraphData>, EngineError> {
        let workflow = match self.get_by_id(id).await? {
            Some(workflow) => workflow,
            None => return Ok(None),
        };
        Ok(Some(WorkflowGraphData {
            steps: self.steps.list_by_workflow(id).await?,
            edges: self.edges.list_by_workflow(id).await?,
            groups: self.groups.list_by_workflow(id).await?,
            workflow,
        }))
    }
}

#[derive(Default)]
pub struct InMemoryStepRepo {
    rows: RwLock<HashMap<Uuid, Step>>,
}

#[async_trait]
impl StepRepo for InMemoryStepRepo {
    async fn list_by_workflow(&self, workflow_id: Uuid) -> Result<Vec<Step>, EngineError> {
        let rows = self.rows.read().await;
        let mut matches: Vec<Step> = rows
            .values()
            .filter(|s| s.workflow_id == workflow_id)
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(matches)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Step>, EngineError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn create(&self, step: &Step) -> Result<(), EngineError> {
        let mut rows = self.rows.write().await;
        let duplicate = rows
            .values()
            .any(|s| s.workflow_id == step.workflow_id && s.name == step.name);
        if duplicate {
            return Err(EngineError::repository(format!(
                "step name '{}' already exists in workflow",
                step.name
            )));
        }
        rows.insert(step.id, step.clone());
        Ok(())
    }

    async fn update(&self, step: &Step) -> Result<(), EngineError> {
        let mut rows = self.rows.write().await;
        if !rows.contains_key(&step.id) {
            return Err(EngineError::not_found("step", step.id));
        }
        rows.insert(step.id, step.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), EngineError> {
        self.rows.write().await.remove(&id);
        Ok(())
    }

    async fn delete_by_workflow(&self, workflow_id: Uuid) -> Result<usize, EngineError> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, s| s.workflow_id != workflow_id);
        Ok(before - rows.len())
    }
}

#[derive(Default)]
pub struct InMemoryEdgeRepo {
    rows: RwLock<HashMap<Uuid, Edge>>,
}

#[async_trait]
impl EdgeRepo for InMemoryEdgeRepo {
    async fn list_by_workflow(&self, workflow_id: Uuid) -> Result<Vec<Edge>, EngineError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Edge>, EngineError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn create(&self, edge: &Edge) -> Result<(), EngineError> {
        if !edge.endpoints_valid() {
            return Err(EngineError::validation(
                "edge must have exactly one source and one target endpoint",
            ));
        }
        self.rows.write().await.insert(edge.id, edge.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), EngineError> {
        self.rows.write().await.remove(&id);
        Ok(())
    }

    async fn delete_by_workflow(&self, workflow_id: Uuid) -> Result<usize, EngineError> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, e| e.workflow_id != workflow_id);
        Ok(before - rows.len())
    }
}

#[derive(Default)]
pub struct InMemoryBlockGroupRepo {
    rows: RwLock<HashMap<Uuid, BlockGroup>>,
}

#[async_trait]
impl BlockGroupRepo for InMemoryBlockGroupRepo {
    async fn list_by_workflow(&self, workflow_id: Uuid) -> Result<Vec<BlockGroup>, EngineError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|g| g.workflow_id == workflow_id)
            .cloned()
            .collect())
    }

    async fn create(&self, group: &BlockGroup) -> Result<(), EngineError> {
        self.rows.write().await.insert(group.id, group.clone());
        Ok(())
    }

    async fn update(&self, group: &BlockGroup) -> Result<(), EngineError> {
        let mut rows = self.rows.write().await;
        if !rows.contains_key(&group.id) {
            return Err(EngineError::not_found("block group", group.id));
        }
        rows.insert(group.id, group.clone());
        Ok(())
    }

    async fn delete_by_workflow(&self, workflow_id: Uuid) -> Result<usize, EngineError> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, g| g.workflow_id != workflow_id);
        Ok(before - rows.len())
    }
}

#[derive(Default)]
pub struct InMemoryRunRepo {
    rows: RwLock<HashMap<Uuid, WorkflowRun>>,
}

#[async_trait]
impl RunRepo for InMemoryRunRepo {
    async fn create(&self, run: &WorkflowRun) -> Result<(), EngineError> {
        self.rows.write().await.insert(run.id, run.clone());
        Ok(())
    }

    async fn update(&self, run: &WorkflowRun) -> Result<(), EngineError> {
        let mut rows = self.rows.write().await;
        let existing = rows
            .get(&run.id)
            .ok_or_else(|| EngineError::not_found("workflow run", run.id))?;
        if existing.status != run.status && !existing.status.can_transition_to(run.status) {
            return Err(EngineError::repository(format!(
                "illegal run status transition {:?} -> {:?}",
                existing.status, run.status
            )));
        }
        rows.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<WorkflowRun>, EngineError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn list_by_workflow(
        &self,
        workflow_id: Uuid,
        filter: RunFilter,
    ) -> Result<Vec<WorkflowRun>, EngineError> {
        let rows = self.rows.read().await;
        let mut matches: Vec<WorkflowRun> = rows
            .values()
            .filter(|r| r.workflow_id == workflow_id)
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }
}

#[derive(Default)]
pub struct InMemoryStepRunRepo {
    rows: RwLock<HashMap<Uuid, StepRun>>,
}

#[async_trait]
impl StepRunRepo for InMemoryStepRunRepo {
    async fn create(&self, step_run: &StepRun) -> Result<(), EngineError> {
        self.rows.write().await.insert(step_run.id, step_run.clone());
        Ok(())
    }

    async fn update(&self, step_run: &StepRun) -> Result<(), EngineError> {
        let mut rows = self.rows.write().await;
        let existing = rows
            .get(&step_run.id)
            .ok_or_else(|| EngineError::not_found("step run", step_run.id))?;
        if existing.status != step_run.status
            && !existing.status.can_transition_to(step_run.status)
        {
            return Err(EngineError::repository(format!(
                "illegal step run status transition {:?} -> {:?}",
                existing.status, step_run.status
            )));
        }
        rows.insert(step_run.id, step_run.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<StepRun>, EngineError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn list_by_run(&self, workflow_run_id: Uuid) -> Result<Vec<StepRun>, EngineError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|r| r.workflow_run_id == workflow_run_id)
            .cloned()
            .collect())
    }
}

/// The full backend bundle: every contract served in memory.
pub struct MemoryStore {
    pub blocks: Arc<InMemoryBlockDefinitionRepo>,
    pub block_versions: Arc<InMemoryBlockVersionRepo>,
    pub workflows: Arc<InMemoryWorkflowRepo>,
    pub steps: Arc<InMemoryStepRepo>,
    pub edges: Arc<InMemoryEdgeRepo>,
    pub groups: Arc<InMemoryBlockGroupRepo>,
    pub runs: Arc<InMemoryRunRepo>,
    pub step_runs: Arc<InMemoryStepRunRepo>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let steps = Arc::new(InMemoryStepRepo::default());
        let edges = Arc::new(InMemoryEdgeRepo::default());
        let groups = Arc::new(InMemoryBlockGroupRepo::default());
        Self {
            blocks: Arc::new(InMemoryBlockDefinitionRepo::default()),
            block_versions: Arc::new(InMemoryBlockVersionRepo::default()),
            workflows: Arc::new(InMemoryWorkflowRepo {
                rows: RwLock::new(HashMap::new()),
                steps: steps.clone(),
                edges: edges.clone(),
                groups: groups.clone(),
            }),
            steps,
            edges,
            groups,
            runs: Arc::new(InMemoryRunRepo::default()),
            step_runs: Arc::new(InMemoryStepRunRepo::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}
