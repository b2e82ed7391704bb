//! Workflow seed migration: creation with temp-id resolution, port
//! validation against inherited surfaces, delete-and-recreate updates,
//! and input-schema derivation.

use serde_json::json;
use std::sync::Arc;

use stepflow_core::model::GroupType;
use stepflow_core::repo::memory::MemoryStore;
use stepflow_core::repo::{
    BlockGroupRepo as _, EdgeRepo as _, StepRepo as _, WorkflowRepo as _,
};
use stepflow_core::resolver::BlockResolver;
use stepflow_migrate::seed::builtin_blocks;
use stepflow_migrate::{
    BlockMigrator, EdgeSeed, GroupSeed, StepSeed, WorkflowMigrator, WorkflowSeed,
};

async fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    BlockMigrator::new(store.blocks.clone(), store.block_versions.clone())
        .migrate(&builtin_blocks())
        .await
        .unwrap();
    store
}

fn migrator(store: &MemoryStore) -> WorkflowMigrator {
    WorkflowMigrator::new(
        store.workflows.clone(),
        store.steps.clone(),
        store.edges.clone(),
        store.groups.clone(),
        store.blocks.clone(),
        Arc::new(BlockResolver::new(store.blocks.clone())),
    )
}

fn step(key: &str, step_type: &str, config: serde_json::Value) -> StepSeed {
    StepSeed {
        key: key.into(),
        name: key.into(),
        step_type: step_type.into(),
        config,
        position: Default::default(),
        group: None,
        role: None,
        trigger: None,
    }
}

fn edge(source: &str, target: &str) -> EdgeSeed {
    EdgeSeed {
        source: source.into(),
        target: target.into(),
        source_port: None,
        target_port: None,
        condition: None,
    }
}

fn sample_seed(version: i32) -> WorkflowSeed {
    let mut start = step("start", "start", json!({}));
    start.trigger = Some(stepflow_core::model::TriggerType::Manual);
    WorkflowSeed {
        slug: "sample".into(),
        name: "Sample".into(),
        description: String::new(),
        status: stepflow_core::model::WorkflowStatus::Published,
        version,
        input_schema: json!({"type": "object"}),
        output_schema: json!({}),
        steps: vec![
            start,
            step("fetch", "github-api", json!({"url": "https://api.github.com/repos/x"})),
        ],
        groups: vec![],
        edges: vec![edge("start", "fetch")],
    }
}

#[tokio::test]
async fn creates_workflow_with_resolved_references() {
    let store = seeded_store().await;
    let report = migrator(&store).migrate(&[sample_seed(1)]).await.unwrap();
    assert_eq!(report.created(), 1);

    let workflow = store
        .workflows
        .get_by_system_slug(None, "sample")
        .await
        .unwrap()
        .unwrap();
    assert!(workflow.tenant_id.is_none());

    let steps = store.steps.list_by_workflow(workflow.id).await.unwrap();
    assert_eq!(steps.len(), 2);
    let fetch = steps.iter().find(|s| s.name == "fetch").unwrap();
    // Step rows are bound to the concrete definition backing their slug.
    let github = store
        .blocks
        .get_by_slug(None, "github-api")
        .await
        .unwrap()
        .unwrap();
    use stepflow_core::repo::BlockDefinitionRepo as _;
    assert_eq!(fetch.block_definition_id, Some(github.id));

    let edges = store.edges.list_by_workflow(workflow.id).await.unwrap();
    assert_eq!(edges.len(), 1);
    let start = steps.iter().find(|s| s.name == "start").unwrap();
    assert_eq!(edges[0].source_step_id, Some(start.id));
    assert_eq!(edges[0].target_step_id, Some(fetch.id));
}

#[tokio::test]
async fn same_version_rerun_is_unchanged() {
    let store = seeded_store().await;
    let m = migrator(&store);
    m.migrate(&[sample_seed(1)]).await.unwrap();

    let report = m.migrate(&[sample_seed(1)]).await.unwrap();
    assert_eq!(report.unchanged(), 1);
    assert_eq!(report.created(), 0);
    assert_eq!(report.updated(), 0);
}

#[tokio::test]
async fn version_bump_recreates_the_graph_rows() {
    let store = seeded_store().await;
    let m = migrator(&store);
    m.migrate(&[sample_seed(1)]).await.unwrap();
    let before = store
        .workflows
        .get_by_system_slug(None, "sample")
        .await
        .unwrap()
        .unwrap();

    let mut bumped = sample_seed(2);
    bumped.steps.push(step(
        "notify",
        "http",
        json!({"url": "https://hooks.example.com"}),
    ));
    bumped.edges.push(edge("fetch", "notify"));

    let report = m.migrate(&[bumped]).await.unwrap();
    assert_eq!(report.updated(), 1);

    let after = store
        .workflows
        .get_by_system_slug(None, "sample")
        .await
        .unwrap()
        .unwrap();
    // Same row, new version, fully recreated graph.
    assert_eq!(after.id, before.id);
    assert_eq!(after.version, 2);
    let steps = store.steps.list_by_workflow(after.id).await.unwrap();
    assert_eq!(steps.len(), 3);
    let edges = store.edges.list_by_workflow(after.id).await.unwrap();
    assert_eq!(edges.len(), 2);
}

#[tokio::test]
async fn unknown_source_port_fails_validation() {
    let store = seeded_store().await;
    let mut seed = sample_seed(1);
    seed.edges[0].source_port = Some("no-such-port".into());

    let error = migrator(&store).migrate(&[seed]).await.unwrap_err();
    assert_eq!(error.kind(), "validation");
    assert!(error.to_string().contains("no-such-port"));
}

#[tokio::test]
async fn inherited_output_ports_satisfy_validation() {
    let store = seeded_store().await;
    let mut seed = sample_seed(1);
    // `error` is declared on `http`, three levels above `github-api`.
    seed.steps.push(step("cleanup", "http", json!({"url": "https://x"})));
    seed.edges.push(EdgeSeed {
        source: "fetch".into(),
        target: "cleanup".into(),
        source_port: Some("error".into()),
        target_port: None,
        condition: None,
    });

    let report = migrator(&store).migrate(&[seed]).await.unwrap();
    assert_eq!(report.created(), 1);
}

#[tokio::test]
async fn group_edges_use_the_reserved_input_port() {
    let store = seeded_store().await;
    let mut seed = sample_seed(1);
    seed.groups.push(GroupSeed {
        key: "fan".into(),
        name: "fan".into(),
        group_type: GroupType::Parallel,
        config: json!({}),
        parent: None,
        pre_script: None,
        post_script: None,
    });
    let mut worker = step("worker", "http", json!({"url": "https://x"}));
    worker.group = Some("fan".into());
    seed.steps.push(worker);
    seed.edges.push(EdgeSeed {
        source: "fetch".into(),
        target: "fan".into(),
        source_port: None,
        target_port: Some("group-input".into()),
        condition: None,
    });

    migrator(&store).migrate(&[seed.clone()]).await.unwrap();

    let workflow = store
        .workflows
        .get_by_system_slug(None, "sample")
        .await
        .unwrap()
        .unwrap();
    let groups = store.groups.list_by_workflow(workflow.id).await.unwrap();
    assert_eq!(groups.len(), 1);
    let edges = store.edges.list_by_workflow(workflow.id).await.unwrap();
    let group_edge = edges.iter().find(|e| e.target_group_id.is_some()).unwrap();
    assert_eq!(group_edge.target_port, "group-input");

    // A wrong reserved port is rejected.
    let mut bad = seed;
    bad.slug = "sample-2".into();
    bad.edges.last_mut().unwrap().target_port = Some("input".into());
    let error = migrator(&store).migrate(&[bad]).await.unwrap_err();
    assert_eq!(error.kind(), "validation");
}

#[tokio::test]
async fn input_schema_derives_from_first_reachable_block() {
    let store = seeded_store().await;

    // Give github-api's input port a concrete schema to derive from.
    use stepflow_core::repo::BlockDefinitionRepo as _;
    let mut github = store
        .blocks
        .get_by_slug(None, "github-api")
        .await
        .unwrap()
        .unwrap();
    github.inputs = vec![stepflow_core::model::InputPort::new("input")
        .required()
        .with_schema(json!({"type": "object", "properties": {"repo": {"type": "string"}}}))];
    store.blocks.update(&github).await.unwrap();

    migrator(&store).migrate(&[sample_seed(1)]).await.unwrap();
    let workflow = store
        .workflows
        .get_by_system_slug(None, "sample")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        workflow.input_schema["properties"]["repo"]["type"],
        "string"
    );
}

#[tokio::test]
async fn builtin_workflow_seeds_migrate_cleanly() {
    let store = seeded_store().await;
    let report = migrator(&store)
        .migrate(&stepflow_migrate::seed::builtin_workflows())
        .await
        .unwrap();
    assert_eq!(report.created(), report.entries.len());
}
