//! Topological seed migration over the inheritance family, idempotent
//! re-runs, version-bump updates, tenant protection, and cycle failure.

use uuid::Uuid;

use stepflow_core::model::{BlockCategory, BlockDefinition};
use stepflow_core::repo::memory::MemoryStore;
use stepflow_core::repo::{BlockDefinitionRepo as _, BlockVersionRepo as _};
use stepflow_core::EngineError;
use stepflow_migrate::{BlockMigrator, BlockRegistry, BlockSeed};

/// The api family, registered deliberately out of dependency order.
fn api_family() -> BlockRegistry {
    let mut registry = BlockRegistry::new();
    registry.register(BlockSeed::new("github-api", BlockCategory::Apps).with_parent("bearer-api"));
    registry.register(BlockSeed::new("bearer-api", BlockCategory::Apps).with_parent("rest-api"));
    registry.register(BlockSeed::new("http", BlockCategory::Apps));
    registry.register(BlockSeed::new("rest-api", BlockCategory::Apps).with_parent("http"));
    registry
}

fn migrator(store: &MemoryStore) -> BlockMigrator {
    BlockMigrator::new(store.blocks.clone(), store.block_versions.clone())
}

#[tokio::test]
async fn fresh_database_creates_parents_before_children() {
    let store = MemoryStore::new();
    let report = migrator(&store).migrate(&api_family()).await.unwrap();

    assert_eq!(report.created(), 4);
    assert_eq!(report.order(), vec!["http", "rest-api", "bearer-api", "github-api"]);

    let github = store
        .blocks
        .get_by_slug(None, "github-api")
        .await
        .unwrap()
        .unwrap();
    assert!(github.tenant_id.is_none());

    // Every create took an "Initial seed" snapshot.
    let versions = store
        .block_versions
        .list_by_block(github.id)
        .await
        .unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].reason, "Initial seed");
}

#[tokio::test]
async fn rerun_of_unchanged_seed_is_a_noop() {
    let store = MemoryStore::new();
    let m = migrator(&store);
    m.migrate(&api_family()).await.unwrap();

    let report = m.migrate(&api_family()).await.unwrap();
    assert_eq!(report.created(), 0);
    assert_eq!(report.updated(), 0);
    assert_eq!(report.unchanged(), 4);
}

#[tokio::test]
async fn version_bump_updates_only_the_changed_block() {
    let store = MemoryStore::new();
    let m = migrator(&store);
    m.migrate(&api_family()).await.unwrap();

    let mut bumped = api_family();
    let mut changed = BlockSeed::new("github-api", BlockCategory::Apps)
        .with_parent("bearer-api")
        .with_version(2);
    changed.code = Some("request('gh')".into());
    // Replace the github entry with the bumped one.
    let mut registry = BlockRegistry::new();
    for seed in bumped.seeds() {
        if seed.slug != "github-api" {
            registry.register(seed.clone());
        }
    }
    registry.register(changed);
    bumped = registry;

    let report = migrator(&store).migrate(&bumped).await.unwrap();
    assert_eq!(report.updated(), 1);
    assert_eq!(report.unchanged(), 3);
    assert_eq!(report.created(), 0);

    let github = store
        .blocks
        .get_by_slug(None, "github-api")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(github.version, 2);
    assert_eq!(github.code.as_deref(), Some("request('gh')"));

    // Initial seed snapshot plus the pre-update snapshot of version 1.
    let versions = store
        .block_versions
        .list_by_block(github.id)
        .await
        .unwrap();
    assert_eq!(versions.len(), 2);
    assert!(versions.iter().any(|v| v.reason == "Pre-update snapshot" && v.version == 1));
}

#[tokio::test]
async fn tenant_owned_slugs_are_never_overwritten() {
    let store = MemoryStore::new();
    let mut tenant_block = BlockDefinition::system("custom-api", BlockCategory::Custom);
    tenant_block.tenant_id = Some(Uuid::new_v4());
    tenant_block.code = Some("tenant code".into());
    store.blocks.create(&tenant_block).await.unwrap();

    let mut registry = BlockRegistry::new();
    registry.register(BlockSeed::new("custom-api", BlockCategory::Custom));

    let report = migrator(&store).migrate(&registry).await.unwrap();
    assert_eq!(report.skipped(), 1);
    assert_eq!(report.created(), 0);

    let untouched = store.blocks.get_by_id(tenant_block.id).await.unwrap().unwrap();
    assert_eq!(untouched.code.as_deref(), Some("tenant code"));
    // And no system row was created either.
    assert!(store.blocks.get_by_slug(None, "custom-api").await.unwrap().is_none());
}

#[tokio::test]
async fn parent_cycles_fail_the_migration() {
    let store = MemoryStore::new();
    let mut registry = BlockRegistry::new();
    registry.register(BlockSeed::new("a", BlockCategory::Custom).with_parent("b"));
    registry.register(BlockSeed::new("b", BlockCategory::Custom).with_parent("a"));
    registry.register(BlockSeed::new("standalone", BlockCategory::Custom));

    let error = migrator(&store).migrate(&registry).await.unwrap_err();
    match error {
        EngineError::CircularDependency { remaining } => {
            assert_eq!(remaining, vec!["a".to_string(), "b".to_string()]);
        }
        other => panic!("expected CircularDependency, got {other:?}"),
    }
}

#[tokio::test]
async fn parent_outside_registry_imposes_no_ordering() {
    let store = MemoryStore::new();
    let m = migrator(&store);

    let mut base = BlockRegistry::new();
    base.register(BlockSeed::new("http", BlockCategory::Apps));
    m.migrate(&base).await.unwrap();

    // A later wave seeds only the child; its parent already exists.
    let mut wave = BlockRegistry::new();
    wave.register(BlockSeed::new("rest-api", BlockCategory::Apps).with_parent("http"));
    let report = m.migrate(&wave).await.unwrap();
    assert_eq!(report.created(), 1);
}

#[tokio::test]
async fn builtin_registry_migrates_cleanly_and_idempotently() {
    let store = MemoryStore::new();
    let m = migrator(&store);

    let first = m.migrate(&stepflow_migrate::seed::builtin_blocks()).await.unwrap();
    assert_eq!(first.created(), first.entries.len());

    let second = m.migrate(&stepflow_migrate::seed::builtin_blocks()).await.unwrap();
    assert_eq!(second.created(), 0);
    assert_eq!(second.updated(), 0);
    assert_eq!(second.unchanged(), second.entries.len());
}
