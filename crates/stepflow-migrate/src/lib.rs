//! # stepflow-migrate
//!
//! Reconciles seed registries of block and workflow definitions against
//! persisted storage. Blocks are upserted in topological parent order
//! (Kahn's algorithm) with version snapshots around seed updates; workflow
//! seeds are parsed with temp ids, validated against the inherited port
//! surfaces of their blocks, and recreated wholesale on change. Seed
//! migration only ever touches system-owned rows; tenant customizations
//! are never overwritten.

pub mod blocks;
pub mod seed;
pub mod workflows;

pub use blocks::{BlockMigrator, BlockRegistry, BlockSeed};
pub use workflows::{EdgeSeed, GroupSeed, ProjectMigrator, StepSeed, WorkflowMigrator, WorkflowSeed};

use serde::{Deserialize, Serialize};

/// What the migrator did with one seed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationAction {
    Created,
    Updated,
    Unchanged,
    /// A tenant-owned row holds the slug; seeds never overwrite it
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationEntry {
    pub slug: String,
    pub action: MigrationAction,
}

/// Ordered record of one migration pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationReport {
    pub entries: Vec<MigrationEntry>,
}

impl MigrationReport {
    pub fn push(&mut self, slug: impl Into<String>, action: MigrationAction) {
        self.entries.push(MigrationEntry {
            slug: slug.into(),
            action,
        });
    }

    pub fn count(&self, action: MigrationAction) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }

    pub fn created(&self) -> usize {
        self.count(MigrationAction::Created)
    }

    pub fn updated(&self) -> usize {
        self.count(MigrationAction::Updated)
    }

    pub fn unchanged(&self) -> usize {
        self.count(MigrationAction::Unchanged)
    }

    pub fn skipped(&self) -> usize {
        self.count(MigrationAction::Skipped)
    }

    /// Slugs in processing order, for asserting topological behavior.
    pub fn order(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.slug.as_str()).collect()
    }
}
