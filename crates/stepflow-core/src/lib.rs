//! # stepflow-core
//!
//! Core execution engine of the stepflow orchestration platform: a
//! directed-graph scheduler for AI-centric pipelines with inheritable
//! block definitions, port-aware conditional routing, container block
//! groups, and uniform adapter dispatch.
//!
//! ## Architecture
//!
//! - [`model`] — persisted entity types: block definitions with parent
//!   chains, workflows, steps, edges, block groups, runs
//! - [`resolver`] — flattens a block's parent chain into an effective
//!   definition, cached per (slug, version)
//! - [`template`] — `{{dotted.path}}` substitution over the run context
//! - [`adapter`] — the uniform external-integration contract and registry
//! - [`script`] — the injected script-host capability
//! - [`executor`] — runs one step: merge config, expand templates, dispatch,
//!   retry, apply `on_error`, persist the step run
//! - [`scheduler`] — ready-set computation, edge routing, block-group
//!   semantics, and the run lifecycle
//! - [`repo`] — narrow async persistence contracts plus the in-memory
//!   backend
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use stepflow_core::adapter::{AdapterRegistry, MockAdapter};
//! use stepflow_core::config::EngineConfig;
//! use stepflow_core::executor::StepExecutor;
//! use stepflow_core::repo::memory::MemoryStore;
//! use stepflow_core::resolver::BlockResolver;
//! use stepflow_core::scheduler::{RunOptions, Scheduler};
//!
//! # async fn demo(workflow_id: uuid::Uuid) -> Result<(), stepflow_core::error::EngineError> {
//! let store = MemoryStore::new();
//! let mut registry = AdapterRegistry::new();
//! registry.register(Arc::new(MockAdapter::returning("llm", json!({"content": "hi"}))));
//! let adapters = Arc::new(registry);
//!
//! let resolver = Arc::new(BlockResolver::new(store.blocks.clone()));
//! let executor = Arc::new(StepExecutor::new(
//!     resolver,
//!     adapters.clone(),
//!     store.step_runs.clone(),
//!     EngineConfig::default(),
//! ));
//! let scheduler = Scheduler::new(
//!     store.workflows.clone(),
//!     store.runs.clone(),
//!     executor,
//!     adapters,
//!     EngineConfig::default(),
//! );
//!
//! let run = scheduler
//!     .run(workflow_id, json!({"topic": "cats"}), RunOptions::default())
//!     .await?;
//! println!("run {} finished: {:?}", run.id, run.status);
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod condition;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod model;
pub mod repo;
pub mod resolver;
pub mod scheduler;
pub mod script;
pub mod template;
pub mod testing;
pub mod util;

pub use error::EngineError;
pub use model::{RunStatus, StepRun, WorkflowRun};
pub use scheduler::{RunOptions, Scheduler};
