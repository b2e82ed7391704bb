//! # stepflow-tools
//!
//! The engine tool surface exposed to the copilot subsystem: a set of
//! named tools with declared JSON-schema inputs, dispatched over the
//! engine's repository contracts. Tools cover catalog browsing
//! (`list_blocks`, `get_block_schema`, `search_blocks`), workflow
//! inspection (`list_workflows`, `get_workflow`, `get_workflow_runs`),
//! documentation search, structural diagnosis (`diagnose_workflow`,
//! `validate_workflow`), and graph editing (`create_step`, `update_step`,
//! `delete_step`, `create_edge`, `delete_edge`).
//!
//! Failures surface as tool-result errors, never as transport errors: a
//! caller always receives a [`ToolResult`], with `is_error` set and the
//! message in the content.

mod docs;
mod server;
mod types;

pub use server::EngineToolServer;
pub use types::{ToolDefinition, ToolResult};
