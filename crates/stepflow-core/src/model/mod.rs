//! # Engine Data Model
//!
//! Serde-backed entity types shared by the scheduler, executor, resolver,
//! migrator, and repository layer. Block definitions form an inheritance
//! taxonomy (`parent_slug` chains) that the resolver flattens into
//! [`crate::resolver::EffectiveBlock`] values before execution; workflows
//! are persisted as step/edge/group rows and rebuilt into an in-memory
//! graph at run start.

mod block;
mod policy;
mod run;
mod workflow;

pub use block::{
    BlockCategory, BlockDefinition, BlockErrorCode, BlockVersion, InputPort, InternalStep,
    OutputPort,
};
pub use policy::{Backoff, ErrorPolicy, OnError};
pub use run::{RunStatus, StepRun, WorkflowRun};
pub use workflow::{
    BlockGroup, Edge, GroupType, Position, Size, Step, TriggerType, Workflow, WorkflowGraphData,
    WorkflowStatus, GROUP_INPUT_PORT,
};
