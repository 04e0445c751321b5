//! Shared types for the Estator job orchestration pipeline.
//!
//! Every worker in the pipeline — intake, planner, downstream agents —
//! communicates through the types defined here: the durable [`Job`] record,
//! its status state machine, the decomposition [`Plan`], and the workspace
//! error taxonomy.
//!
//! # Main types
//!
//! - [`Job`] — the single persistent entity tracking a unit of work.
//! - [`JobStatus`] / [`JobType`] — closed enumerations with the transition graph.
//! - [`Plan`] / [`TaskDescriptor`] — output of the decomposition call.
//! - [`EstatorError`] — error taxonomy shared across all crates.

/// Workspace error taxonomy.
pub mod error;
/// The durable job record and its status state machine.
pub mod job;
/// Decomposition plan and task descriptor types.
pub mod plan;

pub use error::{EstatorError, EstatorResult};
pub use job::{Job, JobStatus, JobType, NewJob};
pub use plan::{ChildOutcome, Plan, PlanSummary, TaskDescriptor};
