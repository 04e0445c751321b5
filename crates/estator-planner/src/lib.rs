//! The planning stage of the Estator pipeline.
//!
//! The [`PlannerWorker`] consumes dispatch messages for root jobs, claims
//! each job through the store's compare-and-swap, asks a [`Decomposer`] to
//! turn the query into an ordered set of task descriptors, fans the plan out
//! into child jobs, invokes the downstream agents, and records a summary of
//! every child outcome on the parent.
//!
//! The [`Reconciler`] is the safety net for at-least-once delivery: it
//! fails jobs whose dispatch messages exhausted their redelivery budget and
//! jobs orphaned mid-claim.

/// Decomposition seam: LLM-backed and rule-based planners.
pub mod decomposer;
/// Dead-letter and stale-claim reconciliation sweep.
pub mod reconciler;
/// The planner worker loop.
pub mod worker;

pub use decomposer::{Decomposer, LlmConfig, LlmDecomposer, RuleDecomposer};
pub use reconciler::{Reconciler, ReconcilerReport};
pub use worker::PlannerWorker;
