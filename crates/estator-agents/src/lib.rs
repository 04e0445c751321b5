//! Downstream agent workers for the Estator pipeline.
//!
//! Every specialized worker — search, valuation, legal check, verification,
//! summarization — implements the single [`Agent`] capability and is
//! interchangeable from the planner's perspective. Dispatch is a closed
//! tagged lookup through [`AgentRegistry`]; there is no open-ended runtime
//! discovery.
//!
//! Invocation comes in two flavors behind the [`AgentInvoker`] seam:
//! [`DirectInvoker`] blocks for a bounded per-stage timeout and returns the
//! outcome inline, [`QueuedInvoker`] enqueues a dispatch message that the
//! generic [`AgentWorker`] loop consumes.

/// The agent capability trait and registry.
pub mod agent;
/// Deterministic built-in agents for every downstream job type.
pub mod builtins;
/// Synchronous and queued invocation of downstream agents.
pub mod invoker;
/// Generic queue consumer loop for asynchronous stages.
pub mod worker;

pub use agent::{Agent, AgentRegistry, JobDescriptor};
pub use builtins::{
    builtin_registry, IntentClassificationAgent, LegalCheckAgent, SearchAgent, SummarizationAgent,
    ValuationAgent, VerificationAgent,
};
pub use invoker::{AgentInvoker, DirectInvoker, QueuedInvoker};
pub use worker::AgentWorker;
