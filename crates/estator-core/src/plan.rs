use crate::job::{JobStatus, JobType};
use serde::{Deserialize, Serialize};

/// One step in a decomposition plan: which downstream agent to run and with
/// what input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Downstream agent kind.
    pub agent: JobType,
    /// Action hint for the agent (e.g. `find_listings`, `create_report`).
    #[serde(default)]
    pub action: String,
    /// Input payload for the agent.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Output of the decomposition call: an ordered sequence of task descriptors
/// plus model-provided metadata. A plan with zero steps is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Ordered steps; children are created in this order.
    pub steps: Vec<TaskDescriptor>,
    /// Brief model explanation of the plan.
    #[serde(default)]
    pub reasoning: String,
    /// Model estimate of total execution time.
    #[serde(default)]
    pub estimated_duration_seconds: u64,
    /// Set when the decomposer substituted its fallback plan.
    #[serde(default)]
    pub fallback: bool,
}

impl Plan {
    /// An empty plan, used when a query yields no actionable steps.
    pub fn empty(reasoning: impl Into<String>) -> Self {
        Self {
            steps: Vec::new(),
            reasoning: reasoning.into(),
            estimated_duration_seconds: 0,
            fallback: false,
        }
    }
}

/// Terminal outcome of one child job, recorded in the parent's response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildOutcome {
    pub job_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Response payload written to the parent job on completion: the plan plus
/// the terminal outcome of every child. Partial failure is visible here, not
/// hidden behind a parent-level failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSummary {
    pub plan: Plan,
    pub child_jobs: Vec<String>,
    pub children: Vec<ChildOutcome>,
}

impl PlanSummary {
    /// Summary line in the `completed/total` form used by log output.
    pub fn summary_line(&self) -> String {
        let completed = self
            .children
            .iter()
            .filter(|c| c.status == JobStatus::Completed)
            .count();
        let failed = self
            .children
            .iter()
            .filter(|c| c.status == JobStatus::Failed)
            .count();
        format!(
            "{}/{} children completed, {} failed",
            completed,
            self.children.len(),
            failed
        )
    }
}
