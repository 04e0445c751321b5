use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of agent work a job represents. Closed enumeration; every downstream
/// worker handles exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Classifies the intent behind a raw user query.
    IntentClassification,
    /// Decomposes a query into downstream steps (the planner itself).
    Planning,
    /// Finds property listings matching criteria.
    Search,
    /// Estimates property values and comparables.
    Valuation,
    /// Verifies legal compliance and registry entries.
    LegalCheck,
    /// Checks data integrity and fraud signals.
    Verification,
    /// Produces the final report for the user.
    Summarization,
}

impl JobType {
    /// Parse the snake_case wire name used in plans and the persisted column.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "intent_classification" => Some(JobType::IntentClassification),
            "planning" => Some(JobType::Planning),
            "search" => Some(JobType::Search),
            "valuation" => Some(JobType::Valuation),
            "legal_check" => Some(JobType::LegalCheck),
            "verification" => Some(JobType::Verification),
            "summarization" => Some(JobType::Summarization),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobType::IntentClassification => "intent_classification",
            JobType::Planning => "planning",
            JobType::Search => "search",
            JobType::Valuation => "valuation",
            JobType::LegalCheck => "legal_check",
            JobType::Verification => "verification",
            JobType::Summarization => "summarization",
        };
        write!(f, "{s}")
    }
}

/// Execution status of a job. The transition graph is a one-way DAG:
/// `Pending → InProgress → {Completed, Failed}`, with `Cancelled` reachable
/// from either non-terminal state. Terminal states have no exit edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not yet claimed by a worker.
    Pending,
    /// Claimed by a worker.
    InProgress,
    /// Finished successfully; `response_payload` is set.
    Completed,
    /// Finished unsuccessfully; `error_message` is set.
    Failed,
    /// Cancelled externally before completion.
    Cancelled,
}

impl JobStatus {
    /// Whether this status admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the edge `self → next` exists in the status graph.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::InProgress) => true,
            (JobStatus::InProgress, JobStatus::Completed | JobStatus::Failed) => true,
            (JobStatus::Pending | JobStatus::InProgress, JobStatus::Cancelled) => true,
            _ => false,
        }
    }

    /// Parse the snake_case persisted column value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "in_progress" => Some(JobStatus::InProgress),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A unit of trackable work with durable state. The job row is the only
/// shared mutable resource in the system; all mutation goes through the
/// repository's compare-and-swap transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Opaque unique identifier, immutable, primary key.
    pub job_id: String,
    /// Kind of work. Immutable after creation.
    pub job_type: JobType,
    /// Current status; moves only along the graph edges.
    pub status: JobStatus,
    /// Input data, set at creation, immutable thereafter.
    pub request_payload: serde_json::Value,
    /// Output data; set together with `completed_at` on entering a terminal state.
    pub response_payload: Option<serde_json::Value>,
    /// Failure detail; set only on transition into `Failed`.
    pub error_message: Option<String>,
    /// Redelivery counter, bumped by the dispatch layer only.
    pub retry_count: u32,
    /// Parent job for fan-out children; `None` for root jobs.
    pub parent_job_id: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Refreshed on every mutation.
    pub updated_at: DateTime<Utc>,
    /// Set exactly once, on entering a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Parameters for creating a job. `job_id` may be caller-supplied (the
/// idempotency boundary) or generated.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_id: String,
    pub job_type: JobType,
    pub request_payload: serde_json::Value,
    pub parent_job_id: Option<String>,
}

impl NewJob {
    /// New root job with a generated id.
    pub fn root(job_type: JobType, request_payload: serde_json::Value) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            job_type,
            request_payload,
            parent_job_id: None,
        }
    }

    /// New job with a caller-supplied id.
    pub fn with_id(
        job_id: impl Into<String>,
        job_type: JobType,
        request_payload: serde_json::Value,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            job_type,
            request_payload,
            parent_job_id: None,
        }
    }

    /// Attach a parent job id, making this a child job.
    pub fn with_parent(mut self, parent_job_id: impl Into<String>) -> Self {
        self.parent_job_id = Some(parent_job_id.into());
        self
    }

    /// Materialize the initial row: `Pending`, fresh timestamps.
    pub fn into_job(self, now: DateTime<Utc>) -> Job {
        Job {
            job_id: self.job_id,
            job_type: self.job_type,
            status: JobStatus::Pending,
            request_payload: self.request_payload,
            response_payload: None,
            error_message: None,
            retry_count: 0,
            parent_job_id: self.parent_job_id,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_graph_forward_edges() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::InProgress));
        assert!(JobStatus::InProgress.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::InProgress.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::InProgress.can_transition_to(JobStatus::Cancelled));
    }

    #[test]
    fn test_status_graph_rejects_backward_edges() {
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::InProgress));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Cancelled.can_transition_to(JobStatus::InProgress));
        assert!(!JobStatus::InProgress.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn test_terminal_states_have_no_exit() {
        let all = [
            JobStatus::Pending,
            JobStatus::InProgress,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ];
        for from in all {
            if !from.is_terminal() {
                continue;
            }
            for to in all {
                assert!(
                    !from.can_transition_to(to),
                    "terminal {from} must not move to {to}"
                );
            }
        }
    }

    #[test]
    fn test_status_serde_snake_case() {
        let json = serde_json::to_string(&JobStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let parsed: JobStatus = serde_json::from_str("\"cancelled\"").unwrap();
        assert_eq!(parsed, JobStatus::Cancelled);
    }

    #[test]
    fn test_job_type_parse_roundtrip() {
        for t in [
            JobType::IntentClassification,
            JobType::Planning,
            JobType::Search,
            JobType::Valuation,
            JobType::LegalCheck,
            JobType::Verification,
            JobType::Summarization,
        ] {
            assert_eq!(JobType::parse(&t.to_string()), Some(t));
        }
        assert_eq!(JobType::parse("SEARCH"), Some(JobType::Search));
        assert_eq!(JobType::parse("ranking"), None);
    }

    #[test]
    fn test_new_job_into_job() {
        let now = Utc::now();
        let job = NewJob::with_id("j-1", JobType::Planning, serde_json::json!({"q": "x"}))
            .into_job(now);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert!(job.response_payload.is_none());
        assert!(job.completed_at.is_none());
        assert_eq!(job.created_at, job.updated_at);
    }

    #[test]
    fn test_child_builder() {
        let job = NewJob::with_id("j-1-search-abc", JobType::Search, serde_json::json!({}))
            .with_parent("j-1")
            .into_job(Utc::now());
        assert_eq!(job.parent_job_id.as_deref(), Some("j-1"));
    }
}
