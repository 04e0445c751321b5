use crate::job::JobStatus;
use thiserror::Error;

/// Result alias used across the workspace.
pub type EstatorResult<T> = Result<T, EstatorError>;

/// Error taxonomy shared by every pipeline component.
#[derive(Error, Debug)]
pub enum EstatorError {
    /// Malformed or missing required input. Surfaced synchronously at intake;
    /// no job is created.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Duplicate `job_id` on create. Idempotent producers treat this as
    /// success and fetch the existing row.
    #[error("Job already exists: {0}")]
    AlreadyExists(String),

    /// Compare-and-swap mismatch on a status transition. Always recoverable
    /// by re-reading current state; never retried blindly.
    #[error("Status conflict: job is {current}")]
    Conflict {
        /// The status the row actually holds.
        current: JobStatus,
    },

    /// No job row with the requested id.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// A downstream invocation exceeded its per-stage timeout.
    #[error("Downstream timeout: {0}")]
    DownstreamTimeout(String),

    /// A downstream invocation failed.
    #[error("Downstream failure: {0}")]
    Downstream(String),

    /// Dispatch queue error.
    #[error("Queue error: {0}")]
    Queue(String),

    /// Job store error. Fatal for the current message; the message is left
    /// unacknowledged so queue redelivery governs the retry.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(String),
}

impl EstatorError {
    /// Whether the planner should leave the dispatch message unacknowledged
    /// so the queue's redelivery policy governs the retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EstatorError::DownstreamTimeout(_)
                | EstatorError::Storage(_)
                | EstatorError::Queue(_)
                | EstatorError::Http(_)
        )
    }
}
