use async_trait::async_trait;
use chrono::{DateTime, Utc};
use estator_core::{EstatorResult, Job, JobStatus, NewJob};

/// The single gate to job-row storage. No other component touches rows
/// directly; all concurrency control funnels through [`transition`].
///
/// [`transition`]: JobRepository::transition
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Create a job in `Pending`. Fails with `AlreadyExists` when the id is
    /// taken (idempotent producers treat that as success and `get` the
    /// existing row) and `NotFound` when `parent_job_id` references a
    /// missing row.
    async fn create(&self, new_job: NewJob) -> EstatorResult<Job>;

    /// Fetch a job by id, or `NotFound`.
    async fn get(&self, job_id: &str) -> EstatorResult<Job>;

    /// Compare-and-swap the status. Fails with `Conflict { current }` when
    /// the row's status is not `expected` or when `expected → new` is not an
    /// edge of the status graph. On success `updated_at` is refreshed and,
    /// for terminal `new`, `completed_at` and `response_payload` /
    /// `error_message` are written in the same atomic step.
    async fn transition(
        &self,
        job_id: &str,
        expected: JobStatus,
        new: JobStatus,
        response_payload: Option<serde_json::Value>,
        error_message: Option<String>,
    ) -> EstatorResult<Job>;

    /// Children of a parent, ordered by creation time ascending.
    async fn list_children(&self, parent_job_id: &str) -> EstatorResult<Vec<Job>>;

    /// Jobs in a given status, newest first, capped at `limit`.
    async fn list_by_status(&self, status: JobStatus, limit: usize) -> EstatorResult<Vec<Job>>;

    /// `InProgress` jobs whose `updated_at` is older than `cutoff`. Input to
    /// the reconciliation sweep.
    async fn list_stale_in_progress(&self, cutoff: DateTime<Utc>) -> EstatorResult<Vec<Job>>;

    /// Bump `retry_count`. Called by the dispatch layer on redelivery; never
    /// part of a status transition.
    async fn record_retry(&self, job_id: &str) -> EstatorResult<Job>;

    /// Remove a row. Children keep existing with `parent_job_id` cleared;
    /// they are never cascaded. Retention is an external concern — the core
    /// pipeline never calls this.
    async fn delete(&self, job_id: &str) -> EstatorResult<()>;

    /// Storage connectivity check for the health endpoint.
    async fn ping(&self) -> EstatorResult<()>;
}
