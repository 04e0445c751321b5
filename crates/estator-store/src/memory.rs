use crate::repository::JobRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use estator_core::{EstatorError, EstatorResult, Job, JobStatus, NewJob};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory job store. Same observable contract as the SQLite store;
/// intended for tests and ephemeral local runs.
pub struct MemoryRepository {
    jobs: RwLock<HashMap<String, Job>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobRepository for MemoryRepository {
    async fn create(&self, new_job: NewJob) -> EstatorResult<Job> {
        let mut jobs = self.jobs.write().await;

        if let Some(parent) = &new_job.parent_job_id {
            if !jobs.contains_key(parent) {
                return Err(EstatorError::NotFound(parent.clone()));
            }
        }
        if jobs.contains_key(&new_job.job_id) {
            return Err(EstatorError::AlreadyExists(new_job.job_id));
        }

        let job = new_job.into_job(Utc::now());
        jobs.insert(job.job_id.clone(), job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: &str) -> EstatorResult<Job> {
        let jobs = self.jobs.read().await;
        jobs.get(job_id)
            .cloned()
            .ok_or_else(|| EstatorError::NotFound(job_id.to_string()))
    }

    async fn transition(
        &self,
        job_id: &str,
        expected: JobStatus,
        new: JobStatus,
        response_payload: Option<serde_json::Value>,
        error_message: Option<String>,
    ) -> EstatorResult<Job> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| EstatorError::NotFound(job_id.to_string()))?;

        if job.status != expected {
            return Err(EstatorError::Conflict {
                current: job.status,
            });
        }
        if !expected.can_transition_to(new) {
            return Err(EstatorError::Conflict {
                current: job.status,
            });
        }

        let now = Utc::now();
        job.status = new;
        job.updated_at = now;
        if new.is_terminal() {
            job.completed_at = Some(now);
            if let Some(payload) = response_payload {
                job.response_payload = Some(payload);
            }
            if let Some(message) = error_message {
                job.error_message = Some(message);
            }
        }
        Ok(job.clone())
    }

    async fn list_children(&self, parent_job_id: &str) -> EstatorResult<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let mut children: Vec<Job> = jobs
            .values()
            .filter(|j| j.parent_job_id.as_deref() == Some(parent_job_id))
            .cloned()
            .collect();
        children.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        Ok(children)
    }

    async fn list_by_status(&self, status: JobStatus, limit: usize) -> EstatorResult<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn list_stale_in_progress(&self, cutoff: DateTime<Utc>) -> EstatorResult<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let mut stale: Vec<Job> = jobs
            .values()
            .filter(|j| j.status == JobStatus::InProgress && j.updated_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(stale)
    }

    async fn record_retry(&self, job_id: &str) -> EstatorResult<Job> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| EstatorError::NotFound(job_id.to_string()))?;
        job.retry_count += 1;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn delete(&self, job_id: &str) -> EstatorResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.remove(job_id).is_none() {
            return Err(EstatorError::NotFound(job_id.to_string()));
        }
        // Mirror of ON DELETE SET NULL: orphan the children, never cascade.
        for job in jobs.values_mut() {
            if job.parent_job_id.as_deref() == Some(job_id) {
                job.parent_job_id = None;
            }
        }
        Ok(())
    }

    async fn ping(&self) -> EstatorResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use estator_core::JobType;
    use serde_json::json;

    fn planning_job(id: &str) -> NewJob {
        NewJob::with_id(id, JobType::Planning, json!({"query": "3bhk in noida"}))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let repo = MemoryRepository::new();
        let created = repo.create(planning_job("j-1")).await.unwrap();
        assert_eq!(created.status, JobStatus::Pending);

        let fetched = repo.get("j-1").await.unwrap();
        assert_eq!(fetched.job_id, "j-1");
        assert_eq!(fetched.job_type, JobType::Planning);
    }

    #[tokio::test]
    async fn test_duplicate_create_is_already_exists() {
        let repo = MemoryRepository::new();
        repo.create(planning_job("j-1")).await.unwrap();
        let err = repo.create(planning_job("j-1")).await.unwrap_err();
        assert!(matches!(err, EstatorError::AlreadyExists(id) if id == "j-1"));

        // Original row unchanged.
        let job = repo.get("j-1").await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.request_payload["query"], "3bhk in noida");
    }

    #[tokio::test]
    async fn test_create_child_requires_parent() {
        let repo = MemoryRepository::new();
        let err = repo
            .create(planning_job("orphan").with_parent("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, EstatorError::NotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn test_transition_cas_success() {
        let repo = MemoryRepository::new();
        repo.create(planning_job("j-1")).await.unwrap();

        let job = repo
            .transition("j-1", JobStatus::Pending, JobStatus::InProgress, None, None)
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::InProgress);
        assert!(job.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_transition_stale_expected_is_conflict() {
        let repo = MemoryRepository::new();
        repo.create(planning_job("j-1")).await.unwrap();
        repo.transition("j-1", JobStatus::Pending, JobStatus::InProgress, None, None)
            .await
            .unwrap();

        let err = repo
            .transition("j-1", JobStatus::Pending, JobStatus::InProgress, None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EstatorError::Conflict {
                current: JobStatus::InProgress
            }
        ));

        // Row untouched by the conflicting call.
        let job = repo.get("j-1").await.unwrap();
        assert_eq!(job.status, JobStatus::InProgress);
    }

    #[tokio::test]
    async fn test_terminal_sets_response_and_completed_at_together() {
        let repo = MemoryRepository::new();
        repo.create(planning_job("j-1")).await.unwrap();
        repo.transition("j-1", JobStatus::Pending, JobStatus::InProgress, None, None)
            .await
            .unwrap();

        let job = repo
            .transition(
                "j-1",
                JobStatus::InProgress,
                JobStatus::Completed,
                Some(json!({"plan": {"steps": []}})),
                None,
            )
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());
        assert!(job.response_payload.is_some());
    }

    #[tokio::test]
    async fn test_cancelled_rejects_further_transitions() {
        let repo = MemoryRepository::new();
        repo.create(planning_job("j-1")).await.unwrap();
        repo.transition("j-1", JobStatus::Pending, JobStatus::Cancelled, None, None)
            .await
            .unwrap();

        let err = repo
            .transition("j-1", JobStatus::Pending, JobStatus::InProgress, None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EstatorError::Conflict {
                current: JobStatus::Cancelled
            }
        ));
    }

    #[tokio::test]
    async fn test_invalid_edge_rejected_even_with_correct_expected() {
        let repo = MemoryRepository::new();
        repo.create(planning_job("j-1")).await.unwrap();

        // Pending → Completed skips the claim; not an edge of the graph.
        let err = repo
            .transition("j-1", JobStatus::Pending, JobStatus::Completed, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EstatorError::Conflict { .. }));
        assert_eq!(repo.get("j-1").await.unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_list_children_ordered() {
        let repo = MemoryRepository::new();
        repo.create(planning_job("parent")).await.unwrap();
        repo.create(
            NewJob::with_id("parent-search-1", JobType::Search, json!({})).with_parent("parent"),
        )
        .await
        .unwrap();
        repo.create(
            NewJob::with_id("parent-summarization-1", JobType::Summarization, json!({}))
                .with_parent("parent"),
        )
        .await
        .unwrap();

        let children = repo.list_children("parent").await.unwrap();
        assert_eq!(children.len(), 2);
        assert!(children
            .iter()
            .all(|c| c.parent_job_id.as_deref() == Some("parent")));
    }

    #[tokio::test]
    async fn test_delete_parent_orphans_children() {
        let repo = MemoryRepository::new();
        repo.create(planning_job("parent")).await.unwrap();
        repo.create(NewJob::with_id("child", JobType::Search, json!({})).with_parent("parent"))
            .await
            .unwrap();

        repo.delete("parent").await.unwrap();

        assert!(matches!(
            repo.get("parent").await.unwrap_err(),
            EstatorError::NotFound(_)
        ));
        let child = repo.get("child").await.unwrap();
        assert!(child.parent_job_id.is_none());
    }

    #[tokio::test]
    async fn test_record_retry() {
        let repo = MemoryRepository::new();
        repo.create(planning_job("j-1")).await.unwrap();
        repo.record_retry("j-1").await.unwrap();
        let job = repo.record_retry("j-1").await.unwrap();
        assert_eq!(job.retry_count, 2);
    }

    #[tokio::test]
    async fn test_list_stale_in_progress() {
        let repo = MemoryRepository::new();
        repo.create(planning_job("j-1")).await.unwrap();
        repo.transition("j-1", JobStatus::Pending, JobStatus::InProgress, None, None)
            .await
            .unwrap();

        let none = repo
            .list_stale_in_progress(Utc::now() - chrono::Duration::minutes(5))
            .await
            .unwrap();
        assert!(none.is_empty());

        let all = repo
            .list_stale_in_progress(Utc::now() + chrono::Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].job_id, "j-1");
    }
}
