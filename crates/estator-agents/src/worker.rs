use crate::agent::{AgentRegistry, JobDescriptor};
use estator_core::{EstatorError, EstatorResult, JobStatus};
use estator_queue::{DispatchQueue, ReceivedMessage};
use estator_store::JobRepository;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Generic consumer for asynchronous agent stages: receive → claim →
/// accept → record terminal state → acknowledge. Stateless between
/// messages; any number of workers may pull from the same queue.
pub struct AgentWorker {
    repository: Arc<dyn JobRepository>,
    queue: Arc<dyn DispatchQueue>,
    registry: Arc<AgentRegistry>,
    stage_timeout: Duration,
    poll_wait: Duration,
}

impl AgentWorker {
    pub fn new(
        repository: Arc<dyn JobRepository>,
        queue: Arc<dyn DispatchQueue>,
        registry: Arc<AgentRegistry>,
        stage_timeout: Duration,
    ) -> Self {
        Self {
            repository,
            queue,
            registry,
            stage_timeout,
            poll_wait: Duration::from_secs(5),
        }
    }

    /// Override the long-poll wait (tests use a short one).
    pub fn with_poll_wait(mut self, poll_wait: Duration) -> Self {
        self.poll_wait = poll_wait;
        self
    }

    /// Run forever. Callers own the task handle and abort it on shutdown.
    pub async fn run(&self) {
        loop {
            if let Err(e) = self.run_once().await {
                error!(error = %e, "agent worker iteration failed");
            }
        }
    }

    /// One receive/process cycle. Returns `Ok(true)` when a message was
    /// processed, `Ok(false)` when the poll came back empty.
    pub async fn run_once(&self) -> EstatorResult<bool> {
        let Some(received) = self.queue.receive(self.poll_wait).await? else {
            return Ok(false);
        };

        match self.process(&received).await {
            Ok(()) => {
                self.queue.acknowledge(received.receipt).await?;
                Ok(true)
            }
            Err(e) if e.is_retryable() => {
                // Leave the message unacknowledged; the queue's redelivery
                // policy governs the retry.
                warn!(job_id = %received.message.job_id, error = %e, "retryable failure, message left for redelivery");
                Ok(true)
            }
            Err(e) => {
                error!(job_id = %received.message.job_id, error = %e, "message dropped after non-retryable failure");
                self.queue.acknowledge(received.receipt).await?;
                Ok(true)
            }
        }
    }

    async fn process(&self, received: &ReceivedMessage) -> EstatorResult<()> {
        let job_id = &received.message.job_id;

        // The message body may be a bare reference; the row is the truth.
        let job = match self.repository.get(job_id).await {
            Ok(job) => job,
            Err(EstatorError::NotFound(_)) => {
                warn!(job_id = %job_id, "message references a deleted job, dropping");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if received.is_redelivery() {
            self.repository.record_retry(job_id).await?;
        }

        // Claim — the dedup point under at-least-once delivery.
        match self
            .repository
            .transition(job_id, JobStatus::Pending, JobStatus::InProgress, None, None)
            .await
        {
            Ok(_) => {}
            Err(EstatorError::Conflict { current }) => {
                debug!(job_id = %job_id, status = %current, "job already claimed, acknowledging duplicate");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let descriptor = JobDescriptor::from_job(&job);
        let result = match self.registry.get(job.job_type) {
            Some(agent) => {
                match tokio::time::timeout(self.stage_timeout, agent.accept(&descriptor)).await {
                    Ok(result) => result,
                    Err(_) => Err(EstatorError::DownstreamTimeout(format!(
                        "{} stage exceeded {:?}",
                        job.job_type, self.stage_timeout
                    ))),
                }
            }
            None => Err(EstatorError::Downstream(format!(
                "no agent registered for {}",
                job.job_type
            ))),
        };

        match result {
            Ok(response) => {
                self.repository
                    .transition(
                        job_id,
                        JobStatus::InProgress,
                        JobStatus::Completed,
                        Some(response),
                        None,
                    )
                    .await?;
                info!(job_id = %job_id, job_type = %job.job_type, "agent job completed");
            }
            Err(e) => {
                self.repository
                    .transition(
                        job_id,
                        JobStatus::InProgress,
                        JobStatus::Failed,
                        None,
                        Some(e.to_string()),
                    )
                    .await?;
                warn!(job_id = %job_id, job_type = %job.job_type, error = %e, "agent job failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::builtin_registry;
    use estator_core::{JobType, NewJob};
    use estator_queue::{DispatchMessage, MemoryQueue};
    use estator_store::MemoryRepository;
    use serde_json::json;

    fn worker(
        repo: Arc<dyn JobRepository>,
        queue: Arc<dyn DispatchQueue>,
    ) -> AgentWorker {
        AgentWorker::new(
            repo,
            queue,
            Arc::new(builtin_registry()),
            Duration::from_secs(5),
        )
        .with_poll_wait(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_empty_queue_is_a_quiet_cycle() {
        let repo: Arc<dyn JobRepository> = Arc::new(MemoryRepository::new());
        let queue: Arc<dyn DispatchQueue> = Arc::new(MemoryQueue::with_defaults());
        assert!(!worker(repo, queue).run_once().await.unwrap());
    }

    #[tokio::test]
    async fn test_processes_child_job_to_completion() {
        let repo: Arc<dyn JobRepository> = Arc::new(MemoryRepository::new());
        let queue: Arc<dyn DispatchQueue> = Arc::new(MemoryQueue::with_defaults());

        repo.create(NewJob::with_id(
            "j-1a",
            JobType::Search,
            json!({"city": "Noida", "bedrooms": 3}),
        ))
        .await
        .unwrap();
        queue
            .send(DispatchMessage::reference("j-1a"))
            .await
            .unwrap();

        assert!(worker(repo.clone(), queue.clone()).run_once().await.unwrap());

        let job = repo.get("j-1a").await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.response_payload.is_some());
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_acked_without_side_effects() {
        let repo: Arc<dyn JobRepository> = Arc::new(MemoryRepository::new());
        let queue: Arc<dyn DispatchQueue> = Arc::new(MemoryQueue::with_defaults());

        repo.create(NewJob::with_id("j-1a", JobType::Search, json!({})))
            .await
            .unwrap();
        queue.send(DispatchMessage::reference("j-1a")).await.unwrap();
        queue.send(DispatchMessage::reference("j-1a")).await.unwrap();

        let w = worker(repo.clone(), queue.clone());
        w.run_once().await.unwrap();
        let completed_at = repo.get("j-1a").await.unwrap().completed_at;

        w.run_once().await.unwrap();
        let job = repo.get("j-1a").await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.completed_at, completed_at);
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_message_for_deleted_job_is_dropped() {
        let repo: Arc<dyn JobRepository> = Arc::new(MemoryRepository::new());
        let queue: Arc<dyn DispatchQueue> = Arc::new(MemoryQueue::with_defaults());

        queue.send(DispatchMessage::reference("gone")).await.unwrap();
        assert!(worker(repo, queue.clone()).run_once().await.unwrap());
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_job_is_not_reprocessed() {
        let repo: Arc<dyn JobRepository> = Arc::new(MemoryRepository::new());
        let queue: Arc<dyn DispatchQueue> = Arc::new(MemoryQueue::with_defaults());

        repo.create(NewJob::with_id("j-1a", JobType::Search, json!({})))
            .await
            .unwrap();
        repo.transition("j-1a", JobStatus::Pending, JobStatus::Cancelled, None, None)
            .await
            .unwrap();
        queue.send(DispatchMessage::reference("j-1a")).await.unwrap();

        worker(repo.clone(), queue.clone()).run_once().await.unwrap();

        let job = repo.get("j-1a").await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.response_payload.is_none());
        assert_eq!(queue.depth().await.unwrap(), 0);
    }
}
