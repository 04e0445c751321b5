use crate::agent::{AgentRegistry, JobDescriptor};
use async_trait::async_trait;
use estator_core::{ChildOutcome, EstatorError, EstatorResult, JobStatus};
use estator_queue::{DispatchMessage, DispatchQueue};
use estator_store::JobRepository;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How the planner hands a child job to its downstream agent. Both variants
/// are idempotent per `job_id`: the claim CAS is the dedup point.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Invoke the agent for one child job and report its outcome. The
    /// returned status is terminal for synchronous invokers and `Pending`
    /// for queued ones (the agent worker finishes the job later).
    async fn invoke(&self, descriptor: &JobDescriptor) -> EstatorResult<ChildOutcome>;
}

/// Synchronous invocation: claim the child, run the agent under a bounded
/// per-stage timeout, record the terminal state, return the outcome inline.
pub struct DirectInvoker {
    repository: Arc<dyn JobRepository>,
    registry: Arc<AgentRegistry>,
    stage_timeout: Duration,
}

impl DirectInvoker {
    pub fn new(
        repository: Arc<dyn JobRepository>,
        registry: Arc<AgentRegistry>,
        stage_timeout: Duration,
    ) -> Self {
        Self {
            repository,
            registry,
            stage_timeout,
        }
    }
}

#[async_trait]
impl AgentInvoker for DirectInvoker {
    async fn invoke(&self, descriptor: &JobDescriptor) -> EstatorResult<ChildOutcome> {
        let job_id = &descriptor.job_id;

        // Claim. A conflict means another worker owns or already finished
        // this child; report whatever state the row holds.
        match self
            .repository
            .transition(job_id, JobStatus::Pending, JobStatus::InProgress, None, None)
            .await
        {
            Ok(_) => {}
            Err(EstatorError::Conflict { .. }) => {
                let job = self.repository.get(job_id).await?;
                return Ok(ChildOutcome {
                    job_id: job.job_id,
                    job_type: job.job_type,
                    status: job.status,
                    error_message: job.error_message,
                });
            }
            Err(e) => return Err(e),
        }

        let result = match self.registry.get(descriptor.job_type) {
            Some(agent) => {
                match tokio::time::timeout(self.stage_timeout, agent.accept(descriptor)).await {
                    Ok(result) => result,
                    Err(_) => Err(EstatorError::DownstreamTimeout(format!(
                        "{} stage exceeded {:?}",
                        descriptor.job_type, self.stage_timeout
                    ))),
                }
            }
            None => Err(EstatorError::Downstream(format!(
                "no agent registered for {}",
                descriptor.job_type
            ))),
        };

        let job = match result {
            Ok(response) => {
                info!(job_id = %job_id, job_type = %descriptor.job_type, "agent stage completed");
                self.repository
                    .transition(
                        job_id,
                        JobStatus::InProgress,
                        JobStatus::Completed,
                        Some(response),
                        None,
                    )
                    .await?
            }
            Err(e) => {
                warn!(job_id = %job_id, job_type = %descriptor.job_type, error = %e, "agent stage failed");
                self.repository
                    .transition(
                        job_id,
                        JobStatus::InProgress,
                        JobStatus::Failed,
                        None,
                        Some(e.to_string()),
                    )
                    .await?
            }
        };

        Ok(ChildOutcome {
            job_id: job.job_id,
            job_type: job.job_type,
            status: job.status,
            error_message: job.error_message,
        })
    }
}

/// Asynchronous invocation: enqueue a dispatch message for the child and
/// return immediately. An [`AgentWorker`](crate::worker::AgentWorker)
/// consumes the message and finishes the job; callers poll the store.
pub struct QueuedInvoker {
    queue: Arc<dyn DispatchQueue>,
}

impl QueuedInvoker {
    pub fn new(queue: Arc<dyn DispatchQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl AgentInvoker for QueuedInvoker {
    async fn invoke(&self, descriptor: &JobDescriptor) -> EstatorResult<ChildOutcome> {
        self.queue
            .send(DispatchMessage::new(
                descriptor.job_id.clone(),
                descriptor.payload.clone(),
            ))
            .await?;
        info!(job_id = %descriptor.job_id, job_type = %descriptor.job_type, "child dispatched to agent queue");
        Ok(ChildOutcome {
            job_id: descriptor.job_id.clone(),
            job_type: descriptor.job_type,
            status: JobStatus::Pending,
            error_message: None,
        })
    }
}
