use crate::decomposer::Decomposer;
use estator_agents::{AgentInvoker, JobDescriptor};
use estator_core::{
    ChildOutcome, EstatorError, EstatorResult, Job, JobStatus, JobType, NewJob, Plan, PlanSummary,
};
use estator_queue::{DispatchQueue, ReceivedMessage};
use estator_store::JobRepository;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The planner worker: consumes root-job dispatch messages, decomposes each
/// query into child jobs, drives the downstream agents, and records the
/// outcome summary on the parent.
///
/// Stateless between messages; all cross-invocation state lives in the job
/// store, so any number of planner workers can pull from the same queue.
pub struct PlannerWorker {
    repository: Arc<dyn JobRepository>,
    queue: Arc<dyn DispatchQueue>,
    decomposer: Arc<dyn Decomposer>,
    invoker: Arc<dyn AgentInvoker>,
    poll_wait: Duration,
}

impl PlannerWorker {
    pub fn new(
        repository: Arc<dyn JobRepository>,
        queue: Arc<dyn DispatchQueue>,
        decomposer: Arc<dyn Decomposer>,
        invoker: Arc<dyn AgentInvoker>,
    ) -> Self {
        Self {
            repository,
            queue,
            decomposer,
            invoker,
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
                error!(error = %e, "planner iteration failed");
            }
        }
    }

    /// One receive/process cycle. Returns `Ok(true)` when a message was
    /// received, `Ok(false)` when the poll came back empty.
    pub async fn run_once(&self) -> EstatorResult<bool> {
        let Some(received) = self.queue.receive(self.poll_wait).await? else {
            return Ok(false);
        };

        match self.handle_message(&received).await {
            Ok(()) => {
                // Acknowledge only now that the store reflects a terminal
                // (or deliberately skipped) state for this message.
                self.queue.acknowledge(received.receipt).await?;
                Ok(true)
            }
            Err(e) if e.is_retryable() => {
                warn!(
                    job_id = %received.message.job_id,
                    receive_count = received.receive_count,
                    error = %e,
                    "recoverable failure, leaving message for redelivery"
                );
                Ok(true)
            }
            Err(e) => {
                error!(job_id = %received.message.job_id, error = %e, "unrecoverable failure, acknowledging message");
                self.queue.acknowledge(received.receipt).await?;
                Ok(true)
            }
        }
    }

    async fn handle_message(&self, received: &ReceivedMessage) -> EstatorResult<()> {
        let job_id = &received.message.job_id;

        let job = self.resolve_job(received).await?;
        let Some(job) = job else {
            warn!(job_id = %job_id, "unresolvable message dropped");
            return Ok(());
        };

        if received.is_redelivery() {
            self.repository.record_retry(job_id).await?;
        }

        // Claim — the dedup point for at-least-once delivery. A conflict
        // means another consumer owns or already finished this job.
        match self
            .repository
            .transition(job_id, JobStatus::Pending, JobStatus::InProgress, None, None)
            .await
        {
            Ok(_) => {}
            Err(EstatorError::Conflict { current }) => {
                debug!(job_id = %job_id, status = %current, "job already claimed, acknowledging duplicate delivery");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        info!(job_id = %job_id, "planning job claimed");

        let query = job.request_payload["user_query"]
            .as_str()
            .or_else(|| job.request_payload["query"].as_str())
            .unwrap_or_default()
            .to_string();
        let context = job.request_payload["context"].clone();

        // Decompose. A timeout is recoverable: bubble it up unhandled so the
        // message stays unacknowledged and the job stays in progress; the
        // redelivery budget (and then the reconciler) governs what follows.
        let plan = match self.decomposer.decompose(&query, &context).await {
            Ok(plan) => plan,
            Err(e @ EstatorError::DownstreamTimeout(_)) => return Err(e),
            Err(e) => {
                // Unrecoverable decomposition failure before any child exists.
                self.repository
                    .transition(
                        job_id,
                        JobStatus::InProgress,
                        JobStatus::Failed,
                        None,
                        Some(e.to_string()),
                    )
                    .await?;
                return Ok(());
            }
        };

        if plan.steps.is_empty() {
            info!(job_id = %job_id, "query decomposed to an empty plan");
            return self.complete(job_id, plan, Vec::new()).await;
        }

        let descriptors = self.create_children(&job, &plan).await;

        let mut outcomes = Vec::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            match self.invoker.invoke(descriptor).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    // Store-level failure mid fan-out; the child row stays
                    // visible via list_children either way.
                    warn!(child_job_id = %descriptor.job_id, error = %e, "child invocation errored");
                    outcomes.push(ChildOutcome {
                        job_id: descriptor.job_id.clone(),
                        job_type: descriptor.job_type,
                        status: JobStatus::Failed,
                        error_message: Some(e.to_string()),
                    });
                }
            }
        }

        self.complete(job_id, plan, outcomes).await
    }

    /// The row is the source of truth, but the message is self-describing:
    /// when the row is gone and the body carries an inline payload, the job
    /// is recreated idempotently.
    async fn resolve_job(&self, received: &ReceivedMessage) -> EstatorResult<Option<Job>> {
        match self.repository.get(&received.message.job_id).await {
            Ok(job) => Ok(Some(job)),
            Err(EstatorError::NotFound(_)) if !received.message.body.is_null() => {
                let new_job = NewJob::with_id(
                    received.message.job_id.clone(),
                    JobType::Planning,
                    received.message.body.clone(),
                );
                match self.repository.create(new_job).await {
                    Ok(job) => Ok(Some(job)),
                    // Lost the race to another consumer; its row wins.
                    Err(EstatorError::AlreadyExists(_)) => {
                        Ok(Some(self.repository.get(&received.message.job_id).await?))
                    }
                    Err(e) => Err(e),
                }
            }
            Err(EstatorError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create one child per task descriptor. Creations are independent: one
    /// failure does not roll back previously created siblings, so a partial
    /// decomposition stays visible through `list_children`.
    async fn create_children(&self, parent: &Job, plan: &Plan) -> Vec<JobDescriptor> {
        let mut descriptors = Vec::with_capacity(plan.steps.len());
        for step in &plan.steps {
            let suffix = &Uuid::new_v4().simple().to_string()[..8];
            let child_id = format!("{}-{}-{}", parent.job_id, step.agent, suffix);
            let new_child = NewJob::with_id(child_id.clone(), step.agent, step.payload.clone())
                .with_parent(parent.job_id.clone());

            match self.repository.create(new_child).await {
                Ok(_) | Err(EstatorError::AlreadyExists(_)) => {
                    descriptors.push(JobDescriptor::for_child(child_id, step));
                }
                Err(e) => {
                    warn!(
                        parent_job_id = %parent.job_id,
                        agent = %step.agent,
                        error = %e,
                        "child creation failed, continuing with remaining steps"
                    );
                }
            }
        }
        descriptors
    }

    async fn complete(
        &self,
        job_id: &str,
        plan: Plan,
        outcomes: Vec<ChildOutcome>,
    ) -> EstatorResult<()> {
        let summary = PlanSummary {
            child_jobs: outcomes.iter().map(|o| o.job_id.clone()).collect(),
            children: outcomes,
            plan,
        };
        let line = summary.summary_line();
        self.repository
            .transition(
                job_id,
                JobStatus::InProgress,
                JobStatus::Completed,
                Some(serde_json::to_value(&summary)?),
                None,
            )
            .await?;
        info!(job_id = %job_id, summary = %line, "planning job completed");
        Ok(())
    }
}
