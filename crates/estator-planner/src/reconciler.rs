use chrono::Utc;
use estator_core::{EstatorError, EstatorResult, JobStatus};
use estator_queue::DispatchQueue;
use estator_store::JobRepository;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Outcome of one reconciliation sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerReport {
    /// Jobs failed because their dispatch message was dead-lettered.
    pub dead_lettered: usize,
    /// Jobs failed because their claim went stale without a terminal state.
    pub stale: usize,
}

/// Background sweep that keeps jobs from sticking in `in_progress` forever.
///
/// Two sources feed it: the queue's dead-letter channel (messages that
/// exhausted their redelivery budget) and the store's stale-claim query
/// (claims whose `updated_at` stopped moving, e.g. a worker crashed after
/// claiming and the duplicate-delivery dedup acknowledged the retries).
pub struct Reconciler {
    repository: Arc<dyn JobRepository>,
    queue: Arc<dyn DispatchQueue>,
    stale_after: Duration,
}

impl Reconciler {
    pub fn new(
        repository: Arc<dyn JobRepository>,
        queue: Arc<dyn DispatchQueue>,
        stale_after: Duration,
    ) -> Self {
        Self {
            repository,
            queue,
            stale_after,
        }
    }

    /// Sweep forever at `interval`. Callers own the task handle.
    pub async fn run(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                error!(error = %e, "reconciliation sweep failed");
            }
        }
    }

    /// One sweep over the dead-letter channel and the stale-claim query.
    pub async fn run_once(&self) -> EstatorResult<ReconcilerReport> {
        let mut report = ReconcilerReport::default();

        for dead in self.queue.take_dead_letters().await? {
            let job_id = &dead.message.job_id;
            match self
                .repository
                .transition(
                    job_id,
                    JobStatus::InProgress,
                    JobStatus::Failed,
                    None,
                    Some(format!(
                        "dispatch retries exhausted after {} deliveries",
                        dead.receive_count
                    )),
                )
                .await
            {
                Ok(_) => {
                    info!(job_id = %job_id, "dead-lettered job marked failed");
                    report.dead_lettered += 1;
                }
                // Already terminal, or never claimed; nothing to reconcile.
                Err(EstatorError::Conflict { current }) => {
                    warn!(job_id = %job_id, status = %current, "dead letter for a job not in progress");
                }
                Err(EstatorError::NotFound(_)) => {
                    warn!(job_id = %job_id, "dead letter references a deleted job");
                }
                Err(e) => return Err(e),
            }
        }

        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.stale_after)
                .map_err(|e| EstatorError::Config(e.to_string()))?;
        for job in self.repository.list_stale_in_progress(cutoff).await? {
            match self
                .repository
                .transition(
                    &job.job_id,
                    JobStatus::InProgress,
                    JobStatus::Failed,
                    None,
                    Some("claim went stale without reaching a terminal state".to_string()),
                )
                .await
            {
                Ok(_) => {
                    info!(job_id = %job.job_id, "stale in-progress job marked failed");
                    report.stale += 1;
                }
                // Raced with a worker finishing the job; that outcome wins.
                Err(EstatorError::Conflict { .. }) => {}
                Err(EstatorError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }
}
