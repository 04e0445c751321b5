use async_trait::async_trait;
use estator_core::{EstatorResult, Job, JobType, TaskDescriptor};
use std::collections::HashMap;
use std::sync::Arc;

/// Everything an agent needs to do its work: the child job id (its
/// idempotency key), the kind of work, and the planner-provided input.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    pub job_id: String,
    pub job_type: JobType,
    pub action: String,
    pub payload: serde_json::Value,
}

impl JobDescriptor {
    /// Descriptor for a freshly created child job.
    pub fn for_child(job_id: impl Into<String>, task: &TaskDescriptor) -> Self {
        Self {
            job_id: job_id.into(),
            job_type: task.agent,
            action: task.action.clone(),
            payload: task.payload.clone(),
        }
    }

    /// Reconstruct a descriptor from a persisted job row. Used by queued
    /// consumers, which resolve the job instead of trusting the message body.
    pub fn from_job(job: &Job) -> Self {
        let action = job.request_payload["action"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        Self {
            job_id: job.job_id.clone(),
            job_type: job.job_type,
            action,
            payload: job.request_payload.clone(),
        }
    }
}

/// The downstream invocation capability. One implementation per [`JobType`];
/// the business logic behind `accept` is swappable and out of orchestration
/// scope. Implementations must be idempotent with respect to `job_id` —
/// the claim CAS upstream guarantees single ownership, but redelivery can
/// still invoke `accept` again after a crash.
#[async_trait]
pub trait Agent: Send + Sync {
    /// The single job type this agent handles.
    fn job_type(&self) -> JobType;

    /// Do the domain work. `Ok` becomes the child's `response_payload`;
    /// `Err` becomes its `error_message`.
    async fn accept(&self, descriptor: &JobDescriptor) -> EstatorResult<serde_json::Value>;
}

/// Closed dispatch table from job type to agent.
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<JobType, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    /// Register an agent under its declared job type, replacing any previous
    /// registration for that type.
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.job_type(), agent);
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn Agent>> {
        self.agents.get(&job_type).cloned()
    }

    /// Job types with a registered agent.
    pub fn job_types(&self) -> Vec<JobType> {
        self.agents.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use estator_core::NewJob;
    use serde_json::json;

    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        fn job_type(&self) -> JobType {
            JobType::Search
        }

        async fn accept(&self, descriptor: &JobDescriptor) -> EstatorResult<serde_json::Value> {
            Ok(json!({"echo": descriptor.payload}))
        }
    }

    #[tokio::test]
    async fn test_registry_dispatch() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(EchoAgent));

        let agent = registry.get(JobType::Search).unwrap();
        let descriptor = JobDescriptor {
            job_id: "j-1a".into(),
            job_type: JobType::Search,
            action: "find_listings".into(),
            payload: json!({"city": "Noida"}),
        };
        let out = agent.accept(&descriptor).await.unwrap();
        assert_eq!(out["echo"]["city"], "Noida");

        assert!(registry.get(JobType::Valuation).is_none());
    }

    #[test]
    fn test_descriptor_from_job_row() {
        let job = NewJob::with_id(
            "j-1a",
            JobType::Valuation,
            json!({"action": "estimate", "city": "Pune"}),
        )
        .into_job(chrono::Utc::now());

        let descriptor = JobDescriptor::from_job(&job);
        assert_eq!(descriptor.job_type, JobType::Valuation);
        assert_eq!(descriptor.action, "estimate");
        assert_eq!(descriptor.payload["city"], "Pune");
    }
}
