use async_trait::async_trait;
use estator_core::{EstatorError, EstatorResult, JobType, Plan, TaskDescriptor};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

const SYSTEM_PROMPT: &str = "\
You are a planning agent for a real estate AI system.
Your job is to analyze user queries and create a step-by-step execution plan.

Available agents:
- search: Find property listings based on criteria
- valuation: Estimate property values and comparables
- legal_check: Verify legal compliance and registry
- verification: Check data integrity and fraud signals
- summarization: Create final report for user

Analyze the query and create a plan with these steps.
Return a JSON object with:
{
  \"steps\": [
    {
      \"agent\": \"search\",
      \"action\": \"find_listings\",
      \"payload\": {\"city\": \"Noida\", \"bedrooms\": 3, \"max_price\": 10000000}
    }
  ],
  \"reasoning\": \"Brief explanation of the plan\",
  \"estimated_duration_seconds\": 60
}";

/// The external decomposition capability: turns a query into an ordered
/// sequence of task descriptors. An empty plan is a valid answer.
#[async_trait]
pub trait Decomposer: Send + Sync {
    async fn decompose(&self, query: &str, context: &serde_json::Value) -> EstatorResult<Plan>;
}

/// Connection settings for the OpenAI-compatible planning model.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Per-call ceiling; a breach is a recoverable failure handled by queue
    /// redelivery, so keep it well under the visibility timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_model() -> String {
    "gpt-4".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Decomposer backed by an OpenAI-compatible chat completions endpoint.
///
/// A transport timeout surfaces as `DownstreamTimeout` so the caller can
/// leave the message unacknowledged; any other failure degrades to the
/// fallback plan (search + summarization) rather than failing the job.
pub struct LlmDecomposer {
    config: LlmConfig,
    http: reqwest::Client,
}

impl LlmDecomposer {
    pub fn new(config: LlmConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { config, http }
    }

    async fn call_model(&self, query: &str, context: &serde_json::Value) -> EstatorResult<String> {
        let url = format!("{}/v1/chat/completions", self.config.base_url);
        let user_prompt = format!(
            "Create an execution plan for this query:\n\nQuery: {query}\n\nContext: {context}\n\nReturn only valid JSON, no markdown."
        );
        let body = json!({
            "model": self.config.model,
            "temperature": 0.3,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user_prompt},
            ],
        });

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EstatorError::DownstreamTimeout(format!("decomposition call: {e}"))
                } else {
                    EstatorError::Http(e.to_string())
                }
            })?;

        let status = resp.status();
        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| EstatorError::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(EstatorError::Http(format!(
                "planning model error {status}: {resp_body}"
            )));
        }

        resp_body["choices"][0]["message"]["content"]
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| EstatorError::Http("planning model returned no content".to_string()))
    }

    fn fallback_plan(query: &str, reason: &str) -> Plan {
        Plan {
            steps: vec![
                TaskDescriptor {
                    agent: JobType::Search,
                    action: "find_listings".to_string(),
                    payload: json!({"query": query}),
                },
                TaskDescriptor {
                    agent: JobType::Summarization,
                    action: "create_report".to_string(),
                    payload: json!({"format": "text"}),
                },
            ],
            reasoning: format!("Fallback plan due to error: {reason}"),
            estimated_duration_seconds: 30,
            fallback: true,
        }
    }
}

/// Strip a leading markdown code fence if the model wrapped its JSON anyway.
fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    for fence in ["```json", "```"] {
        if let Some(rest) = trimmed.strip_prefix(fence) {
            if let Some(end) = rest.find("```") {
                return rest[..end].trim();
            }
            return rest.trim();
        }
    }
    trimmed
}

#[async_trait]
impl Decomposer for LlmDecomposer {
    async fn decompose(&self, query: &str, context: &serde_json::Value) -> EstatorResult<Plan> {
        let content = match self.call_model(query, context).await {
            Ok(content) => content,
            // Timeouts bubble up so the queue's retry policy governs them.
            Err(e @ EstatorError::DownstreamTimeout(_)) => return Err(e),
            Err(e) => {
                warn!(error = %e, "decomposition call failed, using fallback plan");
                return Ok(Self::fallback_plan(query, &e.to_string()));
            }
        };

        match serde_json::from_str::<Plan>(strip_code_fences(&content)) {
            Ok(plan) => {
                debug!(steps = plan.steps.len(), "decomposition produced a plan");
                Ok(plan)
            }
            Err(e) => {
                warn!(error = %e, "unparseable plan from model, using fallback plan");
                Ok(Self::fallback_plan(query, &e.to_string()))
            }
        }
    }
}

/// Deterministic keyword-driven decomposer for offline runs and tests.
/// Always searches, adds specialist stages on keyword triggers, and always
/// summarizes last. An empty query yields an empty plan.
pub struct RuleDecomposer;

#[async_trait]
impl Decomposer for RuleDecomposer {
    async fn decompose(&self, query: &str, context: &serde_json::Value) -> EstatorResult<Plan> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Plan::empty("empty query, nothing to plan"));
        }

        let lowered = query.to_ascii_lowercase();
        let mut steps = vec![TaskDescriptor {
            agent: JobType::Search,
            action: "find_listings".to_string(),
            payload: json!({"query": query, "context": context}),
        }];

        if ["worth", "value", "valuation", "price estimate"]
            .iter()
            .any(|k| lowered.contains(k))
        {
            steps.push(TaskDescriptor {
                agent: JobType::Valuation,
                action: "estimate_value".to_string(),
                payload: json!({"query": query}),
            });
        }
        if ["legal", "registry", "title", "compliance"]
            .iter()
            .any(|k| lowered.contains(k))
        {
            steps.push(TaskDescriptor {
                agent: JobType::LegalCheck,
                action: "check_compliance".to_string(),
                payload: json!({"query": query}),
            });
        }
        if ["verify", "fraud", "genuine"].iter().any(|k| lowered.contains(k)) {
            steps.push(TaskDescriptor {
                agent: JobType::Verification,
                action: "verify_integrity".to_string(),
                payload: json!({"query": query}),
            });
        }

        steps.push(TaskDescriptor {
            agent: JobType::Summarization,
            action: "create_report".to_string(),
            payload: json!({"format": "text"}),
        });

        Ok(Plan {
            steps,
            reasoning: "keyword-based plan".to_string(),
            estimated_duration_seconds: 30,
            fallback: false,
        })
    }
}
