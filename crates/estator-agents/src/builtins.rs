//! Deterministic built-in agents.
//!
//! These stand in for the real domain workers behind each pipeline stage.
//! They produce plausible, deterministic JSON so the orchestration layer can
//! run end to end without external services; production deployments swap in
//! real implementations behind the same [`Agent`] trait.

use crate::agent::{Agent, AgentRegistry, JobDescriptor};
use async_trait::async_trait;
use estator_core::{EstatorResult, JobType};
use serde_json::json;
use std::sync::Arc;

/// Registry with a built-in agent for every downstream job type.
pub fn builtin_registry() -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    registry.register(Arc::new(IntentClassificationAgent));
    registry.register(Arc::new(SearchAgent));
    registry.register(Arc::new(ValuationAgent));
    registry.register(Arc::new(LegalCheckAgent));
    registry.register(Arc::new(VerificationAgent));
    registry.register(Arc::new(SummarizationAgent));
    registry
}

/// Classifies the intent behind a raw query.
pub struct IntentClassificationAgent;

#[async_trait]
impl Agent for IntentClassificationAgent {
    fn job_type(&self) -> JobType {
        JobType::IntentClassification
    }

    async fn accept(&self, descriptor: &JobDescriptor) -> EstatorResult<serde_json::Value> {
        let query = descriptor.payload["query"]
            .as_str()
            .or_else(|| descriptor.payload["user_query"].as_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let intent = if query.contains("worth") || query.contains("value") {
            "valuation"
        } else if query.contains("legal") || query.contains("registry") {
            "legal_check"
        } else {
            "property_search"
        };
        Ok(json!({"intent": intent, "confidence": 0.9}))
    }
}

/// Finds property listings matching the planner-provided criteria.
pub struct SearchAgent;

#[async_trait]
impl Agent for SearchAgent {
    fn job_type(&self) -> JobType {
        JobType::Search
    }

    async fn accept(&self, descriptor: &JobDescriptor) -> EstatorResult<serde_json::Value> {
        let city = descriptor.payload["city"].as_str().unwrap_or("unknown");
        let bedrooms = descriptor.payload["bedrooms"].as_u64().unwrap_or(3);
        Ok(json!({
            "listings": [
                {
                    "listing_id": format!("{}-{}-001", city.to_ascii_lowercase(), bedrooms),
                    "city": city,
                    "bedrooms": bedrooms,
                    "price": 9_500_000,
                },
                {
                    "listing_id": format!("{}-{}-002", city.to_ascii_lowercase(), bedrooms),
                    "city": city,
                    "bedrooms": bedrooms,
                    "price": 11_200_000,
                },
            ],
            "total": 2,
        }))
    }
}

/// Estimates property values and comparables.
pub struct ValuationAgent;

#[async_trait]
impl Agent for ValuationAgent {
    fn job_type(&self) -> JobType {
        JobType::Valuation
    }

    async fn accept(&self, descriptor: &JobDescriptor) -> EstatorResult<serde_json::Value> {
        let asking = descriptor.payload["price"].as_u64().unwrap_or(10_000_000);
        Ok(json!({
            "estimated_value": asking * 97 / 100,
            "confidence_band": {"low": asking * 90 / 100, "high": asking * 105 / 100},
            "comparables": 4,
        }))
    }
}

/// Verifies legal compliance and registry entries.
pub struct LegalCheckAgent;

#[async_trait]
impl Agent for LegalCheckAgent {
    fn job_type(&self) -> JobType {
        JobType::LegalCheck
    }

    async fn accept(&self, _descriptor: &JobDescriptor) -> EstatorResult<serde_json::Value> {
        Ok(json!({
            "compliant": true,
            "checks": ["title_deed", "encumbrance_certificate", "rera_registration"],
            "flags": [],
        }))
    }
}

/// Checks data integrity and fraud signals.
pub struct VerificationAgent;

#[async_trait]
impl Agent for VerificationAgent {
    fn job_type(&self) -> JobType {
        JobType::Verification
    }

    async fn accept(&self, _descriptor: &JobDescriptor) -> EstatorResult<serde_json::Value> {
        Ok(json!({"verified": true, "fraud_signals": []}))
    }
}

/// Produces the final user-facing report.
pub struct SummarizationAgent;

#[async_trait]
impl Agent for SummarizationAgent {
    fn job_type(&self) -> JobType {
        JobType::Summarization
    }

    async fn accept(&self, descriptor: &JobDescriptor) -> EstatorResult<serde_json::Value> {
        let format = descriptor.payload["format"].as_str().unwrap_or("text");
        Ok(json!({
            "format": format,
            "report": "Matching listings were found and passed legal and integrity checks.",
        }))
    }
}
