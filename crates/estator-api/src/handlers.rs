use crate::server::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use estator_core::{EstatorError, JobType, NewJob};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Intake request. `request_payload` is carried through to the job verbatim
/// beyond the validated `user_query` field.
#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    /// Optional caller identity, folded into the stored payload.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Must contain a non-empty string `user_query`.
    #[serde(default)]
    pub request_payload: serde_json::Value,
}

/// Handler error: an `EstatorError` with its HTTP mapping.
pub struct ApiError(EstatorError);

impl From<EstatorError> for ApiError {
    fn from(e: EstatorError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EstatorError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EstatorError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %self.0, "request failed");
        }
        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

fn validated_query(payload: &serde_json::Value) -> Result<String, EstatorError> {
    match payload.get("user_query").and_then(|v| v.as_str()) {
        Some(q) if !q.trim().is_empty() => Ok(q.to_string()),
        Some(_) => Err(EstatorError::Validation(
            "user_query must not be empty".to_string(),
        )),
        None => Err(EstatorError::Validation(
            "request_payload.user_query must be a string".to_string(),
        )),
    }
}

/// `POST /analyze`: create the root planning job and enqueue its dispatch.
/// Validation failures never create a row; an enqueue failure after creation
/// leaves the `pending` row in place for inspection and returns 500.
pub async fn analyze(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalyzeRequest>,
) -> ApiResult {
    let query = validated_query(&req.request_payload)?;

    let mut payload = req.request_payload;
    if let Some(user_id) = req.user_id {
        payload["user_id"] = json!(user_id);
    }

    let job = state
        .repository
        .create(NewJob::root(JobType::Planning, payload.clone()))
        .await?;

    state
        .queue
        .send(estator_queue::DispatchMessage::new(
            job.job_id.clone(),
            payload,
        ))
        .await?;

    info!(job_id = %job.job_id, query_len = query.len(), "analysis job accepted");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "job_id": job.job_id,
            "message": "analysis started, poll /jobs/{job_id} for status",
        })),
    )
        .into_response())
}

/// `GET /jobs/{job_id}`: the full job record.
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult {
    let job = state.repository.get(&job_id).await?;
    Ok(Json(job).into_response())
}

/// `GET /jobs/{job_id}/children`: fan-out children in creation order.
/// The parent must exist even when it has no children.
pub async fn list_children(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult {
    state.repository.get(&job_id).await?;
    let children = state.repository.list_children(&job_id).await?;
    Ok(Json(children).into_response())
}

/// `GET /health`: liveness plus a store round-trip.
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    match state.repository.ping().await {
        Ok(()) => Json(json!({"status": "ok", "service": "estator"})).into_response(),
        Err(e) => {
            warn!(error = %e, "store ping failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "degraded", "service": "estator"})),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_validated_query_accepts_non_empty() {
        let payload = json!({"user_query": "Find 3BHK in Noida"});
        assert_eq!(
            validated_query(&payload).unwrap(),
            "Find 3BHK in Noida"
        );
    }

    #[test]
    fn test_validated_query_rejects_empty_and_whitespace() {
        assert!(validated_query(&json!({"user_query": ""})).is_err());
        assert!(validated_query(&json!({"user_query": "   "})).is_err());
    }

    #[test]
    fn test_validated_query_rejects_missing_and_non_string() {
        assert!(validated_query(&json!({})).is_err());
        assert!(validated_query(&json!({"user_query": 42})).is_err());
        assert!(validated_query(&serde_json::Value::Null).is_err());
    }
}
