use crate::handlers;
use axum::{
    routing::{get, post},
    Router,
};
use estator_queue::DispatchQueue;
use estator_store::JobRepository;
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub repository: Arc<dyn JobRepository>,
    pub queue: Arc<dyn DispatchQueue>,
}

/// The intake/query HTTP server.
pub struct ApiServer;

impl ApiServer {
    /// Assemble the router over a repository and a dispatch queue.
    pub fn build(repository: Arc<dyn JobRepository>, queue: Arc<dyn DispatchQueue>) -> Router {
        let state = Arc::new(AppState { repository, queue });

        Router::new()
            .route("/analyze", post(handlers::analyze))
            .route("/jobs/{job_id}", get(handlers::get_job))
            .route("/jobs/{job_id}/children", get(handlers::list_children))
            .route("/health", get(handlers::health))
            .with_state(state)
    }
}
