//! HTTP intake and query surface for the Estator pipeline.
//!
//! `POST /analyze` is the only write: it creates the root planning job and
//! enqueues its dispatch message, then returns immediately. All progress is
//! observed by polling `GET /jobs/{job_id}` and `GET /jobs/{job_id}/children`;
//! job status and `error_message` are the only failure signal the surface
//! exposes beyond request validation.

/// Route handlers and request/response shapes.
pub mod handlers;
/// Router assembly and shared state.
pub mod server;

pub use server::{ApiServer, AppState};
