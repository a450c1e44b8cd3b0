//! HTTP surface the job supervisor talks to.
//!
//! `POST /run` takes a job envelope `{"id"?: ..., "input": {...}}` and
//! answers with the job output once the video is ready. Failures are
//! part of the output (`{"error": ...}`), so the status is always 200
//! for a request that reached the handler.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use i2v_core::job::{JobOutput, JobRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::runner::JobRunner;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<JobRunner>,
    /// Cancelled on shutdown; every job runs under a child token.
    pub shutdown: CancellationToken,
}

#[derive(Debug, Deserialize)]
struct JobEnvelope {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    input: Option<Value>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Build the router with tracing middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/run", post(run_job))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn run_job(State(state): State<AppState>, body: Bytes) -> Json<JobOutput> {
    let envelope: JobEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => return Json(JobOutput::failure(format!("Invalid job input: {e}"))),
    };

    let input = envelope
        .input
        .unwrap_or_else(|| Value::Object(Default::default()));
    let request: JobRequest = match serde_json::from_value(input) {
        Ok(request) => request,
        Err(e) => return Json(JobOutput::failure(format!("Invalid job input: {e}"))),
    };

    let job_id = envelope
        .id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let span = tracing::info_span!("job", job_id = %job_id);
    let cancel = state.shutdown.child_token();

    let output = async {
        tracing::info!("Job received");
        state.runner.run_to_output(&request, &cancel).await
    }
    .instrument(span)
    .await;

    Json(output)
}
