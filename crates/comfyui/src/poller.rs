//! Completion polling for a submitted prompt.
//!
//! [`poll_until_done`] queries `/history/{prompt_id}` at a fixed cadence
//! and feeds each response through [`evaluate`] until the job reaches a
//! terminal state, the time budget runs out, or the caller cancels.
//! Transport failures while polling are retried; everything the engine
//! reports about the job itself is final.

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::api::ComfyUIApi;
use crate::history::{evaluate, ArtifactDescriptor, JobFailure, JobStatus, OutputTarget};

/// Tunable parameters for completion polling.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay between history queries.
    pub interval: Duration,
    /// Total time allowed for the job, measured from the first poll.
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(3600),
        }
    }
}

/// Ways polling can end without an artifact.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// The engine reported an execution error.
    #[error("ComfyUI execution error: {}", format_messages(.messages))]
    Execution { messages: Vec<Value> },

    /// The job finished without producing the expected output.
    #[error("{0}")]
    NoArtifact(String),

    #[error("Generation timed out after {}s", .elapsed.as_secs())]
    Timeout { elapsed: Duration },

    #[error("Job cancelled after {}s", .elapsed.as_secs())]
    Cancelled { elapsed: Duration },
}

/// Render an engine message list the way it appears in error text.
pub fn format_messages(messages: &[Value]) -> String {
    serde_json::to_string(messages).unwrap_or_else(|_| format!("{messages:?}"))
}

/// Poll until `prompt_id` produces an artifact in `target`.
///
/// Sleeps are clamped to the remaining budget so the timeout is
/// reported at the deadline and no request is issued after it.
pub async fn poll_until_done(
    api: &ComfyUIApi,
    prompt_id: &str,
    target: &OutputTarget,
    config: &PollConfig,
    cancel: &CancellationToken,
) -> Result<ArtifactDescriptor, PollError> {
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        let elapsed = started.elapsed();
        if elapsed >= config.timeout {
            tracing::warn!(
                prompt_id,
                attempts = attempt,
                elapsed_secs = elapsed.as_secs(),
                "Generation timed out",
            );
            return Err(PollError::Timeout { elapsed });
        }

        attempt += 1;
        let history = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(cancelled(prompt_id, started));
            }
            result = api.get_history(prompt_id) => result,
        };

        match history {
            Ok(history) => match evaluate(&history, prompt_id, target) {
                JobStatus::Running => {
                    tracing::debug!(prompt_id, attempt, "Prompt still running");
                }
                JobStatus::Succeeded(artifact) => {
                    tracing::info!(
                        prompt_id,
                        attempt,
                        filename = %artifact.filename,
                        elapsed_secs = started.elapsed().as_secs(),
                        "Prompt completed",
                    );
                    return Ok(artifact);
                }
                JobStatus::Failed(JobFailure::Execution { messages }) => {
                    tracing::error!(prompt_id, attempt, "Prompt failed in ComfyUI");
                    return Err(PollError::Execution { messages });
                }
                JobStatus::Failed(JobFailure::NoArtifact { reason }) => {
                    tracing::error!(prompt_id, attempt, reason = %reason, "Prompt produced no artifact");
                    return Err(PollError::NoArtifact(reason));
                }
            },
            Err(e) => {
                tracing::warn!(prompt_id, attempt, error = %e, "History query failed, retrying");
            }
        }

        let remaining = config.timeout.saturating_sub(started.elapsed());
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(cancelled(prompt_id, started));
            }
            _ = tokio::time::sleep(config.interval.min(remaining)) => {}
        }
    }
}

fn cancelled(prompt_id: &str, started: Instant) -> PollError {
    let elapsed = started.elapsed();
    tracing::info!(prompt_id, elapsed_secs = elapsed.as_secs(), "Polling cancelled");
    PollError::Cancelled { elapsed }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;

    fn fast(timeout: Duration) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(20),
            timeout,
        }
    }

    /// Serve `/history/{id}` with `respond(poll_number)`, counting calls.
    async fn history_server<F>(respond: F) -> (ComfyUIApi, Arc<AtomicUsize>)
    where
        F: Fn(usize) -> Value + Clone + Send + Sync + 'static,
    {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polls);
        let app = Router::new()
            .route(
                "/history/{prompt_id}",
                get(move |State(polls): State<Arc<AtomicUsize>>| {
                    let respond = respond.clone();
                    async move {
                        let n = polls.fetch_add(1, Ordering::SeqCst) + 1;
                        Json(respond(n))
                    }
                }),
            )
            .with_state(counter);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (ComfyUIApi::new(format!("http://{addr}")), polls)
    }

    #[test]
    fn error_messages_render_as_json() {
        let err = PollError::Execution {
            messages: vec![json!(["execution_error", {"node_id": "16"}])],
        };
        assert_eq!(
            err.to_string(),
            r#"ComfyUI execution error: [["execution_error",{"node_id":"16"}]]"#
        );
    }

    #[test]
    fn timeout_names_elapsed_seconds() {
        let err = PollError::Timeout {
            elapsed: Duration::from_millis(5_040),
        };
        assert_eq!(err.to_string(), "Generation timed out after 5s");
    }

    #[tokio::test]
    async fn returns_artifact_after_running_cycles() {
        let (api, polls) = history_server(|n| {
            if n < 3 {
                json!({})
            } else {
                json!({"abc": {"outputs": {"21": {"gifs": [{"filename": "out.mp4", "subfolder": "", "type": "output"}]}}}})
            }
        })
        .await;

        let artifact = poll_until_done(
            &api,
            "abc",
            &OutputTarget::default(),
            &fast(Duration::from_secs(5)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(artifact.filename, "out.mp4");
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn engine_error_is_terminal() {
        let (api, polls) = history_server(|_| {
            json!({"abc": {"status": {"status_str": "error", "messages": ["boom"]}}})
        })
        .await;

        let err = poll_until_done(
            &api,
            "abc",
            &OutputTarget::default(),
            &fast(Duration::from_secs(5)),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert_matches!(err, PollError::Execution { messages } if messages == vec![json!("boom")]);
        assert_eq!(polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn times_out_and_stops_polling() {
        let (api, polls) = history_server(|_| json!({})).await;

        let err = poll_until_done(
            &api,
            "abc",
            &OutputTarget::default(),
            &fast(Duration::from_millis(200)),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert_matches!(err, PollError::Timeout { elapsed } if elapsed >= Duration::from_millis(200));

        let after_timeout = polls.load(Ordering::SeqCst);
        assert!(after_timeout > 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(polls.load(Ordering::SeqCst), after_timeout);
    }

    #[tokio::test]
    async fn error_statuses_are_retried() {
        let polls = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/history/{prompt_id}",
                get(|State(polls): State<Arc<AtomicUsize>>| async move {
                    let n = polls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n <= 2 {
                        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({}))).into_response()
                    } else {
                        Json(json!({"abc": {"outputs": {"21": {"gifs": [{"filename": "out.mp4"}]}}}}))
                            .into_response()
                    }
                }),
            )
            .with_state(Arc::clone(&polls));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let api = ComfyUIApi::new(format!("http://{addr}"));

        let artifact = poll_until_done(
            &api,
            "abc",
            &OutputTarget::default(),
            &fast(Duration::from_secs(5)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(artifact.filename, "out.mp4");
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn transport_errors_are_retried_until_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let api = ComfyUIApi::new(format!("http://{addr}"));

        let err = poll_until_done(
            &api,
            "abc",
            &OutputTarget::default(),
            &fast(Duration::from_millis(150)),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert_matches!(err, PollError::Timeout { .. });
    }

    #[tokio::test]
    async fn cancellation_is_its_own_outcome() {
        let (api, _polls) = history_server(|_| json!({})).await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            trigger.cancel();
        });

        let err = poll_until_done(
            &api,
            "abc",
            &OutputTarget::default(),
            &fast(Duration::from_secs(30)),
            &cancel,
        )
        .await
        .unwrap_err();

        assert_matches!(err, PollError::Cancelled { .. });
    }
}
