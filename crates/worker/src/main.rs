//! `i2v-worker` -- image-to-video job adapter for ComfyUI.
//!
//! Serves `POST /run` for the job supervisor. Each job uploads the
//! input image, injects the request into the baked-in workflow, queues
//! it on the local ComfyUI instance and returns the finished video as
//! base64. See [`WorkerConfig::from_env`] for environment variables.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use i2v_worker::config::WorkerConfig;
use i2v_worker::runner::JobRunner;
use i2v_worker::server::{self, AppState};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "i2v_worker=debug,i2v_comfyui=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = WorkerConfig::from_env();
    tracing::info!(
        comfy_url = %config.comfy_url,
        workflow_path = %config.workflow_path.display(),
        generation_timeout_secs = config.generation_timeout_secs,
        "Loaded worker configuration",
    );

    let runner = JobRunner::new(config.clone()).expect("Failed to build HTTP client");

    // The template is re-read per job; checking it here only surfaces
    // a broken deployment early.
    match runner.load_template().await {
        Ok(graph) => tracing::info!(nodes = graph.node_count(), "Workflow template validated"),
        Err(e) => tracing::error!(error = %e, "Workflow template is unusable, jobs will fail"),
    }

    // --- Router ---
    let shutdown = CancellationToken::new();
    let app = server::router(AppState {
        runner: Arc::new(runner),
        shutdown: shutdown.clone(),
    });

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting worker");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // In-flight jobs see this and end as cancelled.
            shutdown.cancel();
        })
        .await
        .expect("Server error");

    tracing::info!("Worker stopped");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the worker
/// shuts down cleanly whether stopped interactively or by the
/// container runtime.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
