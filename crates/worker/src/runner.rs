//! End-to-end execution of one image-to-video job.
//!
//! A job walks a fixed sequence: validate input, wait for ComfyUI,
//! load the template, upload the image, inject parameters, queue the
//! prompt, poll for completion, download the video. Every step either
//! succeeds or ends the job; only the readiness probe and the poller
//! retry, and only on transport failures.

use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use i2v_comfyui::api::ComfyUIApi;
use i2v_comfyui::poller::{poll_until_done, PollError};
use i2v_comfyui::readiness::wait_ready;
use i2v_comfyui::upload::upload_encoded;
use i2v_core::job::{JobOutput, JobRequest};
use i2v_core::routing::RoutingTable;
use i2v_core::workflow::WorkflowGraph;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::JobError;

/// A finished job before encoding for the response.
#[derive(Debug, Clone)]
pub struct JobSuccess {
    pub prompt_id: String,
    pub filename: String,
    pub seed: u64,
    /// Raw video bytes as served by ComfyUI.
    pub video: Vec<u8>,
}

/// Runs jobs against one ComfyUI instance.
///
/// Holds no per-job state; a single runner can be shared across
/// concurrent requests.
pub struct JobRunner {
    api: ComfyUIApi,
    routing: RoutingTable,
    config: WorkerConfig,
}

impl JobRunner {
    /// Build a runner whose HTTP client applies the configured per-call
    /// timeout.
    pub fn new(config: WorkerConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        let api = ComfyUIApi::with_client(client, config.comfy_url.clone());
        Ok(Self::with_api(api, config))
    }

    pub fn with_api(api: ComfyUIApi, config: WorkerConfig) -> Self {
        Self {
            api,
            routing: RoutingTable::default(),
            config,
        }
    }

    /// Read and parse a fresh copy of the template, and check that every
    /// routing target exists in it.
    pub async fn load_template(&self) -> Result<WorkflowGraph, JobError> {
        let path = &self.config.workflow_path;
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| JobError::Template(format!("{}: {e}", path.display())))?;
        let graph = WorkflowGraph::from_json_str(&text)?;
        self.routing.validate(&graph)?;
        Ok(graph)
    }

    /// Run a job and render the result in the response shape.
    pub async fn run_to_output(&self, request: &JobRequest, cancel: &CancellationToken) -> JobOutput {
        match self.run(request, cancel).await {
            Ok(success) => {
                tracing::info!(
                    prompt_id = %success.prompt_id,
                    filename = %success.filename,
                    seed = success.seed,
                    "Job completed",
                );
                JobOutput::Success {
                    video: STANDARD.encode(&success.video),
                    filename: success.filename,
                    seed: success.seed,
                }
            }
            Err(e) => {
                match &e {
                    JobError::Validation(_) => tracing::warn!(error = %e, "Job rejected"),
                    _ => tracing::error!(error = %e, "Job failed"),
                }
                JobOutput::failure(e.to_string())
            }
        }
    }

    /// Run a job to completion.
    ///
    /// Input is validated before anything is sent to ComfyUI.
    pub async fn run(
        &self,
        request: &JobRequest,
        cancel: &CancellationToken,
    ) -> Result<JobSuccess, JobError> {
        let started = Instant::now();
        let image = request.require_image()?;

        if !wait_ready(&self.api, &self.config.readiness(), cancel).await {
            if cancel.is_cancelled() {
                return Err(JobError::Cancelled {
                    elapsed: started.elapsed(),
                });
            }
            return Err(JobError::StartupTimeout);
        }

        let mut graph = self.load_template().await?;

        let image_name = upload_encoded(&self.api, image, &self.config.upload_filename).await?;
        tracing::info!(image_name = %image_name, "Input image uploaded");

        let seed = request.resolve_seed();
        self.routing
            .parameterize(&mut graph, request, &image_name, seed)?;

        let client_id = uuid::Uuid::new_v4().to_string();
        let submitted = self
            .api
            .submit_workflow(&graph, &client_id)
            .await
            .map_err(JobError::Submission)?;
        let prompt_id = submitted.prompt_id;
        tracing::info!(
            prompt_id = %prompt_id,
            queue_position = submitted.number,
            seed,
            "Workflow queued",
        );

        let artifact = match poll_until_done(
            &self.api,
            &prompt_id,
            &self.config.output_target(),
            &self.config.polling(),
            cancel,
        )
        .await
        {
            Ok(artifact) => artifact,
            Err(e @ PollError::Cancelled { .. }) => {
                self.abandon(&prompt_id).await;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        let video = self
            .api
            .view(&artifact)
            .await
            .map_err(JobError::Retrieval)?;

        tracing::info!(
            prompt_id = %prompt_id,
            filename = %artifact.filename,
            size_bytes = video.len(),
            elapsed_secs = started.elapsed().as_secs(),
            "Video retrieved",
        );

        Ok(JobSuccess {
            prompt_id,
            filename: artifact.filename,
            seed,
            video,
        })
    }

    /// Ask ComfyUI to drop a prompt nobody is waiting for anymore.
    async fn abandon(&self, prompt_id: &str) {
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            self.api.cancel_execution(prompt_id),
        )
        .await;

        match result {
            Ok(Ok(())) => tracing::info!(prompt_id, "Removed prompt from ComfyUI queue"),
            Ok(Err(e)) => tracing::warn!(prompt_id, error = %e, "Failed to remove prompt from queue"),
            Err(_) => tracing::warn!(prompt_id, "Timed out removing prompt from queue"),
        }
    }
}
