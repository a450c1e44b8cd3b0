use std::time::Duration;

use i2v_comfyui::api::ComfyUIApiError;
use i2v_comfyui::poller::{format_messages, PollError};
use i2v_comfyui::upload::UploadError;
use i2v_core::error::CoreError;
use serde_json::Value;

/// Every way a job can fail.
///
/// The `Display` text is what the caller receives in `{"error": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// ComfyUI never answered within the startup budget.
    #[error("ComfyUI failed to start")]
    StartupTimeout,

    /// The request is missing required input.
    #[error("{0}")]
    Validation(String),

    /// The workflow template could not be read, parsed or routed.
    #[error("Failed to load workflow template: {0}")]
    Template(String),

    #[error("Failed to upload image: {0}")]
    Upload(#[from] UploadError),

    #[error("Failed to queue prompt: {0}")]
    Submission(ComfyUIApiError),

    #[error("ComfyUI execution error: {}", format_messages(.messages))]
    EngineExecution { messages: Vec<Value> },

    #[error("{0}")]
    NoArtifactProduced(String),

    #[error("Generation timed out after {}s", .elapsed.as_secs())]
    PollTimeout { elapsed: Duration },

    #[error("Job cancelled after {}s", .elapsed.as_secs())]
    Cancelled { elapsed: Duration },

    #[error("Failed to download video: {0}")]
    Retrieval(ComfyUIApiError),
}

impl From<PollError> for JobError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::Execution { messages } => Self::EngineExecution { messages },
            PollError::NoArtifact(reason) => Self::NoArtifactProduced(reason),
            PollError::Timeout { elapsed } => Self::PollTimeout { elapsed },
            PollError::Cancelled { elapsed } => Self::Cancelled { elapsed },
        }
    }
}

impl From<CoreError> for JobError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => Self::Validation(msg),
            other => Self::Template(other.to_string()),
        }
    }
}
