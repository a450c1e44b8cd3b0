//! Interpretation of `GET /history/{prompt_id}` responses.
//!
//! ComfyUI only writes a history record once a prompt has left the
//! queue, so one response is enough to classify the job. [`evaluate`]
//! is the per-cycle transition function of the completion poller and
//! has no I/O, so it can be tested against canned responses.

use i2v_core::routing::{NODE_VIDEO_COMBINE, VIDEO_OUTPUT_KEY};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Locator for a file the engine produced. Not the file itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Storage class: `output`, `temp` or `input`.
    #[serde(rename = "type", default = "default_storage_type")]
    pub storage_type: String,
}

fn default_storage_type() -> String {
    "output".to_string()
}

/// Where in a history record the job's artifact is reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    pub node_id: String,
    pub output_key: String,
}

impl Default for OutputTarget {
    fn default() -> Self {
        Self {
            node_id: NODE_VIDEO_COMBINE.to_string(),
            output_key: VIDEO_OUTPUT_KEY.to_string(),
        }
    }
}

/// Job state derived from a single history response.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    /// No record yet.
    Running,
    /// The output slot holds at least one file; this is the first.
    Succeeded(ArtifactDescriptor),
    Failed(JobFailure),
}

/// Terminal failures reported through history.
#[derive(Debug, Clone, PartialEq)]
pub enum JobFailure {
    /// `status.status_str == "error"`; messages are the engine's, untouched.
    Execution { messages: Vec<Value> },
    /// The prompt finished but produced nothing usable.
    NoArtifact { reason: String },
}

/// Classify a history response for `prompt_id`.
///
/// An error status wins over any outputs that were also recorded.
pub fn evaluate(history: &Value, prompt_id: &str, target: &OutputTarget) -> JobStatus {
    let Some(entry) = history.get(prompt_id) else {
        return JobStatus::Running;
    };

    let status = entry.get("status");
    if status
        .and_then(|s| s.get("status_str"))
        .and_then(Value::as_str)
        == Some("error")
    {
        let messages = status
            .and_then(|s| s.get("messages"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        return JobStatus::Failed(JobFailure::Execution { messages });
    }

    let Some(node_output) = entry
        .get("outputs")
        .and_then(|outputs| outputs.get(&target.node_id))
        .filter(|output| is_present(output))
    else {
        return JobStatus::Failed(JobFailure::NoArtifact {
            reason: format!("No output from node {}", target.node_id),
        });
    };

    let first = node_output
        .get(&target.output_key)
        .and_then(Value::as_array)
        .and_then(|files| files.first());

    match first {
        Some(file) => match ArtifactDescriptor::deserialize(file) {
            Ok(descriptor) => JobStatus::Succeeded(descriptor),
            Err(e) => JobStatus::Failed(JobFailure::NoArtifact {
                reason: format!("Malformed output descriptor: {e}"),
            }),
        },
        None => JobStatus::Failed(JobFailure::NoArtifact {
            reason: "No video generated".to_string(),
        }),
    }
}

/// Null and empty objects carry no output.
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}
