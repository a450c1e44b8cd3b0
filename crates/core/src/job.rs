//! Job contract: the request a caller submits and the output it gets back.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::routing;

/// Upper bound (inclusive) for generated seeds: 2^53, the largest
/// integer a JSON consumer can represent exactly as a double.
pub const MAX_SEED: u64 = 1 << 53;

/// Error message returned when the mandatory input image is absent.
pub const MISSING_IMAGE_MESSAGE: &str = "Missing required field: 'image' (base64-encoded PNG/JPG)";

/// User-supplied generation request.
///
/// Every override is optional; an absent field keeps the template
/// default. `image` is optional on the wire only so that its absence
/// can be reported as a job error instead of a parse failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Base64-encoded source image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    /// Step at which the high-noise pass hands over to the low-noise pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_step: Option<u32>,
    /// Video length in frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motion_amplitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sharpen_strength: Option<f64>,
}

impl JobRequest {
    /// Check the request can be run and return the encoded image.
    pub fn require_image(&self) -> Result<&str, CoreError> {
        self.image
            .as_deref()
            .ok_or_else(|| CoreError::Validation(MISSING_IMAGE_MESSAGE.to_string()))
    }

    /// The caller's seed, or a fresh uniformly drawn one.
    pub fn resolve_seed(&self) -> u64 {
        self.seed.unwrap_or_else(random_seed)
    }

    /// Present overrides as `(routing field, value)` pairs.
    ///
    /// `image` and `seed` are excluded: the image must be uploaded
    /// first and the seed is always written, drawn or not.
    pub fn overrides(&self) -> Vec<(&'static str, Value)> {
        let mut fields = Vec::new();
        let mut push = |name: &'static str, value: Option<Value>| {
            if let Some(value) = value {
                fields.push((name, value));
            }
        };

        push(routing::FIELD_PROMPT, self.prompt.clone().map(Value::from));
        push(
            routing::FIELD_NEGATIVE_PROMPT,
            self.negative_prompt.clone().map(Value::from),
        );
        push(routing::FIELD_STEPS, self.steps.map(Value::from));
        push(routing::FIELD_SPLIT_STEP, self.split_step.map(Value::from));
        push(routing::FIELD_LENGTH, self.length.map(Value::from));
        push(
            routing::FIELD_MOTION_AMPLITUDE,
            self.motion_amplitude.map(Value::from),
        );
        push(routing::FIELD_WIDTH, self.width.map(Value::from));
        push(routing::FIELD_HEIGHT, self.height.map(Value::from));
        push(routing::FIELD_FRAME_RATE, self.frame_rate.map(Value::from));
        push(
            routing::FIELD_SHARPEN_STRENGTH,
            self.sharpen_strength.map(Value::from),
        );

        fields
    }
}

/// Draw a seed uniformly from `0..=MAX_SEED`.
pub fn random_seed() -> u64 {
    rand::rng().random_range(0..=MAX_SEED)
}

/// Result of one job, as returned to the caller.
///
/// Serialized untagged so the wire shape is either
/// `{"video", "filename", "seed"}` or `{"error"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobOutput {
    Success {
        /// Base64-encoded video bytes.
        video: String,
        filename: String,
        seed: u64,
    },
    Failure { error: String },
}

impl JobOutput {
    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }
}
