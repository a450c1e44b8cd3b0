//! Request-field to workflow-input routing.
//!
//! The routing table is the contract between the job request and one
//! particular workflow template: each request field maps to one or more
//! `(node id, input name)` locations. The table and the template must be
//! swapped together; [`RoutingTable::validate`] checks they agree.

use serde_json::Value;

use crate::error::CoreError;
use crate::job::JobRequest;
use crate::workflow::WorkflowGraph;

// ---------------------------------------------------------------------------
// Request fields
// ---------------------------------------------------------------------------

pub const FIELD_IMAGE: &str = "image";
pub const FIELD_PROMPT: &str = "prompt";
pub const FIELD_NEGATIVE_PROMPT: &str = "negative_prompt";
pub const FIELD_SEED: &str = "seed";
pub const FIELD_STEPS: &str = "steps";
pub const FIELD_SPLIT_STEP: &str = "split_step";
pub const FIELD_LENGTH: &str = "length";
pub const FIELD_MOTION_AMPLITUDE: &str = "motion_amplitude";
pub const FIELD_WIDTH: &str = "width";
pub const FIELD_HEIGHT: &str = "height";
pub const FIELD_FRAME_RATE: &str = "frame_rate";
pub const FIELD_SHARPEN_STRENGTH: &str = "sharpen_strength";

// ---------------------------------------------------------------------------
// Node ids in the bundled Wan 2.2 image-to-video template
// ---------------------------------------------------------------------------

/// `LoadImage`
pub const NODE_LOAD_IMAGE: &str = "5";
/// `ImageResizeKJv2`
pub const NODE_RESIZE: &str = "6";
/// `CLIPTextEncode` (positive)
pub const NODE_POSITIVE_PROMPT: &str = "7";
/// `CLIPTextEncode` (negative)
pub const NODE_NEGATIVE_PROMPT: &str = "8";
/// `PainterI2VAdvanced`
pub const NODE_PAINTER_I2V: &str = "15";
/// `KSamplerAdvanced`, high-noise first pass.
pub const NODE_SAMPLER_HIGH: &str = "16";
/// `KSamplerAdvanced`, low-noise second pass.
pub const NODE_SAMPLER_LOW: &str = "18";
/// `FastUnsharpSharpen`
pub const NODE_SHARPEN: &str = "20";
/// `VHS_VideoCombine`, also the node whose output holds the video.
pub const NODE_VIDEO_COMBINE: &str = "21";

/// Output slot `VHS_VideoCombine` reports files under (even for mp4).
pub const VIDEO_OUTPUT_KEY: &str = "gifs";

/// A single graph location a field is written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub node_id: String,
    pub input: String,
}

/// All locations one request field is written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub field: String,
    pub targets: Vec<RouteTarget>,
}

/// Ordered mapping of request fields to graph locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTable {
    routes: Vec<Route>,
}

impl RoutingTable {
    /// An empty table; build with [`route`](Self::route).
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Add a route from `field` to each `(node id, input)` pair.
    pub fn route(mut self, field: &str, targets: &[(&str, &str)]) -> Self {
        self.routes.push(Route {
            field: field.to_string(),
            targets: targets
                .iter()
                .map(|(node_id, input)| RouteTarget {
                    node_id: node_id.to_string(),
                    input: input.to_string(),
                })
                .collect(),
        });
        self
    }

    pub fn targets(&self, field: &str) -> Option<&[RouteTarget]> {
        self.routes
            .iter()
            .find(|route| route.field == field)
            .map(|route| route.targets.as_slice())
    }

    /// Check that every target exists in `graph`.
    ///
    /// Reports all missing locations at once rather than the first.
    pub fn validate(&self, graph: &WorkflowGraph) -> Result<(), CoreError> {
        let missing: Vec<String> = self
            .routes
            .iter()
            .flat_map(|route| {
                route
                    .targets
                    .iter()
                    .filter(move |t| !graph.has_input(&t.node_id, &t.input))
                    .map(move |t| format!("{} -> {}.{}", route.field, t.node_id, t.input))
            })
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Internal(format!(
                "Routing targets missing from workflow: {}",
                missing.join(", ")
            )))
        }
    }

    /// Write `value` to every target of `field`.
    pub fn write(
        &self,
        graph: &mut WorkflowGraph,
        field: &str,
        value: Value,
    ) -> Result<(), CoreError> {
        let targets = self
            .targets(field)
            .ok_or_else(|| CoreError::Internal(format!("No route for field '{field}'")))?;

        for target in targets {
            graph.set_input(&target.node_id, &target.input, value.clone())?;
        }
        Ok(())
    }

    /// Write each `(field, value)` pair.
    pub fn apply<'a>(
        &self,
        graph: &mut WorkflowGraph,
        fields: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> Result<(), CoreError> {
        for (field, value) in fields {
            self.write(graph, field, value)?;
        }
        Ok(())
    }

    /// Inject a job into a freshly loaded template.
    ///
    /// `image_name` is the name the engine assigned on upload and `seed`
    /// the resolved seed. Request fields that are absent leave the
    /// template value in place.
    pub fn parameterize(
        &self,
        graph: &mut WorkflowGraph,
        request: &JobRequest,
        image_name: &str,
        seed: u64,
    ) -> Result<(), CoreError> {
        self.write(graph, FIELD_IMAGE, Value::from(image_name))?;
        self.write(graph, FIELD_SEED, Value::from(seed))?;
        self.apply(graph, request.overrides())
    }
}

impl Default for RoutingTable {
    /// Routing for the bundled Wan 2.2 image-to-video template.
    fn default() -> Self {
        Self::new()
            .route(FIELD_IMAGE, &[(NODE_LOAD_IMAGE, "image")])
            .route(FIELD_PROMPT, &[(NODE_POSITIVE_PROMPT, "text")])
            .route(FIELD_NEGATIVE_PROMPT, &[(NODE_NEGATIVE_PROMPT, "text")])
            .route(
                FIELD_SEED,
                &[
                    (NODE_SAMPLER_HIGH, "noise_seed"),
                    (NODE_SAMPLER_LOW, "noise_seed"),
                ],
            )
            .route(
                FIELD_STEPS,
                &[(NODE_SAMPLER_HIGH, "steps"), (NODE_SAMPLER_LOW, "steps")],
            )
            .route(
                FIELD_SPLIT_STEP,
                &[
                    (NODE_SAMPLER_HIGH, "end_at_step"),
                    (NODE_SAMPLER_LOW, "start_at_step"),
                ],
            )
            .route(FIELD_LENGTH, &[(NODE_PAINTER_I2V, "length")])
            .route(
                FIELD_MOTION_AMPLITUDE,
                &[(NODE_PAINTER_I2V, "motion_amplitude")],
            )
            .route(FIELD_WIDTH, &[(NODE_RESIZE, "width")])
            .route(FIELD_HEIGHT, &[(NODE_RESIZE, "height")])
            .route(FIELD_FRAME_RATE, &[(NODE_VIDEO_COMBINE, "frame_rate")])
            .route(FIELD_SHARPEN_STRENGTH, &[(NODE_SHARPEN, "strength")])
    }
}
