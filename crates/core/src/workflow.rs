//! ComfyUI API-format workflow graph.
//!
//! A workflow is a JSON object keyed by node id. Each node carries a
//! `class_type` tag and an `inputs` map whose values are either scalars
//! or `[node_id, output_index]` links to other nodes. Any other keys
//! (e.g. `_meta`) are kept verbatim so the graph round-trips unchanged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// One node of a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub class_type: String,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A parsed workflow template, keyed by node id.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowGraph {
    nodes: BTreeMap<String, WorkflowNode>,
}

impl WorkflowGraph {
    /// Parse a workflow exported with ComfyUI's "Save (API format)".
    pub fn from_json_str(text: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn node(&self, node_id: &str) -> Option<&WorkflowNode> {
        self.nodes.get(node_id)
    }

    /// Current value of `node_id.inputs[field]`, if both exist.
    pub fn input(&self, node_id: &str, field: &str) -> Option<&Value> {
        self.nodes.get(node_id)?.inputs.get(field)
    }

    pub fn has_input(&self, node_id: &str, field: &str) -> bool {
        self.input(node_id, field).is_some()
    }

    /// Overwrite an existing input value.
    ///
    /// Both the node and the field must already be present in the
    /// template; templates are never extended at runtime.
    pub fn set_input(&mut self, node_id: &str, field: &str, value: Value) -> Result<(), CoreError> {
        let node = self.nodes.get_mut(node_id).ok_or_else(|| {
            CoreError::Internal(format!("Workflow has no node '{node_id}'"))
        })?;
        let slot = node.inputs.get_mut(field).ok_or_else(|| {
            CoreError::Internal(format!(
                "Node '{node_id}' ({}) has no input '{field}'",
                node.class_type
            ))
        })?;
        *slot = value;
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
