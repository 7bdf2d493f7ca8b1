use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::variable_pool::Selector;

/// Structural marker for the designated entry node.
pub const START_NODE_TYPE: &str = "start";
/// Structural marker for terminal nodes.
pub const END_NODE_TYPE: &str = "end";
/// Node type the engine executes itself as a nested run.
pub const SUBFLOW_NODE_TYPE: &str = "subflow";

/// Authoring-side node description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Opaque configuration handed to the NodeRunner.
    #[serde(default)]
    pub config: Value,
    /// Declared inputs: variable name → selector resolved at dispatch time.
    #[serde(default)]
    pub inputs: HashMap<String, Selector>,
    /// Declared branch handles for conditional nodes. Non-empty marks the
    /// node as a branch node.
    #[serde(default)]
    pub branches: Vec<String>,
}

/// Authoring-side edge description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSpec {
    #[serde(default)]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    /// Branch-selector label; an unlabeled edge is taken whenever its source
    /// succeeds.
    #[serde(default)]
    pub branch: Option<String>,
}

/// The serde-facing description a host submits; validated into a [`Graph`].
///
/// [`Graph`]: super::Graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSpec {
    pub nodes: Vec<NodeSpec>,
    pub edges: Vec<EdgeSpec>,
}

/// Validated graph node.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: String,
    pub node_type: String,
    pub title: String,
    pub config: Value,
    pub inputs: HashMap<String, Selector>,
    pub branches: Vec<String>,
}

impl GraphNode {
    pub fn is_branch(&self) -> bool {
        !self.branches.is_empty()
    }

    /// Structural nodes are auto-completed by the scheduler and never
    /// dispatched to the NodeRunner.
    pub fn is_structural(&self) -> bool {
        self.node_type == START_NODE_TYPE || self.node_type == END_NODE_TYPE
    }

    pub fn is_subflow(&self) -> bool {
        self.node_type == SUBFLOW_NODE_TYPE
    }
}

/// Validated graph edge.
#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub branch: Option<String>,
}
