//! The node execution seam.
//!
//! The engine is agnostic to what a node actually does; the host supplies a
//! [`NodeRunner`] and the scheduler hands it one invocation per dispatched
//! node, with inputs already resolved and snapshotted.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::NodeResult;

/// One resolved node invocation.
#[derive(Debug, Clone)]
pub struct NodeInvocation {
    pub run_id: String,
    pub node_id: String,
    pub node_type: String,
    /// Opaque node configuration from the graph spec.
    pub config: Value,
    /// Declared inputs, resolved against the pool snapshot at dispatch time.
    pub inputs: HashMap<String, Value>,
}

/// What a node produced.
#[derive(Debug, Clone, Default)]
pub struct NodeOutput {
    pub outputs: HashMap<String, Value>,
    /// Selected branch handle; required for branch nodes, ignored otherwise.
    pub branch: Option<String>,
}

impl NodeOutput {
    pub fn with_outputs(outputs: HashMap<String, Value>) -> Self {
        NodeOutput {
            outputs,
            branch: None,
        }
    }

    pub fn with_branch(branch: impl Into<String>) -> Self {
        NodeOutput {
            outputs: HashMap::new(),
            branch: Some(branch.into()),
        }
    }
}

/// Executes a single node's domain logic.
///
/// The cancellation token is the task's cooperation point: a runner should
/// finish or abandon its current work when the token fires, and the pool
/// guarantees the runner is never invoked for a task cancelled before start.
#[async_trait]
pub trait NodeRunner: Send + Sync {
    async fn run(&self, invocation: NodeInvocation, cancel: CancellationToken)
        -> NodeResult<NodeOutput>;
}
