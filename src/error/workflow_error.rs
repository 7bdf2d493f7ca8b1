//! Run-level error types.

use super::NodeError;
use thiserror::Error;

/// Run-level errors.
///
/// The `MalformedGraph` variants are raised at build time, before any run
/// starts. Everything else can surface while a run is being scheduled.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Malformed graph: no start node found")]
    NoStartNode,
    #[error("Malformed graph: multiple start nodes found")]
    MultipleStartNodes,
    #[error("Malformed graph: cycle detected")]
    CycleDetected,
    #[error("Malformed graph: duplicate node id: {0}")]
    DuplicateNodeId(String),
    #[error("Malformed graph: edge '{edge_id}' references unknown node: {node_id}")]
    MissingEdgeEndpoint { edge_id: String, node_id: String },
    #[error("Malformed graph: node '{0}' is unreachable from start")]
    UnreachableNode(String),
    #[error("Malformed graph: node '{node_id}' declares branch '{branch}' with no matching edge")]
    MissingBranchEdge { node_id: String, branch: String },
    #[error("Malformed graph: edge '{edge_id}' carries branch '{branch}' not declared by node '{node_id}'")]
    UndeclaredBranchLabel {
        edge_id: String,
        node_id: String,
        branch: String,
    },
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Run not found: {0}")]
    RunNotFound(String),
    #[error("Run already terminal: {0}")]
    RunAlreadyTerminal(String),
    #[error("Workflow cancelled: {0}")]
    Cancelled(String),
    #[error("Worker pool saturated: {outstanding} outstanding submissions at limit {limit}")]
    PoolSaturated { outstanding: usize, limit: usize },
    #[error("Persistence error: {0}")]
    Persistence(#[from] crate::repository::RepositoryError),
    #[error("Node error: {0}")]
    Node(#[from] NodeError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WorkflowError {
    /// Whether this error is a load-time graph validation failure.
    pub fn is_malformed_graph(&self) -> bool {
        matches!(
            self,
            WorkflowError::NoStartNode
                | WorkflowError::MultipleStartNodes
                | WorkflowError::CycleDetected
                | WorkflowError::DuplicateNodeId(_)
                | WorkflowError::MissingEdgeEndpoint { .. }
                | WorkflowError::UnreachableNode(_)
                | WorkflowError::MissingBranchEdge { .. }
                | WorkflowError::UndeclaredBranchLabel { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            WorkflowError::NoStartNode.to_string(),
            "Malformed graph: no start node found"
        );
        assert_eq!(
            WorkflowError::UnreachableNode("n3".into()).to_string(),
            "Malformed graph: node 'n3' is unreachable from start"
        );
        let err = WorkflowError::MissingBranchEdge {
            node_id: "cond".into(),
            branch: "true".into(),
        };
        assert!(err.to_string().contains("cond"));
        assert!(err.to_string().contains("true"));
    }

    #[test]
    fn test_malformed_classification() {
        assert!(WorkflowError::CycleDetected.is_malformed_graph());
        assert!(WorkflowError::MultipleStartNodes.is_malformed_graph());
        assert!(!WorkflowError::Cancelled("stop".into()).is_malformed_graph());
        assert!(!WorkflowError::Internal("x".into()).is_malformed_graph());
    }

    #[test]
    fn test_from_node_error() {
        let err: WorkflowError = NodeError::Cancelled.into();
        assert!(matches!(err, WorkflowError::Node(_)));
    }
}
