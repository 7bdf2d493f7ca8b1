use thiserror::Error;

/// Node-level errors.
///
/// A `NodeError` fails the NodeExecution that raised it. Whether the run as a
/// whole fails depends on graph topology, not on the error variant.
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Variable not found: {0}")]
    VariableNotFound(String),
    #[error("Variable '{name}' too large: {size} bytes exceeds limit of {limit} bytes")]
    VariableTooLarge {
        name: String,
        size: usize,
        limit: usize,
    },
    #[error("Call depth exceeded: depth {depth} at limit {limit}")]
    CallDepthExceeded { depth: usize, limit: usize },
    #[error("Execution error: {0}")]
    ExecutionError(String),
    #[error("Node execution cancelled")]
    Cancelled,
    #[error("Branch node returned no branch handle")]
    MissingBranchHandle,
    #[error("Branch node returned unknown handle: {0}")]
    UnknownBranchHandle(String),
    #[error("Sub-workflow failed: {0}")]
    SubWorkflowFailed(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::SerializationError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = NodeError::VariableTooLarge {
            name: "out".into(),
            size: 2048,
            limit: 1024,
        };
        let msg = err.to_string();
        assert!(msg.contains("out"));
        assert!(msg.contains("2048"));
        assert!(msg.contains("1024"));

        assert_eq!(
            NodeError::CallDepthExceeded { depth: 5, limit: 5 }.to_string(),
            "Call depth exceeded: depth 5 at limit 5"
        );
        assert_eq!(NodeError::Cancelled.to_string(), "Node execution cancelled");
    }

    #[test]
    fn test_from_serde_error() {
        let serde_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: NodeError = serde_err.into();
        assert!(matches!(err, NodeError::SerializationError(_)));
    }
}
