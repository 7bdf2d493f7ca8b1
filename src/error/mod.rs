//! Error types for the workflow engine.
//!
//! - [`NodeError`] — Errors raised during a single node execution.
//! - [`WorkflowError`] — Run-level errors for graph building and scheduling.
//!
//! The two levels are deliberately separate: a node failure is recorded on its
//! NodeExecution and only becomes a run failure when the terminal node can no
//! longer be reached.

pub mod node_error;
pub mod workflow_error;

pub use node_error::NodeError;
pub use workflow_error::WorkflowError;

/// Convenience alias for run-level results.
pub type WorkflowResult<T> = Result<T, WorkflowError>;
/// Convenience alias for node-level results.
pub type NodeResult<T> = Result<T, NodeError>;
