//! Immutable workflow graph model.
//!
//! A [`Graph`] is built once from a serde-friendly [`GraphSpec`] and validated
//! at load time; after that it only answers structural queries. All traversal
//! state (which edges were taken or skipped during a run) belongs to the
//! scheduler, not the graph.

pub mod builder;
pub mod traversal;
pub mod types;

pub use builder::Graph;
pub use traversal::{all_in_edges_skipped, ready_nodes, EdgeState};
pub use types::{EdgeSpec, GraphEdge, GraphNode, GraphSpec, NodeSpec};
pub use types::{END_NODE_TYPE, START_NODE_TYPE, SUBFLOW_NODE_TYPE};
