//! Ready-set computation over run-time edge states.
//!
//! The graph itself is immutable; a run tracks one [`EdgeState`] per edge
//! (indexed by edge position). A node is ready once every incoming edge is
//! resolved and at least one was taken; a node whose incoming edges were all
//! skipped is itself skipped.

use super::builder::Graph;

/// Per-run traversal state of a single edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeState {
    /// Source has not completed yet.
    Pending,
    /// Source succeeded and selected this edge.
    Taken,
    /// Source failed, was skipped, or selected a different branch.
    Skipped,
}

/// Nodes whose predecessors have all resolved with at least one taken edge,
/// in graph definition order. The start node (no incoming edges) is never
/// returned; the scheduler seeds it explicitly.
pub fn ready_nodes(graph: &Graph, edge_states: &[EdgeState]) -> Vec<String> {
    let mut ready = Vec::new();
    for node in graph.nodes() {
        let in_edges = graph.in_edge_indices(&node.id);
        if in_edges.is_empty() {
            continue;
        }
        let mut any_taken = false;
        let mut all_resolved = true;
        for &idx in in_edges {
            match edge_states[idx] {
                EdgeState::Pending => {
                    all_resolved = false;
                    break;
                }
                EdgeState::Taken => any_taken = true,
                EdgeState::Skipped => {}
            }
        }
        if all_resolved && any_taken {
            ready.push(node.id.clone());
        }
    }
    ready
}

/// Whether every incoming edge of `node_id` resolved to skipped.
pub fn all_in_edges_skipped(graph: &Graph, edge_states: &[EdgeState], node_id: &str) -> bool {
    let in_edges = graph.in_edge_indices(node_id);
    !in_edges.is_empty()
        && in_edges
            .iter()
            .all(|&idx| edge_states[idx] == EdgeState::Skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::types::{EdgeSpec, GraphSpec, NodeSpec};
    use serde_json::json;

    fn node(id: &str, node_type: &str) -> NodeSpec {
        NodeSpec {
            id: id.to_string(),
            node_type: node_type.to_string(),
            title: None,
            config: json!({}),
            inputs: Default::default(),
            branches: Vec::new(),
        }
    }

    fn edge(source: &str, target: &str) -> EdgeSpec {
        EdgeSpec {
            id: None,
            source: source.to_string(),
            target: target.to_string(),
            branch: None,
        }
    }

    fn diamond() -> Graph {
        // start → {b, c} → d
        Graph::build(GraphSpec {
            nodes: vec![
                node("start", "start"),
                node("b", "task"),
                node("c", "task"),
                node("d", "task"),
                node("end", "end"),
            ],
            edges: vec![
                edge("start", "b"),
                edge("start", "c"),
                edge("b", "d"),
                edge("c", "d"),
                edge("d", "end"),
            ],
        })
        .unwrap()
    }

    #[test]
    fn test_ready_after_start() {
        let graph = diamond();
        let mut states = vec![EdgeState::Pending; graph.edge_count()];
        states[0] = EdgeState::Taken;
        states[1] = EdgeState::Taken;
        assert_eq!(ready_nodes(&graph, &states), vec!["b", "c"]);
    }

    #[test]
    fn test_merge_waits_for_both_predecessors() {
        let graph = diamond();
        let mut states = vec![EdgeState::Pending; graph.edge_count()];
        states[0] = EdgeState::Taken;
        states[1] = EdgeState::Taken;
        states[2] = EdgeState::Taken; // b done, c still pending
        assert!(!ready_nodes(&graph, &states).contains(&"d".to_string()));

        states[3] = EdgeState::Taken;
        assert!(ready_nodes(&graph, &states).contains(&"d".to_string()));
    }

    #[test]
    fn test_merge_ready_with_one_skipped_branch() {
        let graph = diamond();
        let mut states = vec![EdgeState::Pending; graph.edge_count()];
        states[0] = EdgeState::Taken;
        states[1] = EdgeState::Taken;
        states[2] = EdgeState::Taken;
        states[3] = EdgeState::Skipped;
        assert!(ready_nodes(&graph, &states).contains(&"d".to_string()));
    }

    #[test]
    fn test_all_skipped_node_not_ready() {
        let graph = diamond();
        let mut states = vec![EdgeState::Pending; graph.edge_count()];
        states[2] = EdgeState::Skipped;
        states[3] = EdgeState::Skipped;
        assert!(!ready_nodes(&graph, &states).contains(&"d".to_string()));
        assert!(all_in_edges_skipped(&graph, &states, "d"));
    }

    #[test]
    fn test_order_is_definition_order() {
        let graph = diamond();
        let mut states = vec![EdgeState::Taken; graph.edge_count()];
        states[4] = EdgeState::Pending;
        let ready = ready_nodes(&graph, &states);
        assert_eq!(ready, vec!["b", "c", "d"]);
    }
}
