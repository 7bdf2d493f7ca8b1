//! Graph construction and load-time validation.

use std::collections::{HashMap, HashSet};

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::Bfs;

use crate::error::{WorkflowError, WorkflowResult};

use super::types::{EdgeSpec, GraphEdge, GraphNode, GraphSpec, NodeSpec, START_NODE_TYPE};

/// Immutable, validated workflow graph.
///
/// Node and edge iteration order is definition order, which keeps ready-set
/// computation (and therefore step numbering) reproducible across identical
/// re-runs.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<GraphNode>,
    node_index: HashMap<String, usize>,
    edges: Vec<GraphEdge>,
    in_edges: HashMap<String, Vec<usize>>,
    out_edges: HashMap<String, Vec<usize>>,
    start_node_id: String,
    end_node_ids: Vec<String>,
}

impl Graph {
    /// Build and validate a graph from its spec.
    ///
    /// Fails with a `MalformedGraph` error on: duplicate node ids, edges with
    /// unknown endpoints, zero or multiple start nodes, cycles, nodes
    /// unreachable from start, declared branch handles with no matching edge,
    /// and edge branch labels the source node does not declare.
    pub fn build(spec: GraphSpec) -> WorkflowResult<Self> {
        let mut nodes = Vec::with_capacity(spec.nodes.len());
        let mut node_index = HashMap::new();

        for n in &spec.nodes {
            if node_index.contains_key(&n.id) {
                return Err(WorkflowError::DuplicateNodeId(n.id.clone()));
            }
            node_index.insert(n.id.clone(), nodes.len());
            nodes.push(build_node(n));
        }

        let start_node_id = find_start(&nodes)?;
        let end_node_ids: Vec<String> = nodes
            .iter()
            .filter(|n| n.node_type == super::types::END_NODE_TYPE)
            .map(|n| n.id.clone())
            .collect();

        let mut edges = Vec::with_capacity(spec.edges.len());
        let mut in_edges: HashMap<String, Vec<usize>> = HashMap::new();
        let mut out_edges: HashMap<String, Vec<usize>> = HashMap::new();
        for id in node_index.keys() {
            in_edges.insert(id.clone(), Vec::new());
            out_edges.insert(id.clone(), Vec::new());
        }

        for (idx, e) in spec.edges.iter().enumerate() {
            let edge = build_edge(e, idx);
            for endpoint in [&edge.source, &edge.target] {
                if !node_index.contains_key(endpoint) {
                    return Err(WorkflowError::MissingEdgeEndpoint {
                        edge_id: edge.id.clone(),
                        node_id: endpoint.clone(),
                    });
                }
            }
            in_edges
                .get_mut(&edge.target)
                .expect("endpoint checked")
                .push(edges.len());
            out_edges
                .get_mut(&edge.source)
                .expect("endpoint checked")
                .push(edges.len());
            edges.push(edge);
        }

        let graph = Graph {
            nodes,
            node_index,
            edges,
            in_edges,
            out_edges,
            start_node_id,
            end_node_ids,
        };
        graph.validate()?;
        Ok(graph)
    }

    fn validate(&self) -> WorkflowResult<()> {
        // Cycle + reachability checks run over a petgraph view.
        let mut pg: StableDiGraph<&str, ()> = StableDiGraph::new();
        let mut indices: HashMap<&str, NodeIndex> = HashMap::new();
        for node in &self.nodes {
            indices.insert(node.id.as_str(), pg.add_node(node.id.as_str()));
        }
        for edge in &self.edges {
            pg.add_edge(
                indices[edge.source.as_str()],
                indices[edge.target.as_str()],
                (),
            );
        }

        if petgraph::algo::is_cyclic_directed(&pg) {
            return Err(WorkflowError::CycleDetected);
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut bfs = Bfs::new(&pg, indices[self.start_node_id.as_str()]);
        while let Some(idx) = bfs.next(&pg) {
            visited.insert(pg[idx]);
        }
        for node in &self.nodes {
            if !visited.contains(node.id.as_str()) {
                return Err(WorkflowError::UnreachableNode(node.id.clone()));
            }
        }

        self.validate_branches()
    }

    fn validate_branches(&self) -> WorkflowResult<()> {
        for node in &self.nodes {
            let declared: HashSet<&str> = node.branches.iter().map(String::as_str).collect();
            let mut seen: HashSet<&str> = HashSet::new();

            for edge in self.out_edges(&node.id) {
                if let Some(branch) = &edge.branch {
                    if !declared.contains(branch.as_str()) {
                        return Err(WorkflowError::UndeclaredBranchLabel {
                            edge_id: edge.id.clone(),
                            node_id: node.id.clone(),
                            branch: branch.clone(),
                        });
                    }
                    seen.insert(branch.as_str());
                }
            }

            for branch in &node.branches {
                if !seen.contains(branch.as_str()) {
                    return Err(WorkflowError::MissingBranchEdge {
                        node_id: node.id.clone(),
                        branch: branch.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.node_index.get(id).map(|&i| &self.nodes[i])
    }

    /// Nodes in definition order.
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge(&self, idx: usize) -> &GraphEdge {
        &self.edges[idx]
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn start_node_id(&self) -> &str {
        &self.start_node_id
    }

    pub fn end_node_ids(&self) -> &[String] {
        &self.end_node_ids
    }

    /// Incoming edges of a node, in definition order.
    pub fn in_edges(&self, id: &str) -> impl Iterator<Item = &GraphEdge> {
        self.in_edge_indices(id).iter().map(|&i| &self.edges[i])
    }

    /// Outgoing edges of a node, in definition order.
    pub fn out_edges(&self, id: &str) -> impl Iterator<Item = &GraphEdge> {
        self.out_edge_indices(id).iter().map(|&i| &self.edges[i])
    }

    pub(crate) fn in_edge_indices(&self, id: &str) -> &[usize] {
        self.in_edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn out_edge_indices(&self, id: &str) -> &[usize] {
        self.out_edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn build_node(spec: &NodeSpec) -> GraphNode {
    GraphNode {
        id: spec.id.clone(),
        node_type: spec.node_type.clone(),
        title: spec.title.clone().unwrap_or_else(|| spec.id.clone()),
        config: spec.config.clone(),
        inputs: spec.inputs.clone(),
        branches: spec.branches.clone(),
    }
}

fn build_edge(spec: &EdgeSpec, idx: usize) -> GraphEdge {
    let id = match &spec.id {
        Some(id) if !id.is_empty() => id.clone(),
        _ => format!("edge_{}", idx),
    };
    GraphEdge {
        id,
        source: spec.source.clone(),
        target: spec.target.clone(),
        branch: spec.branch.clone(),
    }
}

fn find_start(nodes: &[GraphNode]) -> WorkflowResult<String> {
    let mut start = None;
    for node in nodes {
        if node.node_type == START_NODE_TYPE {
            if start.is_some() {
                return Err(WorkflowError::MultipleStartNodes);
            }
            start = Some(node.id.clone());
        }
    }
    start.ok_or(WorkflowError::NoStartNode)
}
