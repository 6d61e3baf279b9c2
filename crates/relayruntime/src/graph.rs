//! Execution order over a canvas.
//!
//! Traversal is breadth-first from the trigger node and visits every node at
//! most once, which also bounds it on cyclic canvases. Acyclicity itself is
//! only enforced by [`validate_canvas`].

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;
use relaycore::{Canvas, CanvasError, Edge, NodeId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

/// How conditional edges are followed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BranchMode {
    /// Every successor is enqueued regardless of `sourceHandle`, so both
    /// arms of a `logic.if` run.
    #[default]
    AllSuccessors,
    /// An edge with a `sourceHandle` is followed only when it matches the
    /// branch reported by its source node.
    MatchHandle,
}

impl FromStr for BranchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "all-successors" | "all_successors" => Ok(BranchMode::AllSuccessors),
            "match" | "match-handle" | "match_handle" | "prune" => Ok(BranchMode::MatchHandle),
            other => Err(format!("unknown branch mode: {}", other)),
        }
    }
}

impl fmt::Display for BranchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchMode::AllSuccessors => f.write_str("all-successors"),
            BranchMode::MatchHandle => f.write_str("match-handle"),
        }
    }
}

/// Stateful breadth-first cursor.
///
/// The caller pops a node with [`Traversal::next`], executes it, and then
/// calls [`Traversal::expand`] so its successors join the queue.
pub struct Traversal<'a> {
    edges: &'a [Edge],
    visited: HashSet<&'a str>,
    queue: VecDeque<&'a str>,
}

impl<'a> Traversal<'a> {
    /// Start at `start`; the start node itself is marked visited but not queued.
    pub fn new(edges: &'a [Edge], start: &'a str) -> Self {
        let mut visited = HashSet::new();
        visited.insert(start);
        Self {
            edges,
            visited,
            queue: VecDeque::new(),
        }
    }

    /// Queue the unvisited successors of `node_id`, in edge-list order.
    /// With `branch` set, edges carrying a different `sourceHandle` are skipped.
    pub fn expand(&mut self, node_id: &str, branch: Option<&str>) {
        let edges = self.edges;
        for edge in edges.iter().filter(|e| e.source == node_id) {
            if let (Some(taken), Some(handle)) = (branch, edge.source_handle.as_deref()) {
                if taken != handle {
                    tracing::debug!(
                        "Skipping edge {} -> {} (handle {} not taken)",
                        edge.source,
                        edge.target,
                        handle
                    );
                    continue;
                }
            }
            if self.visited.insert(edge.target.as_str()) {
                self.queue.push_back(edge.target.as_str());
            }
        }
    }

    pub fn next(&mut self) -> Option<&'a str> {
        self.queue.pop_front()
    }
}

/// Ordered, deduplicated list of nodes reachable from `start`, excluding it.
pub fn downstream_order(start: &str, edges: &[Edge]) -> Vec<NodeId> {
    let mut traversal = Traversal::new(edges, start);
    traversal.expand(start, None);
    let mut order = Vec::new();
    while let Some(id) = traversal.next() {
        order.push(id.to_string());
        traversal.expand(id, None);
    }
    order
}

/// Structural checks run when a flow is saved.
pub fn validate_canvas(canvas: &Canvas) -> Result<(), CanvasError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let mut index = HashMap::new();

    for node in &canvas.nodes {
        if index.contains_key(node.id.as_str()) {
            return Err(CanvasError::DuplicateNode(node.id.clone()));
        }
        index.insert(node.id.as_str(), graph.add_node(node.id.as_str()));
    }

    for edge in &canvas.edges {
        match (index.get(edge.source.as_str()), index.get(edge.target.as_str())) {
            (Some(from), Some(to)) => {
                graph.add_edge(*from, *to, ());
            }
            _ => {
                return Err(CanvasError::DanglingEdge {
                    from: edge.source.clone(),
                    to: edge.target.clone(),
                })
            }
        }
    }

    if canvas.trigger_node().is_none() {
        return Err(CanvasError::MissingTrigger);
    }

    if is_cyclic_directed(&graph) {
        return Err(CanvasError::CyclicDependency);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaycore::CanvasNode;

    fn edges(pairs: &[(&str, &str)]) -> Vec<Edge> {
        pairs.iter().map(|(s, t)| Edge::new(*s, *t)).collect()
    }

    #[test]
    fn test_bfs_order_by_distance() {
        // a -> b -> d, a -> c -> d, d -> e
        let edges = edges(&[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d"), ("d", "e")]);
        assert_eq!(downstream_order("a", &edges), vec!["b", "c", "d", "e"]);
    }

    #[test]
    fn test_cycles_terminate_and_skip_start() {
        let edges = edges(&[("a", "b"), ("b", "c"), ("c", "a"), ("c", "b")]);
        assert_eq!(downstream_order("a", &edges), vec!["b", "c"]);
    }

    #[test]
    fn test_unreachable_nodes_are_ignored() {
        let edges = edges(&[("a", "b"), ("x", "y")]);
        assert_eq!(downstream_order("a", &edges), vec!["b"]);
    }

    #[test]
    fn test_branch_filtering() {
        let edges = vec![
            Edge::new("if", "yes").with_handle("true"),
            Edge::new("if", "no").with_handle("false"),
            Edge::new("if", "always"),
        ];

        let mut traversal = Traversal::new(&edges, "if");
        traversal.expand("if", Some("false"));
        let mut taken = Vec::new();
        while let Some(id) = traversal.next() {
            taken.push(id);
        }
        assert_eq!(taken, vec!["no", "always"]);

        assert_eq!(downstream_order("if", &edges), vec!["yes", "no", "always"]);
    }

    #[test]
    fn test_validate_canvas() {
        let mut canvas = Canvas {
            nodes: vec![
                CanvasNode::new("t", "trigger.manual"),
                CanvasNode::new("a", "pb.find"),
            ],
            edges: edges(&[("t", "a")]),
        };
        assert_eq!(validate_canvas(&canvas), Ok(()));

        canvas.edges.push(Edge::new("a", "t"));
        assert_eq!(validate_canvas(&canvas), Err(CanvasError::CyclicDependency));

        canvas.edges.pop();
        canvas.edges.push(Edge::new("a", "ghost"));
        assert!(matches!(validate_canvas(&canvas), Err(CanvasError::DanglingEdge { .. })));

        canvas.edges.pop();
        canvas.nodes.push(CanvasNode::new("a", "util.delay"));
        assert_eq!(validate_canvas(&canvas), Err(CanvasError::DuplicateNode("a".into())));

        let no_trigger = Canvas {
            nodes: vec![CanvasNode::new("a", "pb.find")],
            edges: vec![],
        };
        assert_eq!(validate_canvas(&no_trigger), Err(CanvasError::MissingTrigger));
    }

    #[test]
    fn test_branch_mode_parsing() {
        assert_eq!("match-handle".parse::<BranchMode>(), Ok(BranchMode::MatchHandle));
        assert_eq!("ALL".parse::<BranchMode>(), Ok(BranchMode::AllSuccessors));
        assert!("sometimes".parse::<BranchMode>().is_err());
    }
}
