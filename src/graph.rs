//! Graph provider contract and an in-memory adjacency-list network.
//!
//! The engine never mutates topology. It only needs to enumerate nodes
//! and edges, resolve an edge's endpoints, and walk the edges incident to
//! a node; anything implementing [`Graph`] can host a simulation.

use std::collections::HashSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

// ── Identifiers ───────────────────────────────────────────────────────

/// Identity of a node, as handed out by the graph provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Create a node ID from a raw integer.
    #[inline]
    pub fn new(id: u64) -> Self {
        NodeId(id)
    }

    /// Return the underlying integer.
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "N{}", self.0)
    }
}

/// Identity of an edge, as handed out by the graph provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId(u64);

impl EdgeId {
    /// Create an edge ID from a raw integer.
    #[inline]
    pub fn new(id: u64) -> Self {
        EdgeId(id)
    }

    /// Return the underlying integer.
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E{}", self.0)
    }
}

// ── Graph provider ────────────────────────────────────────────────────

/// Read-only topology consumed by the engine.
///
/// # Contract
///
/// Implementations **must**:
/// - Return every node and edge exactly once, in a stable order (the
///   order feeds the random draws, so it decides reproducibility).
/// - Report, for every edge, the same endpoint pair on every call.
/// - List each edge in `incident_edges` of both of its endpoints.
pub trait Graph {
    /// All nodes.
    fn nodes(&self) -> Box<dyn Iterator<Item = NodeId> + '_>;

    /// All edges.
    fn edges(&self) -> Box<dyn Iterator<Item = EdgeId> + '_>;

    /// The two endpoints of `edge`, or `None` if the edge does not exist.
    fn endpoints(&self, edge: EdgeId) -> Option<(NodeId, NodeId)>;

    /// Edges incident to `node`. Empty for unknown nodes.
    fn incident_edges(&self, node: NodeId) -> Box<dyn Iterator<Item = EdgeId> + '_>;

    /// Whether `node` exists.
    fn contains_node(&self, node: NodeId) -> bool;

    /// Number of nodes.
    fn node_count(&self) -> usize {
        self.nodes().count()
    }

    /// Number of edges.
    fn edge_count(&self) -> usize {
        self.edges().count()
    }

    /// Number of edges incident to `node`.
    fn degree(&self, node: NodeId) -> usize {
        self.incident_edges(node).count()
    }
}

// ── AdjacencyGraph ────────────────────────────────────────────────────

/// Undirected multigraph stored as adjacency lists.
///
/// Node and edge ids are dense indices assigned in insertion order.
#[derive(Debug, Clone, Default)]
pub struct AdjacencyGraph {
    edges: Vec<(NodeId, NodeId)>,
    adjacency: Vec<Vec<EdgeId>>,
}

impl AdjacencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a graph with `n` isolated nodes.
    pub fn with_nodes(n: usize) -> Self {
        AdjacencyGraph {
            edges: Vec::new(),
            adjacency: vec![Vec::new(); n],
        }
    }

    /// Add a node and return its id.
    pub fn add_node(&mut self) -> NodeId {
        self.adjacency.push(Vec::new());
        NodeId::new((self.adjacency.len() - 1) as u64)
    }

    /// Add an edge between two existing nodes and return its id.
    pub fn add_edge(&mut self, a: NodeId, b: NodeId) -> EngineResult<EdgeId> {
        for n in [a, b] {
            if !self.contains_node(n) {
                return Err(EngineError::UnknownNode { node: n });
            }
        }
        let id = EdgeId::new(self.edges.len() as u64);
        self.edges.push((a, b));
        self.adjacency[a.raw() as usize].push(id);
        if a != b {
            self.adjacency[b.raw() as usize].push(id);
        }
        Ok(id)
    }

    /// Find an edge joining `a` and `b` in either direction.
    pub fn edge_between(&self, a: NodeId, b: NodeId) -> Option<EdgeId> {
        self.incident_edges(a).find(|e| match self.endpoints(*e) {
            Some((x, y)) => (x == a && y == b) || (x == b && y == a),
            None => false,
        })
    }

    /// A path `0 - 1 - ... - (n-1)`.
    pub fn path(n: usize) -> Self {
        let mut g = Self::with_nodes(n);
        for i in 1..n {
            g.push_edge(i - 1, i);
        }
        g
    }

    /// The complete graph on `n` nodes.
    pub fn complete(n: usize) -> Self {
        let mut g = Self::with_nodes(n);
        for i in 0..n {
            for j in (i + 1)..n {
                g.push_edge(i, j);
            }
        }
        g
    }

    /// A G(n, p) random graph: each of the `n(n-1)/2` pairs is joined
    /// independently with probability `p`.
    pub fn erdos_renyi<R: Rng + ?Sized>(n: usize, p: f64, rng: &mut R) -> Self {
        let mut g = Self::with_nodes(n);
        if p <= 0.0 {
            return g;
        }
        for i in 0..n {
            for j in (i + 1)..n {
                if rng.gen::<f64>() < p {
                    g.push_edge(i, j);
                }
            }
        }
        g
    }

    /// A G(n, m) random graph with exactly `m` distinct edges (capped at
    /// the number of available pairs).
    pub fn random_edges<R: Rng + ?Sized>(n: usize, m: usize, rng: &mut R) -> Self {
        let mut g = Self::with_nodes(n);
        if n < 2 {
            return g;
        }
        let m = m.min(n * (n - 1) / 2);
        let mut seen = HashSet::with_capacity(m);
        while seen.len() < m {
            let a = rng.gen_range(0..n);
            let b = rng.gen_range(0..n);
            if a == b {
                continue;
            }
            let key = (a.min(b), a.max(b));
            if seen.insert(key) {
                g.push_edge(key.0, key.1);
            }
        }
        g
    }

    fn push_edge(&mut self, a: usize, b: usize) {
        let id = EdgeId::new(self.edges.len() as u64);
        self.edges.push((NodeId::new(a as u64), NodeId::new(b as u64)));
        self.adjacency[a].push(id);
        self.adjacency[b].push(id);
    }
}

impl Graph for AdjacencyGraph {
    fn nodes(&self) -> Box<dyn Iterator<Item = NodeId> + '_> {
        Box::new((0..self.adjacency.len() as u64).map(NodeId::new))
    }

    fn edges(&self) -> Box<dyn Iterator<Item = EdgeId> + '_> {
        Box::new((0..self.edges.len() as u64).map(EdgeId::new))
    }

    fn endpoints(&self, edge: EdgeId) -> Option<(NodeId, NodeId)> {
        self.edges.get(edge.raw() as usize).copied()
    }

    fn incident_edges(&self, node: NodeId) -> Box<dyn Iterator<Item = EdgeId> + '_> {
        match self.adjacency.get(node.raw() as usize) {
            Some(edges) => Box::new(edges.iter().copied()),
            None => Box::new(std::iter::empty()),
        }
    }

    fn contains_node(&self, node: NodeId) -> bool {
        (node.raw() as usize) < self.adjacency.len()
    }

    fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    fn edge_count(&self) -> usize {
        self.edges.len()
    }

    fn degree(&self, node: NodeId) -> usize {
        self.adjacency
            .get(node.raw() as usize)
            .map_or(0, |edges| edges.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_path_shape() {
        let g = AdjacencyGraph::path(4);
        assert_eq!(g.node_count(), 4);
        assert_eq!(g.edge_count(), 3);
        assert_eq!(g.degree(NodeId::new(0)), 1);
        assert_eq!(g.degree(NodeId::new(1)), 2);
        assert_eq!(
            g.endpoints(EdgeId::new(2)),
            Some((NodeId::new(2), NodeId::new(3)))
        );
    }

    #[test]
    fn test_complete_degrees() {
        let g = AdjacencyGraph::complete(5);
        assert_eq!(g.edge_count(), 10);
        for n in g.nodes() {
            assert_eq!(g.degree(n), 4);
        }
    }

    #[test]
    fn test_add_edge_rejects_unknown_node() {
        let mut g = AdjacencyGraph::with_nodes(2);
        let err = g.add_edge(NodeId::new(0), NodeId::new(7)).unwrap_err();
        assert_eq!(err, EngineError::UnknownNode { node: NodeId::new(7) });
    }

    #[test]
    fn test_self_loop_listed_once() {
        let mut g = AdjacencyGraph::with_nodes(1);
        let n = NodeId::new(0);
        g.add_edge(n, n).unwrap();
        assert_eq!(g.degree(n), 1);
    }

    #[test]
    fn test_edge_between() {
        let g = AdjacencyGraph::path(3);
        assert_eq!(
            g.edge_between(NodeId::new(2), NodeId::new(1)),
            Some(EdgeId::new(1))
        );
        assert_eq!(g.edge_between(NodeId::new(0), NodeId::new(2)), None);
    }

    #[test]
    fn test_erdos_renyi_deterministic() {
        let g1 = AdjacencyGraph::erdos_renyi(50, 0.1, &mut ChaCha8Rng::seed_from_u64(7));
        let g2 = AdjacencyGraph::erdos_renyi(50, 0.1, &mut ChaCha8Rng::seed_from_u64(7));
        assert_eq!(g1.edge_count(), g2.edge_count());
        for e in g1.edges() {
            assert_eq!(g1.endpoints(e), g2.endpoints(e));
        }
    }

    #[test]
    fn test_random_edges_count() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let g = AdjacencyGraph::random_edges(10, 20, &mut rng);
        assert_eq!(g.edge_count(), 20);
        let capped = AdjacencyGraph::random_edges(4, 100, &mut rng);
        assert_eq!(capped.edge_count(), 6);
    }

    #[test]
    fn test_incident_edges_unknown_node_is_empty() {
        let g = AdjacencyGraph::path(2);
        assert_eq!(g.incident_edges(NodeId::new(9)).count(), 0);
    }
}
