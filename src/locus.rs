//! Loci: continuously maintained populations of nodes or edges.
//!
//! A node locus holds every node currently in one compartment. An edge
//! locus holds every edge whose endpoints currently sit in a given pair
//! of compartments. Membership is updated eagerly on every compartment
//! change, touching only the changed node and its incident edges, so a
//! locus size is always an O(1) read.
//!
//! # Edge orientation
//!
//! An edge locus `(left, right)` presents each member as an
//! [`OrientedEdge`] whose `left` endpoint is in `left` and `right`
//! endpoint is in `right`. For an edge with graph endpoints `(a, b)`,
//! `(a, b)` is tried first and `(b, a)` second, so when `left == right`
//! the graph's own endpoint order is kept.

use std::collections::HashMap;

use indexmap::IndexMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::compartment::{CompartmentId, CompartmentRegistry};
use crate::error::{EngineError, EngineResult};
use crate::graph::{EdgeId, Graph, NodeId};

// ── Identifiers and elements ──────────────────────────────────────────

/// Dense handle for a declared locus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocusId(usize);

impl LocusId {
    /// Wrap a raw index.
    #[inline]
    pub fn from_index(raw: usize) -> Self {
        LocusId(raw)
    }

    /// Return the underlying index.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for LocusId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// An edge seen through an edge locus: `left` plays the locus' first
/// role, `right` the second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrientedEdge {
    pub edge: EdgeId,
    pub left: NodeId,
    pub right: NodeId,
}

/// The thing an event fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Element {
    Node(NodeId),
    Edge(OrientedEdge),
}

impl Element {
    /// Identity of the element within a locus.
    pub fn key(&self) -> ElementKey {
        match self {
            Element::Node(n) => ElementKey::Node(*n),
            Element::Edge(e) => ElementKey::Edge(e.edge),
        }
    }

    /// The node, if this is a node element.
    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Element::Node(n) => Some(*n),
            Element::Edge(_) => None,
        }
    }

    /// The oriented edge, if this is an edge element.
    pub fn as_edge(&self) -> Option<OrientedEdge> {
        match self {
            Element::Node(_) => None,
            Element::Edge(e) => Some(*e),
        }
    }
}

impl std::fmt::Display for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Element::Node(n) => write!(f, "{}", n),
            Element::Edge(e) => write!(f, "{}({} -> {})", e.edge, e.left, e.right),
        }
    }
}

/// Orientation-free identity of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ElementKey {
    Node(NodeId),
    Edge(EdgeId),
}

// ── Locus kinds ───────────────────────────────────────────────────────

/// The compartment predicate a locus tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocusKind {
    /// Nodes in `compartment`.
    Node { compartment: CompartmentId },
    /// Edges with one endpoint in `left` and the other in `right`.
    Edge { left: CompartmentId, right: CompartmentId },
}

impl LocusKind {
    /// Evaluate the predicate for a node in compartment `c`.
    pub fn admits_node(&self, c: CompartmentId) -> bool {
        matches!(self, LocusKind::Node { compartment } if *compartment == c)
    }

    /// Evaluate the predicate for an edge and orient it, given its
    /// endpoints and their current compartments.
    pub fn orient(
        &self,
        edge: EdgeId,
        (a, b): (NodeId, NodeId),
        (ca, cb): (CompartmentId, CompartmentId),
    ) -> Option<OrientedEdge> {
        let LocusKind::Edge { left, right } = *self else {
            return None;
        };
        if ca == left && cb == right {
            Some(OrientedEdge { edge, left: a, right: b })
        } else if cb == left && ca == right {
            Some(OrientedEdge { edge, left: b, right: a })
        } else {
            None
        }
    }

    /// Whether a change into or out of `c` can affect membership.
    pub fn mentions(&self, c: CompartmentId) -> bool {
        match *self {
            LocusKind::Node { compartment } => compartment == c,
            LocusKind::Edge { left, right } => left == c || right == c,
        }
    }
}

// ── Locus ─────────────────────────────────────────────────────────────

/// A named population with O(1) insert, remove, size, and uniform draw.
#[derive(Debug, Clone)]
pub struct Locus {
    name: String,
    kind: LocusKind,
    members: IndexMap<ElementKey, Element>,
}

impl Locus {
    fn new(name: &str, kind: LocusKind) -> Self {
        Locus {
            name: name.to_string(),
            kind,
            members: IndexMap::new(),
        }
    }

    /// The locus' name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The predicate this locus tracks.
    pub fn kind(&self) -> LocusKind {
        self.kind
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the locus is empty.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The current member with identity `key`.
    pub fn get(&self, key: &ElementKey) -> Option<Element> {
        self.members.get(key).copied()
    }

    /// Members in internal order. The order is deterministic for a given
    /// history of changes but otherwise meaningless.
    pub fn elements(&self) -> impl Iterator<Item = Element> + '_ {
        self.members.values().copied()
    }

    /// Draw a member uniformly at random.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Element> {
        if self.members.is_empty() {
            return None;
        }
        let i = rng.gen_range(0..self.members.len());
        self.members.get_index(i).map(|(_, e)| *e)
    }

    fn enter(&mut self, element: Element) {
        if self.members.insert(element.key(), element).is_none() {
            trace!(locus = %self.name, %element, "element enters locus");
        }
    }

    fn leave(&mut self, key: &ElementKey) {
        if let Some(element) = self.members.swap_remove(key) {
            trace!(locus = %self.name, %element, "element leaves locus");
        }
    }
}

// ── Locus index ───────────────────────────────────────────────────────

/// All declared loci and the routing from compartments to the loci that
/// depend on them.
#[derive(Debug, Clone, Default)]
pub struct LocusIndex {
    loci: Vec<Locus>,
    by_name: HashMap<String, LocusId>,
    node_locus: HashMap<CompartmentId, LocusId>,
    edge_loci: HashMap<CompartmentId, Vec<LocusId>>,
    touched: Vec<bool>,
    touched_list: Vec<LocusId>,
}

impl LocusIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track the nodes in `compartment`.
    pub fn declare_node_locus(
        &mut self,
        name: &str,
        compartment: CompartmentId,
    ) -> EngineResult<LocusId> {
        if self.node_locus.contains_key(&compartment) {
            return Err(EngineError::DuplicateLocus { name: name.to_string() });
        }
        let id = self.push(name, LocusKind::Node { compartment })?;
        self.node_locus.insert(compartment, id);
        Ok(id)
    }

    /// Track the edges between `left` and `right`.
    pub fn declare_edge_locus(
        &mut self,
        name: &str,
        left: CompartmentId,
        right: CompartmentId,
    ) -> EngineResult<LocusId> {
        let kind = LocusKind::Edge { left, right };
        if self.loci.iter().any(|l| l.kind == kind) {
            return Err(EngineError::DuplicateLocus { name: name.to_string() });
        }
        let id = self.push(name, kind)?;
        self.edge_loci.entry(left).or_default().push(id);
        if right != left {
            self.edge_loci.entry(right).or_default().push(id);
        }
        Ok(id)
    }

    fn push(&mut self, name: &str, kind: LocusKind) -> EngineResult<LocusId> {
        if self.by_name.contains_key(name) {
            return Err(EngineError::DuplicateLocus { name: name.to_string() });
        }
        let id = LocusId(self.loci.len());
        self.loci.push(Locus::new(name, kind));
        self.by_name.insert(name.to_string(), id);
        self.touched.push(false);
        Ok(id)
    }

    /// Look up a locus by id.
    pub fn locus(&self, id: LocusId) -> EngineResult<&Locus> {
        self.loci.get(id.0).ok_or(EngineError::UnknownLocus(id.0))
    }

    /// Look up a locus id by name.
    pub fn find(&self, name: &str) -> Option<LocusId> {
        self.by_name.get(name).copied()
    }

    /// The node locus for `compartment`, if one is tracked.
    pub fn node_locus(&self, compartment: CompartmentId) -> Option<LocusId> {
        self.node_locus.get(&compartment).copied()
    }

    /// Current size of a locus.
    pub fn size(&self, id: LocusId) -> usize {
        self.loci.get(id.0).map_or(0, Locus::len)
    }

    /// All loci in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (LocusId, &Locus)> {
        self.loci.iter().enumerate().map(|(i, l)| (LocusId(i), l))
    }

    /// Number of declared loci.
    pub fn len(&self) -> usize {
        self.loci.len()
    }

    /// Whether no loci are declared.
    pub fn is_empty(&self) -> bool {
        self.loci.is_empty()
    }

    /// Fill every locus from scratch. Called once when the build phase
    /// closes, after every node has a compartment.
    pub fn populate<G: Graph + ?Sized>(
        &mut self,
        graph: &G,
        registry: &CompartmentRegistry,
    ) -> EngineResult<()> {
        for node in graph.nodes() {
            let c = registry.get(node)?;
            if let Some(id) = self.node_locus(c) {
                self.loci[id.0].enter(Element::Node(node));
                self.touch(id);
            }
        }
        for edge in graph.edges() {
            let ends = graph.endpoints(edge).ok_or(EngineError::UnknownEdge { edge })?;
            let cs = (registry.get(ends.0)?, registry.get(ends.1)?);
            for i in 0..self.loci.len() {
                if let Some(oriented) = self.loci[i].kind.orient(edge, ends, cs) {
                    self.loci[i].enter(Element::Edge(oriented));
                    self.touch(LocusId(i));
                }
            }
        }
        Ok(())
    }

    /// Re-derive membership after `node` moved from `old` to `new`.
    ///
    /// `registry` must already hold the new compartment. Cost is
    /// O(degree(node) × loci mentioning `old` or `new`).
    pub fn on_compartment_changed<G: Graph + ?Sized>(
        &mut self,
        graph: &G,
        registry: &CompartmentRegistry,
        node: NodeId,
        old: CompartmentId,
        new: CompartmentId,
    ) -> EngineResult<()> {
        if let Some(id) = self.node_locus(old) {
            self.loci[id.0].leave(&ElementKey::Node(node));
            self.touch(id);
        }
        if let Some(id) = self.node_locus(new) {
            self.loci[id.0].enter(Element::Node(node));
            self.touch(id);
        }

        let mut affected: Vec<LocusId> = Vec::new();
        for c in [old, new] {
            if let Some(ids) = self.edge_loci.get(&c) {
                for id in ids {
                    if !affected.contains(id) {
                        affected.push(*id);
                    }
                }
            }
        }
        if affected.is_empty() {
            return Ok(());
        }

        for edge in graph.incident_edges(node) {
            let ends = graph.endpoints(edge).ok_or(EngineError::UnknownEdge { edge })?;
            let cs = (registry.get(ends.0)?, registry.get(ends.1)?);
            for id in &affected {
                let locus = &mut self.loci[id.0];
                match locus.kind.orient(edge, ends, cs) {
                    Some(oriented) => locus.enter(Element::Edge(oriented)),
                    None => locus.leave(&ElementKey::Edge(edge)),
                }
            }
        }
        for id in affected {
            self.touch(id);
        }
        Ok(())
    }

    fn touch(&mut self, id: LocusId) {
        if !self.touched[id.0] {
            self.touched[id.0] = true;
            self.touched_list.push(id);
        }
    }

    /// Loci whose membership may have changed since the last call.
    pub fn take_touched(&mut self) -> Vec<LocusId> {
        for id in &self.touched_list {
            self.touched[id.0] = false;
        }
        std::mem::take(&mut self.touched_list)
    }

    /// Recompute every locus from the graph and registry and compare
    /// with the incrementally maintained membership. Also checks that the
    /// node loci never hold a node twice across compartments.
    pub fn audit<G: Graph + ?Sized>(
        &self,
        graph: &G,
        registry: &CompartmentRegistry,
    ) -> EngineResult<()> {
        for locus in &self.loci {
            let mut expected: Vec<Element> = Vec::new();
            match locus.kind {
                LocusKind::Node { compartment } => {
                    for node in graph.nodes() {
                        if registry.get(node)? == compartment {
                            expected.push(Element::Node(node));
                        }
                    }
                }
                LocusKind::Edge { .. } => {
                    for edge in graph.edges() {
                        let ends =
                            graph.endpoints(edge).ok_or(EngineError::UnknownEdge { edge })?;
                        let cs = (registry.get(ends.0)?, registry.get(ends.1)?);
                        if let Some(oriented) = locus.kind.orient(edge, ends, cs) {
                            expected.push(Element::Edge(oriented));
                        }
                    }
                }
            }
            if expected.len() != locus.len() {
                return Err(EngineError::LocusInconsistent {
                    locus: locus.name.clone(),
                    detail: format!("holds {} elements, predicate admits {}", locus.len(), expected.len()),
                });
            }
            for e in expected {
                if locus.get(&e.key()) != Some(e) {
                    return Err(EngineError::LocusInconsistent {
                        locus: locus.name.clone(),
                        detail: format!("missing or misoriented {}", e),
                    });
                }
            }
        }

        let mut seen: HashMap<NodeId, &str> = HashMap::new();
        for locus in self.loci.iter().filter(|l| matches!(l.kind, LocusKind::Node { .. })) {
            for e in locus.elements() {
                if let Element::Node(n) = e {
                    if let Some(other) = seen.insert(n, locus.name()) {
                        return Err(EngineError::LocusInconsistent {
                            locus: locus.name.clone(),
                            detail: format!("{} also in {}", n, other),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::AdjacencyGraph;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    struct Fixture {
        graph: AdjacencyGraph,
        reg: CompartmentRegistry,
        index: LocusIndex,
        s: CompartmentId,
        i: CompartmentId,
        r: CompartmentId,
        si: LocusId,
        infected: LocusId,
    }

    /// S - I - S path.
    fn fixture() -> Fixture {
        let graph = AdjacencyGraph::path(3);
        let mut reg = CompartmentRegistry::new();
        let s = reg.declare("S", 1.0).unwrap();
        let i = reg.declare("I", 0.0).unwrap();
        let r = reg.declare("R", 0.0).unwrap();
        reg.assign(NodeId::new(0), s).unwrap();
        reg.assign(NodeId::new(1), i).unwrap();
        reg.assign(NodeId::new(2), s).unwrap();

        let mut index = LocusIndex::new();
        let si = index.declare_edge_locus("SI", s, i).unwrap();
        let infected = index.declare_node_locus("I", i).unwrap();
        index.populate(&graph, &reg).unwrap();
        Fixture { graph, reg, index, s, i, r, si, infected }
    }

    fn change(f: &mut Fixture, n: u64, c: CompartmentId) {
        let node = NodeId::new(n);
        let old = f.reg.change(node, c).unwrap();
        f.index
            .on_compartment_changed(&f.graph, &f.reg, node, old, c)
            .unwrap();
    }

    #[test]
    fn test_populate_orients_edges() {
        let f = fixture();
        assert_eq!(f.index.size(f.si), 2);
        assert_eq!(f.index.size(f.infected), 1);
        for e in f.index.locus(f.si).unwrap().elements() {
            let e = e.as_edge().unwrap();
            assert_eq!(e.right, NodeId::new(1));
            assert_ne!(e.left, NodeId::new(1));
        }
        f.index.audit(&f.graph, &f.reg).unwrap();
    }

    #[test]
    fn test_duplicate_locus_rejected() {
        let mut f = fixture();
        assert!(matches!(
            f.index.declare_edge_locus("SI-again", f.s, f.i),
            Err(EngineError::DuplicateLocus { .. })
        ));
        assert!(matches!(
            f.index.declare_node_locus("infected", f.i),
            Err(EngineError::DuplicateLocus { .. })
        ));
        assert!(matches!(
            f.index.declare_node_locus("SI", f.r),
            Err(EngineError::DuplicateLocus { .. })
        ));
        // The reverse orientation is a different predicate.
        assert!(f.index.declare_edge_locus("IS", f.i, f.s).is_ok());
    }

    #[test]
    fn test_infection_cascades_over_incident_edges() {
        let mut f = fixture();
        let c = f.i;
        change(&mut f, 0, c);
        assert_eq!(f.index.size(f.si), 1);
        assert_eq!(f.index.size(f.infected), 2);
        f.index.audit(&f.graph, &f.reg).unwrap();

        let c = f.i;
        change(&mut f, 2, c);
        assert_eq!(f.index.size(f.si), 0);
        assert_eq!(f.index.size(f.infected), 3);
        f.index.audit(&f.graph, &f.reg).unwrap();
    }

    #[test]
    fn test_removal_drops_edges() {
        let mut f = fixture();
        let c = f.r;
        change(&mut f, 1, c);
        assert_eq!(f.index.size(f.si), 0);
        assert_eq!(f.index.size(f.infected), 0);
        f.index.audit(&f.graph, &f.reg).unwrap();
    }

    #[test]
    fn test_same_compartment_change_is_idempotent() {
        let mut f = fixture();
        let c = f.i;
        change(&mut f, 1, c);
        assert_eq!(f.index.size(f.si), 2);
        assert_eq!(f.index.size(f.infected), 1);
        f.index.audit(&f.graph, &f.reg).unwrap();
    }

    #[test]
    fn test_touched_drains() {
        let mut f = fixture();
        let initial = f.index.take_touched();
        assert!(initial.contains(&f.si));
        assert!(initial.contains(&f.infected));
        assert!(f.index.take_touched().is_empty());

        let c = f.r;
        change(&mut f, 1, c);
        let touched = f.index.take_touched();
        assert!(touched.contains(&f.si));
        assert!(touched.contains(&f.infected));
    }

    #[test]
    fn test_same_compartment_edge_locus_keeps_graph_order() {
        let graph = AdjacencyGraph::path(2);
        let mut reg = CompartmentRegistry::new();
        let i = reg.declare("I", 1.0).unwrap();
        reg.assign(NodeId::new(0), i).unwrap();
        reg.assign(NodeId::new(1), i).unwrap();
        let mut index = LocusIndex::new();
        let ii = index.declare_edge_locus("II", i, i).unwrap();
        index.populate(&graph, &reg).unwrap();

        let e = index.locus(ii).unwrap().elements().next().unwrap();
        assert_eq!(
            e.as_edge(),
            Some(OrientedEdge { edge: EdgeId::new(0), left: NodeId::new(0), right: NodeId::new(1) })
        );
    }

    #[test]
    fn test_draw_is_uniform_member() {
        let f = fixture();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let locus = f.index.locus(f.si).unwrap();
        let mut hits = [0usize; 2];
        for _ in 0..2_000 {
            let e = locus.draw(&mut rng).unwrap().as_edge().unwrap();
            hits[e.edge.raw() as usize] += 1;
        }
        assert!(hits[0] > 800 && hits[1] > 800, "skewed draws: {:?}", hits);
    }

    #[test]
    fn test_audit_detects_stale_membership() {
        let mut f = fixture();
        // Bypass the index on purpose.
        f.reg.change(NodeId::new(0), f.i).unwrap();
        assert!(matches!(
            f.index.audit(&f.graph, &f.reg),
            Err(EngineError::LocusInconsistent { .. })
        ));
    }
}
