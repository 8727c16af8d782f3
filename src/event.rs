//! Event bindings and the event table.
//!
//! An event binding ties a locus to a rate and an effect. The table keeps
//! one weight per binding in a [`SumTree`], refreshed only for bindings
//! whose locus changed size since the last step.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::engine::EffectContext;
use crate::error::{EngineError, EngineResult};
use crate::locus::{Element, LocusId, LocusIndex};
use crate::sampler::SumTree;
use crate::time::SimTime;

// ── Event ID ──────────────────────────────────────────────────────────

/// Dense handle for a registered event binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(usize);

impl EventId {
    /// Wrap a raw index.
    #[inline]
    pub fn new(raw: usize) -> Self {
        EventId(raw)
    }

    /// Return the raw index.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "V#{}", self.0)
    }
}

// ── Bindings ──────────────────────────────────────────────────────────

/// How a binding's rate combines with its locus size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// `rate` applies to every element: weight = `rate × size`.
    PerElement,
    /// `rate` applies to the locus as a whole: weight = `rate` while non-empty.
    FixedRate,
}

/// The callback run when an event fires. It receives the firing context
/// (clock, compartment changes, edge marking, posting) and the element.
pub type Effect<G> = Box<dyn FnMut(&mut EffectContext<'_, G>, Element) -> EngineResult<()>>;

/// Box a closure as an [`Effect`], pinning down its argument types.
pub fn effect<G, F>(f: F) -> Effect<G>
where
    F: FnMut(&mut EffectContext<'_, G>, Element) -> EngineResult<()> + 'static,
{
    Box::new(f)
}

/// One potential event type.
pub struct EventBinding<G> {
    name: String,
    locus: LocusId,
    rate: f64,
    kind: EventKind,
    pub(crate) effect: Effect<G>,
}

impl<G> EventBinding<G> {
    /// The binding's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The locus the event draws its element from.
    pub fn locus(&self) -> LocusId {
        self.locus
    }

    /// Per-element rate (or per-locus rate for fixed-rate events).
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// How the rate scales with locus size.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Weight of this binding given its locus' current size.
    pub fn weight(&self, size: usize) -> f64 {
        match self.kind {
            EventKind::PerElement => self.rate * size as f64,
            EventKind::FixedRate if size > 0 => self.rate,
            EventKind::FixedRate => 0.0,
        }
    }
}

impl<G> std::fmt::Debug for EventBinding<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBinding")
            .field("name", &self.name)
            .field("locus", &self.locus)
            .field("rate", &self.rate)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

// ── Event table ───────────────────────────────────────────────────────

/// Ordered event bindings plus their live weights.
pub struct EventTable<G> {
    bindings: Vec<EventBinding<G>>,
    by_locus: HashMap<LocusId, Vec<EventId>>,
    weights: SumTree,
}

impl<G> EventTable<G> {
    /// Create an empty table.
    pub fn new() -> Self {
        EventTable {
            bindings: Vec::new(),
            by_locus: HashMap::new(),
            weights: SumTree::new(0),
        }
    }

    /// Register a binding. Names are unique; `rate` must be finite and
    /// non-negative, and no larger than `max_rate` when one is given.
    pub fn add(
        &mut self,
        name: &str,
        locus: LocusId,
        rate: f64,
        kind: EventKind,
        max_rate: Option<f64>,
        effect: Effect<G>,
    ) -> EngineResult<EventId> {
        if self.find(name).is_some() {
            return Err(EngineError::DuplicateEvent { name: name.to_string() });
        }
        let too_large = max_rate.is_some_and(|m| rate > m);
        if !rate.is_finite() || rate < 0.0 || too_large {
            return Err(EngineError::InvalidRate { event: name.to_string(), rate });
        }
        let id = EventId(self.bindings.len());
        self.bindings.push(EventBinding {
            name: name.to_string(),
            locus,
            rate,
            kind,
            effect,
        });
        self.by_locus.entry(locus).or_default().push(id);
        Ok(id)
    }

    /// Look up a binding.
    pub fn binding(&self, id: EventId) -> EngineResult<&EventBinding<G>> {
        self.bindings.get(id.0).ok_or(EngineError::UnknownEvent(id.0))
    }

    pub(crate) fn binding_mut(&mut self, id: EventId) -> EngineResult<&mut EventBinding<G>> {
        self.bindings.get_mut(id.0).ok_or(EngineError::UnknownEvent(id.0))
    }

    /// Find a binding by name.
    pub fn find(&self, name: &str) -> Option<EventId> {
        self.bindings.iter().position(|b| b.name == name).map(EventId)
    }

    /// All bindings in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (EventId, &EventBinding<G>)> {
        self.bindings.iter().enumerate().map(|(i, b)| (EventId(i), b))
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether no bindings are registered.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Size the weight tree and compute every weight. Called once when
    /// the build phase closes.
    pub fn seal(&mut self, index: &LocusIndex) {
        self.weights = SumTree::new(self.bindings.len());
        for (i, b) in self.bindings.iter().enumerate() {
            self.weights.set(i, b.weight(index.size(b.locus)));
        }
    }

    /// Recompute the weights of bindings attached to `touched` loci.
    pub fn refresh(&mut self, touched: &[LocusId], index: &LocusIndex) {
        for locus in touched {
            let Some(ids) = self.by_locus.get(locus) else {
                continue;
            };
            let size = index.size(*locus);
            for id in ids {
                self.weights.set(id.0, self.bindings[id.0].weight(size));
            }
        }
    }

    /// Current weight of a binding.
    pub fn weight(&self, id: EventId) -> f64 {
        self.weights.get(id.0)
    }

    /// Sum of all weights.
    pub fn total_weight(&self) -> f64 {
        self.weights.total()
    }

    /// Whether any binding has positive weight.
    pub fn has_positive_weight(&self) -> bool {
        self.weights.has_positive()
    }

    /// Binding selected by `u ∈ [0, total_weight)`.
    pub fn select(&self, u: f64) -> Option<EventId> {
        self.weights.find(u).map(EventId)
    }
}

impl<G> Default for EventTable<G> {
    fn default() -> Self {
        Self::new()
    }
}

// ── Fired events ──────────────────────────────────────────────────────

/// How a fired event was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    /// Drawn by the stochastic process.
    Sampled,
    /// Posted for a specific time.
    Posted,
}

/// Record of one fired event, in firing order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiredEvent {
    /// 0-based position in the run's event stream.
    pub sequence: u64,
    /// Clock value at which the event fired.
    pub time: SimTime,
    /// The binding that fired.
    pub event: EventId,
    /// The binding's locus.
    pub locus: LocusId,
    /// The element the effect was applied to.
    pub element: Element,
    pub origin: Origin,
}

impl std::fmt::Display for FiredEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[#{} {}] {} on {} in {}{}",
            self.sequence,
            self.time,
            self.event,
            self.element,
            self.locus,
            if self.origin == Origin::Posted { " (posted)" } else { "" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compartment::CompartmentRegistry;
    use crate::graph::{AdjacencyGraph, NodeId};

    type Table = EventTable<AdjacencyGraph>;

    fn noop() -> Effect<AdjacencyGraph> {
        effect(|_, _| Ok(()))
    }

    fn index_with_two_infected() -> (LocusIndex, LocusId) {
        let graph = AdjacencyGraph::with_nodes(2);
        let mut reg = CompartmentRegistry::new();
        let i = reg.declare("I", 1.0).unwrap();
        reg.assign(NodeId::new(0), i).unwrap();
        reg.assign(NodeId::new(1), i).unwrap();
        let mut index = LocusIndex::new();
        let locus = index.declare_node_locus("I", i).unwrap();
        index.populate(&graph, &reg).unwrap();
        (index, locus)
    }

    #[test]
    fn test_invalid_rates_rejected() {
        let (_, locus) = index_with_two_infected();
        let mut table = Table::new();
        for rate in [-1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                table.add("bad", locus, rate, EventKind::PerElement, None, noop()),
                Err(EngineError::InvalidRate { .. })
            ));
        }
        assert!(matches!(
            table.add("p", locus, 1.5, EventKind::PerElement, Some(1.0), noop()),
            Err(EngineError::InvalidRate { .. })
        ));
        assert!(table.add("zero", locus, 0.0, EventKind::PerElement, None, noop()).is_ok());
        assert!(table.add("one", locus, 1.0, EventKind::PerElement, Some(1.0), noop()).is_ok());
    }

    #[test]
    fn test_weights_by_kind() {
        let (index, locus) = index_with_two_infected();
        let mut table = Table::new();
        let per = table.add("per", locus, 0.5, EventKind::PerElement, None, noop()).unwrap();
        let fixed = table.add("fixed", locus, 0.5, EventKind::FixedRate, None, noop()).unwrap();
        let zero = table.add("zero", locus, 0.0, EventKind::PerElement, None, noop()).unwrap();
        table.seal(&index);

        assert_eq!(table.weight(per), 1.0);
        assert_eq!(table.weight(fixed), 0.5);
        assert_eq!(table.weight(zero), 0.0);
        assert_eq!(table.total_weight(), 1.5);
    }

    #[test]
    fn test_fixed_rate_weight_zero_when_empty() {
        let (_, locus) = index_with_two_infected();
        let mut table = Table::new();
        let id = table.add("fixed", locus, 2.0, EventKind::FixedRate, None, noop()).unwrap();
        let b = table.binding(id).unwrap();
        assert_eq!(b.weight(0), 0.0);
        assert_eq!(b.weight(10), 2.0);
    }

    #[test]
    fn test_find_by_name() {
        let (_, locus) = index_with_two_infected();
        let mut table = Table::new();
        table.add("a", locus, 1.0, EventKind::PerElement, None, noop()).unwrap();
        let b = table.add("b", locus, 1.0, EventKind::PerElement, None, noop()).unwrap();
        assert_eq!(table.find("b"), Some(b));
        assert_eq!(table.find("c"), None);
        assert_eq!(table.binding(EventId::new(9)).unwrap_err(), EngineError::UnknownEvent(9));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let (_, locus) = index_with_two_infected();
        let mut table = Table::new();
        let first = table.add("recover", locus, 1.0, EventKind::PerElement, None, noop()).unwrap();
        assert_eq!(
            table.add("recover", locus, 0.5, EventKind::FixedRate, None, noop()).unwrap_err(),
            EngineError::DuplicateEvent { name: "recover".to_string() }
        );
        assert_eq!(table.len(), 1);
        assert_eq!(table.find("recover"), Some(first));
    }
}
