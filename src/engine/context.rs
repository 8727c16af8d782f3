//! Shared network state and the context handed to effects.

use std::collections::HashMap;

use crate::compartment::{CompartmentId, CompartmentRegistry};
use crate::error::{EngineError, EngineResult};
use crate::event::EventId;
use crate::graph::{EdgeId, Graph, NodeId};
use crate::locus::{Element, LocusIndex};
use crate::scheduler::PostQueue;
use crate::time::SimTime;

/// Everything an event can observe or change: the graph, compartments,
/// loci, edge marks, and posted events.
#[derive(Debug)]
pub struct NetworkState<G> {
    pub(crate) graph: G,
    pub(crate) compartments: CompartmentRegistry,
    pub(crate) loci: LocusIndex,
    pub(crate) occupied: HashMap<EdgeId, SimTime>,
    pub(crate) posted: PostQueue,
}

impl<G: Graph> NetworkState<G> {
    pub(crate) fn new(graph: G) -> Self {
        NetworkState {
            graph,
            compartments: CompartmentRegistry::new(),
            loci: LocusIndex::new(),
            occupied: HashMap::new(),
            posted: PostQueue::new(),
        }
    }

    /// The single mutation path for compartments once the run starts:
    /// update the registry, then re-derive every affected locus.
    pub(crate) fn change_compartment(
        &mut self,
        node: NodeId,
        compartment: CompartmentId,
    ) -> EngineResult<CompartmentId> {
        let old = self.compartments.change(node, compartment)?;
        self.loci
            .on_compartment_changed(&self.graph, &self.compartments, node, old, compartment)?;
        Ok(old)
    }

    pub(crate) fn post(
        &mut self,
        now: SimTime,
        at: SimTime,
        event: EventId,
        element: Element,
    ) -> EngineResult<u64> {
        if at.is_before(now) {
            return Err(EngineError::NonCausalPost {
                requested: at.as_f64(),
                current: now.as_f64(),
            });
        }
        Ok(self.posted.post(at, event, element))
    }
}

/// Mutable context passed to an effect when its event fires.
///
/// Provides the effect with:
/// - the firing time and the firing event
/// - read access to the graph and compartments
/// - compartment changes, which fan out to the locus index
/// - edge marking, for transmission provenance
/// - posting of follow-up events
///
/// Loci themselves are not reachable from here; their membership only
/// ever follows compartment changes.
pub struct EffectContext<'a, G> {
    pub(crate) state: &'a mut NetworkState<G>,
    pub(crate) now: SimTime,
    pub(crate) event: EventId,
    pub(crate) event_count: usize,
}

impl<G: Graph> EffectContext<'_, G> {
    /// Time at which the event fired.
    #[inline]
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// The event being fired.
    #[inline]
    pub fn event(&self) -> EventId {
        self.event
    }

    /// The network the simulation runs on.
    pub fn graph(&self) -> &G {
        &self.state.graph
    }

    /// Current compartment of `node`.
    pub fn compartment(&self, node: NodeId) -> EngineResult<CompartmentId> {
        self.state.compartments.get(node)
    }

    /// Resolve a compartment label.
    pub fn compartment_id(&self, label: &str) -> EngineResult<CompartmentId> {
        self.state.compartments.lookup(label)
    }

    /// Move `node` into `compartment`, returning its previous compartment.
    pub fn change_compartment(
        &mut self,
        node: NodeId,
        compartment: CompartmentId,
    ) -> EngineResult<CompartmentId> {
        self.state.change_compartment(node, compartment)
    }

    /// Record that `edge` carried this event, at the firing time.
    pub fn mark_occupied(&mut self, edge: EdgeId) -> EngineResult<()> {
        if self.state.graph.endpoints(edge).is_none() {
            return Err(EngineError::UnknownEdge { edge });
        }
        self.state.occupied.insert(edge, self.now);
        Ok(())
    }

    /// Whether `edge` has been marked, and when.
    pub fn occupied_at(&self, edge: EdgeId) -> Option<SimTime> {
        self.state.occupied.get(&edge).copied()
    }

    /// Fire `event` on `element` at absolute time `at` (not before now).
    pub fn post_at(&mut self, at: SimTime, event: EventId, element: Element) -> EngineResult<u64> {
        if event.index() >= self.event_count {
            return Err(EngineError::UnknownEvent(event.index()));
        }
        self.state.post(self.now, at, event, element)
    }

    /// Fire `event` on `element` `delay` time units from now.
    pub fn post_after(&mut self, delay: f64, event: EventId, element: Element) -> EngineResult<u64> {
        if !delay.is_finite() || delay < 0.0 {
            return Err(EngineError::NonCausalPost {
                requested: self.now.as_f64() + delay,
                current: self.now.as_f64(),
            });
        }
        let at = self.now.advance(delay);
        self.post_at(at, event, element)
    }
}
