//! The simulation engine.
//!
//! An [`Engine`] goes through two phases. During the **build phase** a
//! model declares compartments, loci, and event bindings, and may assign
//! or post initial conditions. The first call to [`Engine::step`] (or an
//! explicit [`Engine::finish_build`]) closes it: unassigned nodes are
//! drawn from the initial distribution, loci are populated, and weights
//! are computed. From then on each step fires at most one event.
//!
//! Two time models share the same loci and effects:
//!
//! - **Stochastic** (continuous time). The waiting time to the next event
//!   is exponential with rate equal to the total weight; the event type is
//!   chosen proportionally to its weight and the element uniformly from
//!   its locus. Posted events pre-empt the draw when they are due first.
//! - **Synchronous** (discrete time). Each unit timestep tests every
//!   element of every locus against its event probability, using the
//!   state at the start of the timestep; the resulting candidates then
//!   fire one per step, skipping those whose element has since left its
//!   locus.

mod context;


pub use context::{EffectContext, NetworkState};

use std::collections::VecDeque;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::compartment::CompartmentId;
use crate::config::{Dynamics, RunConfig, StopCondition};
use crate::error::{EngineError, EngineResult};
use crate::event::{EventBinding, EventId, EventKind, EventTable, FiredEvent, Origin};
use crate::eventlog::EventLog;
use crate::graph::{EdgeId, Graph, NodeId};
use crate::locus::{Element, ElementKey, Locus, LocusId};
use crate::scheduler::PostedEvent;
use crate::time::SimTime;

// ── Outcomes ──────────────────────────────────────────────────────────

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// No event can fire any more.
    Exhausted,
    /// The time limit was reached.
    TimeLimit,
    /// The event budget was spent.
    EventLimit,
}

/// Results of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub dynamics: Dynamics,
    /// Clock value at the end of the run.
    pub time: f64,
    /// Events fired since the engine started.
    pub events: u64,
    /// Timesteps in which at least one event fired (synchronous only).
    pub timesteps_with_events: Option<u64>,
    pub stop_reason: StopReason,
    /// `(label, count)` per compartment, in declaration order.
    pub compartments: Vec<(String, usize)>,
    /// Number of edges marked occupied.
    pub occupied_edges: usize,
}

impl RunSummary {
    /// Count for a compartment label, or 0 if it does not exist.
    pub fn count(&self, label: &str) -> usize {
        self.compartments
            .iter()
            .find(|(l, _)| l == label)
            .map_or(0, |(_, n)| *n)
    }
}

enum Advance {
    Fired(FiredEvent),
    Exhausted,
    Horizon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Build,
    Running,
    Aborted,
}

enum Pending {
    Sampled { event: EventId, key: ElementKey },
    Posted(PostedEvent),
}

#[derive(Default)]
struct SyncState {
    pending: VecDeque<Pending>,
    opened: bool,
    current_fired: bool,
    timesteps_with_events: u64,
}

// ── Engine ────────────────────────────────────────────────────────────

/// A single simulation replica over a graph of type `G`.
pub struct Engine<G> {
    state: NetworkState<G>,
    events: EventTable<G>,
    dynamics: Dynamics,
    rng: ChaCha8Rng,
    phase: Phase,
    clock: SimTime,
    fired: u64,
    sync: SyncState,
    log: Option<EventLog>,
}

impl<G: Graph> Engine<G> {
    /// Create an engine in its build phase.
    pub fn new(graph: G, dynamics: Dynamics, seed: u64) -> Self {
        Engine {
            state: NetworkState::new(graph),
            events: EventTable::new(),
            dynamics,
            rng: ChaCha8Rng::seed_from_u64(seed),
            phase: Phase::Build,
            clock: SimTime::ZERO,
            fired: 0,
            sync: SyncState::default(),
            log: None,
        }
    }

    /// Create an engine from a run configuration.
    pub fn from_config(graph: G, config: &RunConfig) -> Self {
        let mut engine = Self::new(graph, config.dynamics, config.seed);
        if let Some(n) = config.checkpoint_interval {
            engine.enable_logging(n);
        }
        engine
    }

    // ── Build phase ───────────────────────────────────────────────

    fn ensure_build_phase(&self) -> EngineResult<()> {
        match self.phase {
            Phase::Build => Ok(()),
            Phase::Running | Phase::Aborted => Err(EngineError::BuildPhaseClosed),
        }
    }

    /// Whether declarations are still accepted.
    pub fn is_build_phase(&self) -> bool {
        self.phase == Phase::Build
    }

    /// Declare a compartment with its initial-occupancy probability.
    pub fn add_compartment(&mut self, label: &str, initial_probability: f64) -> EngineResult<CompartmentId> {
        self.ensure_build_phase()?;
        self.state.compartments.declare(label, initial_probability)
    }

    /// Track the nodes in `compartment`. The locus is named after the
    /// compartment's label.
    pub fn declare_node_locus(&mut self, compartment: CompartmentId) -> EngineResult<LocusId> {
        self.ensure_build_phase()?;
        let label = self
            .state
            .compartments
            .compartment(compartment)
            .ok_or_else(|| EngineError::UnknownCompartment(compartment.to_string()))?
            .label
            .clone();
        self.state.loci.declare_node_locus(&label, compartment)
    }

    /// Track the edges whose endpoints are in `left` and `right`. Members
    /// are oriented so that `left` is the endpoint in `left`.
    pub fn declare_edge_locus(
        &mut self,
        left: CompartmentId,
        right: CompartmentId,
        name: &str,
    ) -> EngineResult<LocusId> {
        self.ensure_build_phase()?;
        for c in [left, right] {
            if self.state.compartments.compartment(c).is_none() {
                return Err(EngineError::UnknownCompartment(c.to_string()));
            }
        }
        self.state.loci.declare_edge_locus(name, left, right)
    }

    /// Track the nodes in the compartment labelled `label`.
    pub fn track_nodes_in(&mut self, label: &str) -> EngineResult<LocusId> {
        let c = self.state.compartments.lookup(label)?;
        self.declare_node_locus(c)
    }

    /// Track the edges between the compartments labelled `left` and
    /// `right`, under the locus name `name`.
    pub fn track_edges_between(&mut self, left: &str, right: &str, name: &str) -> EngineResult<LocusId> {
        let l = self.state.compartments.lookup(left)?;
        let r = self.state.compartments.lookup(right)?;
        self.declare_edge_locus(l, r, name)
    }

    /// Register an event whose rate applies to every element of `locus`.
    pub fn add_event<F>(&mut self, name: &str, locus: LocusId, rate: f64, effect: F) -> EngineResult<EventId>
    where
        F: FnMut(&mut EffectContext<'_, G>, Element) -> EngineResult<()> + 'static,
    {
        self.add_binding(name, locus, rate, EventKind::PerElement, Box::new(effect))
    }

    /// Register an event whose rate applies to `locus` as a whole,
    /// firing on one uniformly drawn element while the locus is non-empty.
    pub fn add_fixed_rate_event<F>(
        &mut self,
        name: &str,
        locus: LocusId,
        rate: f64,
        effect: F,
    ) -> EngineResult<EventId>
    where
        F: FnMut(&mut EffectContext<'_, G>, Element) -> EngineResult<()> + 'static,
    {
        self.add_binding(name, locus, rate, EventKind::FixedRate, Box::new(effect))
    }

    fn add_binding(
        &mut self,
        name: &str,
        locus: LocusId,
        rate: f64,
        kind: EventKind,
        effect: crate::event::Effect<G>,
    ) -> EngineResult<EventId> {
        self.ensure_build_phase()?;
        self.state.loci.locus(locus)?;
        self.events
            .add(name, locus, rate, kind, self.dynamics.max_rate(), effect)
    }

    /// Give `node` its initial compartment explicitly. Nodes left
    /// unassigned are drawn from the initial distribution.
    pub fn assign(&mut self, node: NodeId, compartment: CompartmentId) -> EngineResult<()> {
        self.ensure_build_phase()?;
        if !self.state.graph.contains_node(node) {
            return Err(EngineError::UnknownNode { node });
        }
        self.state.compartments.assign(node, compartment)
    }

    /// Post `event` to fire on `element` at time `at`.
    pub fn post(&mut self, at: SimTime, event: EventId, element: Element) -> EngineResult<u64> {
        self.events.binding(event)?;
        self.state.post(self.clock, at, event, element)
    }

    /// Record fired events, checkpointing every `checkpoint_interval`
    /// events (never, if zero).
    pub fn enable_logging(&mut self, checkpoint_interval: u64) {
        self.log = Some(EventLog::with_checkpoint_interval(checkpoint_interval));
    }

    /// Close the build phase. Idempotent once the run has started.
    pub fn finish_build(&mut self) -> EngineResult<()> {
        match self.phase {
            Phase::Running => return Ok(()),
            Phase::Aborted => return Err(EngineError::Aborted),
            Phase::Build => {}
        }
        self.state.compartments.validate_distribution()?;

        let unassigned: Vec<NodeId> = self
            .state
            .graph
            .nodes()
            .filter(|n| !self.state.compartments.is_assigned(*n))
            .collect();
        for node in unassigned {
            let c = self
                .state
                .compartments
                .draw_initial(&mut self.rng)
                .ok_or(EngineError::InvalidDistribution { sum: 0.0 })?;
            self.state.compartments.assign(node, c)?;
        }

        self.state
            .loci
            .populate(&self.state.graph, &self.state.compartments)?;
        self.state.loci.take_touched();
        self.events.seal(&self.state.loci);
        self.phase = Phase::Running;

        info!(
            dynamics = %self.dynamics,
            nodes = self.state.graph.node_count(),
            edges = self.state.graph.edge_count(),
            loci = self.state.loci.len(),
            events = self.events.len(),
            "Build phase closed"
        );
        Ok(())
    }

    // ── Running ───────────────────────────────────────────────────

    /// Fire the next event. Returns `None` once no event can fire.
    ///
    /// An error from an effect is returned as-is and leaves the engine
    /// aborted; every later step fails with [`EngineError::Aborted`].
    pub fn step(&mut self) -> EngineResult<Option<FiredEvent>> {
        match self.advance(None)? {
            Advance::Fired(event) => Ok(Some(event)),
            Advance::Exhausted | Advance::Horizon => Ok(None),
        }
    }

    /// Step until `stop` is met or no event can fire.
    pub fn run(&mut self, stop: &StopCondition) -> EngineResult<RunSummary> {
        stop.validate()?;
        let horizon = stop.max_time.and_then(SimTime::new);
        let start = self.fired;

        let reason = loop {
            if stop.max_events.is_some_and(|max| self.fired - start >= max) {
                break StopReason::EventLimit;
            }
            match self.advance(horizon)? {
                Advance::Fired(_) => {}
                Advance::Exhausted => break StopReason::Exhausted,
                Advance::Horizon => break StopReason::TimeLimit,
            }
        };

        let summary = self.summary(reason);
        info!(
            time = summary.time,
            events = summary.events,
            reason = ?summary.stop_reason,
            "Run finished"
        );
        Ok(summary)
    }

    /// The fired-event stream: a lazy, single-pass iterator that steps
    /// the engine on demand and ends when no event can fire or a step
    /// fails.
    pub fn trace(&mut self) -> Trace<'_, G> {
        Trace { engine: self, done: false }
    }

    fn advance(&mut self, horizon: Option<SimTime>) -> EngineResult<Advance> {
        match self.phase {
            Phase::Aborted => return Err(EngineError::Aborted),
            Phase::Build => self.finish_build()?,
            Phase::Running => {}
        }
        let result = match self.dynamics {
            Dynamics::Stochastic => self.advance_stochastic(horizon),
            Dynamics::Synchronous => self.advance_synchronous(horizon),
        };
        if let Err(e) = &result {
            warn!(error = %e, time = self.clock.as_f64(), "Step failed; aborting replica");
            self.phase = Phase::Aborted;
        }
        result
    }

    fn refresh_weights(&mut self) {
        let touched = self.state.loci.take_touched();
        self.events.refresh(&touched, &self.state.loci);
    }

    fn advance_stochastic(&mut self, horizon: Option<SimTime>) -> EngineResult<Advance> {
        self.refresh_weights();
        let next_posted = self.state.posted.next_time();

        if !self.events.has_positive_weight() {
            let Some(at) = next_posted else {
                return Ok(Advance::Exhausted);
            };
            if let Some(h) = horizon.filter(|h| at > *h) {
                self.clock = self.clock.max(h);
                return Ok(Advance::Horizon);
            }
            return self.fire_next_posted();
        }

        let total = self.events.total_weight();
        let u = 1.0 - self.rng.gen::<f64>();
        let candidate = self.clock.advance(-u.ln() / total);

        if next_posted.is_some_and(|at| at <= candidate) && horizon.map_or(true, |h| next_posted <= Some(h)) {
            return self.fire_next_posted();
        }
        if let Some(h) = horizon.filter(|h| candidate > *h) {
            self.clock = self.clock.max(h);
            return Ok(Advance::Horizon);
        }
        self.clock = candidate;

        let x = self.rng.gen::<f64>() * total;
        let Some(event) = self.events.select(x) else {
            return Ok(Advance::Exhausted);
        };
        let locus_id = self.events.binding(event)?.locus();
        let locus = self.state.loci.locus(locus_id)?;
        let element = locus.draw(&mut self.rng).ok_or_else(|| EngineError::LocusInconsistent {
            locus: locus.name().to_string(),
            detail: "positive weight on an empty locus".to_string(),
        })?;
        self.fire(event, element, Origin::Sampled).map(Advance::Fired)
    }

    fn advance_synchronous(&mut self, horizon: Option<SimTime>) -> EngineResult<Advance> {
        loop {
            while let Some(pending) = self.sync.pending.pop_front() {
                match pending {
                    Pending::Posted(posted) => {
                        return self
                            .fire(posted.event, posted.element, Origin::Posted)
                            .map(Advance::Fired);
                    }
                    Pending::Sampled { event, key } => {
                        let locus_id = self.events.binding(event)?.locus();
                        if let Some(element) = self.state.loci.locus(locus_id)?.get(&key) {
                            return self.fire(event, element, Origin::Sampled).map(Advance::Fired);
                        }
                    }
                }
            }

            self.refresh_weights();
            if !self.events.has_positive_weight() && self.state.posted.is_empty() {
                return Ok(Advance::Exhausted);
            }
            let next = if self.sync.opened {
                self.clock.advance(1.0)
            } else {
                self.clock
            };
            if horizon.is_some_and(|h| next > h) {
                return Ok(Advance::Horizon);
            }
            self.clock = next;
            self.sync.opened = true;
            self.sync.current_fired = false;
            self.open_timestep()?;
        }
    }

    /// Collect this timestep's candidates from the state at its start.
    fn open_timestep(&mut self) -> EngineResult<()> {
        while let Some(posted) = self.state.posted.pop_due(self.clock) {
            self.sync.pending.push_back(Pending::Posted(posted));
        }
        for (id, binding) in self.events.iter() {
            if self.events.weight(id) <= 0.0 {
                continue;
            }
            let locus = self.state.loci.locus(binding.locus())?;
            match binding.kind() {
                EventKind::PerElement => {
                    for element in locus.elements() {
                        if self.rng.gen::<f64>() < binding.rate() {
                            self.sync.pending.push_back(Pending::Sampled { event: id, key: element.key() });
                        }
                    }
                }
                EventKind::FixedRate => {
                    if self.rng.gen::<f64>() < binding.rate() {
                        if let Some(element) = locus.draw(&mut self.rng) {
                            self.sync.pending.push_back(Pending::Sampled { event: id, key: element.key() });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn fire_next_posted(&mut self) -> EngineResult<Advance> {
        let Some(posted) = self.state.posted.pop_next() else {
            return Ok(Advance::Exhausted);
        };
        self.clock = self.clock.max(posted.at);
        self.fire(posted.event, posted.element, Origin::Posted).map(Advance::Fired)
    }

    fn fire(&mut self, event: EventId, element: Element, origin: Origin) -> EngineResult<FiredEvent> {
        let now = self.clock;
        let event_count = self.events.len();
        let binding = self.events.binding_mut(event)?;
        let locus = binding.locus();
        debug!(
            seq = self.fired,
            time = now.as_f64(),
            event = binding.name(),
            %element,
            ?origin,
            "Firing event"
        );

        let mut ctx = EffectContext {
            state: &mut self.state,
            now,
            event,
            event_count,
        };
        (binding.effect)(&mut ctx, element)?;

        let fired = FiredEvent {
            sequence: self.fired,
            time: now,
            event,
            locus,
            element,
            origin,
        };
        self.fired += 1;
        if self.dynamics == Dynamics::Synchronous && !self.sync.current_fired {
            self.sync.current_fired = true;
            self.sync.timesteps_with_events += 1;
        }
        if let Some(log) = self.log.as_mut() {
            log.record(fired.clone());
            if log.should_checkpoint(self.fired) {
                log.add_checkpoint(self.fired, now, self.state.compartments.state_hash());
            }
        }
        Ok(fired)
    }

    // ── Queries ───────────────────────────────────────────────────

    /// Current simulation time.
    pub fn now(&self) -> SimTime {
        self.clock
    }

    /// Total events fired so far.
    pub fn events_fired(&self) -> u64 {
        self.fired
    }

    /// The configured time model.
    pub fn dynamics(&self) -> Dynamics {
        self.dynamics
    }

    /// The network.
    pub fn graph(&self) -> &G {
        &self.state.graph
    }

    /// Resolve a compartment label.
    pub fn compartment_id(&self, label: &str) -> EngineResult<CompartmentId> {
        self.state.compartments.lookup(label)
    }

    /// Label of a compartment.
    pub fn compartment_label(&self, id: CompartmentId) -> &str {
        self.state.compartments.label(id)
    }

    /// Current compartment of `node`.
    pub fn compartment(&self, node: NodeId) -> EngineResult<CompartmentId> {
        self.state.compartments.get(node)
    }

    /// `(label, count)` per compartment.
    pub fn compartment_counts(&self) -> Vec<(String, usize)> {
        self.state.compartments.counts()
    }

    /// A locus by id.
    pub fn locus(&self, id: LocusId) -> EngineResult<&Locus> {
        self.state.loci.locus(id)
    }

    /// A locus id by name.
    pub fn locus_id(&self, name: &str) -> Option<LocusId> {
        self.state.loci.find(name)
    }

    /// Current size of a locus.
    pub fn locus_size(&self, id: LocusId) -> usize {
        self.state.loci.size(id)
    }

    /// Current members of a locus.
    pub fn locus_members(&self, id: LocusId) -> EngineResult<impl Iterator<Item = Element> + '_> {
        Ok(self.state.loci.locus(id)?.elements())
    }

    /// An event binding by id.
    pub fn event(&self, id: EventId) -> EngineResult<&EventBinding<G>> {
        self.events.binding(id)
    }

    /// An event id by name.
    pub fn event_id(&self, name: &str) -> Option<EventId> {
        self.events.find(name)
    }

    /// Current weight of an event. Zero until the build phase closes.
    pub fn event_weight(&self, id: EventId) -> EngineResult<f64> {
        let binding = self.events.binding(id)?;
        Ok(match self.phase {
            Phase::Build => 0.0,
            Phase::Running | Phase::Aborted => binding.weight(self.state.loci.size(binding.locus())),
        })
    }

    /// When `edge` was marked occupied, if it was.
    pub fn occupied_at(&self, edge: EdgeId) -> Option<SimTime> {
        self.state.occupied.get(&edge).copied()
    }

    /// All occupied edges with their marking times, ordered by edge id.
    pub fn occupied_edges(&self) -> Vec<(EdgeId, SimTime)> {
        let mut edges: Vec<(EdgeId, SimTime)> =
            self.state.occupied.iter().map(|(e, t)| (*e, *t)).collect();
        edges.sort_unstable_by_key(|(e, _)| *e);
        edges
    }

    /// Number of posted events not yet fired.
    pub fn pending_posts(&self) -> usize {
        self.state.posted.len()
    }

    /// The event log, if logging is enabled.
    pub fn event_log(&self) -> Option<&EventLog> {
        self.log.as_ref()
    }

    /// Brute-force check of every locus against the live predicates and
    /// of the node partition.
    pub fn audit(&self) -> EngineResult<()> {
        self.state
            .loci
            .audit(&self.state.graph, &self.state.compartments)
    }

    /// Snapshot of the current results.
    pub fn summary(&self, stop_reason: StopReason) -> RunSummary {
        RunSummary {
            dynamics: self.dynamics,
            time: self.clock.as_f64(),
            events: self.fired,
            timesteps_with_events: match self.dynamics {
                Dynamics::Synchronous => Some(self.sync.timesteps_with_events),
                Dynamics::Stochastic => None,
            },
            stop_reason,
            compartments: self.state.compartments.counts(),
            occupied_edges: self.state.occupied.len(),
        }
    }
}

// ── Trace ─────────────────────────────────────────────────────────────

/// Lazy stream of fired events. See [`Engine::trace`].
pub struct Trace<'a, G> {
    engine: &'a mut Engine<G>,
    done: bool,
}

impl<G: Graph> Iterator for Trace<'_, G> {
    type Item = EngineResult<FiredEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.engine.step() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<G: Graph> std::iter::FusedIterator for Trace<'_, G> {}
