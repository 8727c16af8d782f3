//! Fluent builder DSL for engine setup.
//!
//! Hides the boilerplate of creating an engine, installing models,
//! pinning initial compartments, and configuring the event log, while
//! keeping every run fully determined by its seed.

use tracing::info;

use crate::config::{Dynamics, RunConfig, StopCondition};
use crate::engine::{Engine, RunSummary};
use crate::error::EngineResult;
use crate::event::EventId;
use crate::graph::{Graph, NodeId};
use crate::locus::Element;
use crate::model::CompartmentedModel;
use crate::time::SimTime;

// ── EngineBuilder ─────────────────────────────────────────────────────

/// Fluent builder for an [`Engine`].
///
/// # Example
/// ```rust
/// use epiloci::dsl::EngineBuilder;
/// use epiloci::graph::AdjacencyGraph;
/// use epiloci::model::{Sir, SirParams};
///
/// let mut engine = EngineBuilder::new(AdjacencyGraph::path(5))
///     .seed(42)
///     .model(Sir::new(SirParams { p_infected: 0.0, p_infect: 0.5, p_remove: 0.1 }))
///     .assign(0, "I")
///     .assign_rest("S")
///     .with_checkpoints(10)
///     .build()
///     .unwrap();
/// engine.step().unwrap();
/// ```
pub struct EngineBuilder<G: Graph> {
    graph: G,
    config: RunConfig,
    models: Vec<Box<dyn CompartmentedModel<G>>>,
    assignments: Vec<(NodeId, String)>,
    fill: Option<String>,
    posts: Vec<(SimTime, String, Element)>,
    logging: LoggingConfig,
}

#[derive(Clone, Copy)]
enum LoggingConfig {
    Off,
    On,
    WithCheckpoints(u64),
}

impl<G: Graph> EngineBuilder<G> {
    /// Start from a graph with default configuration.
    pub fn new(graph: G) -> Self {
        EngineBuilder {
            graph,
            config: RunConfig::default(),
            models: Vec::new(),
            assignments: Vec::new(),
            fill: None,
            posts: Vec::new(),
            logging: LoggingConfig::Off,
        }
    }

    /// Start from a graph and a run configuration. The configuration's
    /// checkpoint interval turns on the event log.
    pub fn from_config(graph: G, config: RunConfig) -> Self {
        let logging = match config.checkpoint_interval {
            Some(n) => LoggingConfig::WithCheckpoints(n),
            None => LoggingConfig::Off,
        };
        EngineBuilder { config, logging, ..Self::new(graph) }
    }

    // ── Run configuration ─────────────────────────────────────

    /// Set the random seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Set the time model.
    pub fn dynamics(mut self, dynamics: Dynamics) -> Self {
        self.config.dynamics = dynamics;
        self
    }

    /// Use discrete timesteps.
    pub fn synchronous(self) -> Self {
        self.dynamics(Dynamics::Synchronous)
    }

    /// Set the stopping condition used by [`EngineBuilder::run`].
    pub fn stop(mut self, stop: StopCondition) -> Self {
        self.config.stop = stop;
        self
    }

    // ── Model ─────────────────────────────────────────────────

    /// Install a model. Models are built in the order they are added.
    pub fn model<M>(mut self, model: M) -> Self
    where
        M: CompartmentedModel<G> + 'static,
    {
        self.models.push(Box::new(model));
        self
    }

    // ── Initial conditions ────────────────────────────────────

    /// Start `node` in the compartment labelled `label`.
    pub fn assign(mut self, node: u64, label: &str) -> Self {
        self.assignments.push((NodeId::new(node), label.to_string()));
        self
    }

    /// Start every node not assigned explicitly in `label`, instead of
    /// drawing it from the initial distribution.
    pub fn assign_rest(mut self, label: &str) -> Self {
        self.fill = Some(label.to_string());
        self
    }

    /// Post the event named `event` to fire on `element` at time `at`.
    pub fn post(mut self, at: SimTime, event: &str, element: Element) -> Self {
        self.posts.push((at, event.to_string(), element));
        self
    }

    // ── Logging ───────────────────────────────────────────────

    /// Enable event logging.
    pub fn with_logging(mut self) -> Self {
        self.logging = LoggingConfig::On;
        self
    }

    /// Enable event logging with checkpoint interval.
    pub fn with_checkpoints(mut self, interval: u64) -> Self {
        self.logging = LoggingConfig::WithCheckpoints(interval);
        self
    }

    // ── Build ─────────────────────────────────────────────────

    /// Build the engine, still in its build phase.
    pub fn build(self) -> EngineResult<Engine<G>> {
        self.build_with_stop().map(|(engine, _)| engine)
    }

    fn build_with_stop(self) -> EngineResult<(Engine<G>, StopCondition)> {
        let mut engine = Engine::from_config(self.graph, &self.config);

        match self.logging {
            LoggingConfig::Off => {}
            LoggingConfig::On => engine.enable_logging(0),
            LoggingConfig::WithCheckpoints(n) => engine.enable_logging(n),
        }

        for model in &self.models {
            model.build(&mut engine)?;
            info!(model = model.name(), "Model installed");
        }

        for (node, label) in &self.assignments {
            let c = engine.compartment_id(label)?;
            engine.assign(*node, c)?;
        }
        if let Some(label) = &self.fill {
            let c = engine.compartment_id(label)?;
            let assigned: Vec<NodeId> = self.assignments.iter().map(|(n, _)| *n).collect();
            let rest: Vec<NodeId> = engine
                .graph()
                .nodes()
                .filter(|n| !assigned.contains(n))
                .collect();
            for node in rest {
                engine.assign(node, c)?;
            }
        }

        for (at, name, element) in self.posts {
            let event = lookup_event(&engine, &name)?;
            engine.post(at, event, element)?;
        }

        Ok((engine, self.config.stop))
    }

    /// Build, close the build phase, and run until the configured stop
    /// condition.
    pub fn run(self) -> EngineResult<(Engine<G>, RunSummary)> {
        let (mut engine, stop) = self.build_with_stop()?;
        let summary = engine.run(&stop)?;
        Ok((engine, summary))
    }
}

fn lookup_event<G: Graph>(engine: &Engine<G>, name: &str) -> EngineResult<EventId> {
    engine
        .event_id(name)
        .ok_or_else(|| crate::error::EngineError::InvalidConfig(format!("no event named {}", name)))
}
