//! # epiloci — Compartmented Processes on Networks
//!
//! A stochastic simulation engine in which every node of a graph sits in
//! exactly one compartment, and events on nodes or edges move nodes
//! between compartments over simulated time. Models such as SIR are thin
//! declarations layered on top: compartments, loci, and event effects.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────┐
//! │             Engine               │ ← build phase, run loop
//! │  ┌───────────┐  ┌─────────────┐ │
//! │  │ EventTable│  │  PostQueue  │ │ ← weights (SumTree), posted events
//! │  └─────┬─────┘  └─────────────┘ │
//! │        │ locus sizes             │
//! │  ┌─────┴──────┐                  │
//! │  │ LocusIndex │                  │ ← node / edge populations
//! │  └─────┬──────┘                  │
//! │        │ compartment changes     │
//! │  ┌─────┴──────────────┐          │
//! │  │ CompartmentRegistry │          │ ← node → compartment
//! │  └────────────────────┘          │
//! └────────────────┬────────────────┘
//!                  │ Graph (read-only)
//! ```
//!
//! Each step selects one event, runs its effect through an
//! [`EffectContext`], and the locus index re-derives membership for the
//! changed node and its incident edges only.

pub mod compartment;
pub mod config;
pub mod dsl;
pub mod engine;
pub mod error;
pub mod event;
pub mod eventlog;
pub mod graph;
pub mod locus;
pub mod model;
pub mod replicas;
pub mod sampler;
pub mod scheduler;
pub mod time;

// Re-exports for convenience.
pub use compartment::{CompartmentId, CompartmentRegistry};
pub use config::{Dynamics, RunConfig, StopCondition};
pub use dsl::EngineBuilder;
pub use engine::{EffectContext, Engine, RunSummary, StopReason, Trace};
pub use error::{EngineError, EngineResult};
pub use event::{EventId, EventKind, FiredEvent, Origin};
pub use eventlog::EventLog;
pub use graph::{AdjacencyGraph, EdgeId, Graph, NodeId};
pub use locus::{Element, LocusId, OrientedEdge};
pub use model::{CompartmentedModel, Sir, SirParams};
pub use replicas::{run_replicas, ReplicaOutcome, ReplicaStats};
pub use time::SimTime;
