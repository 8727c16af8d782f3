//! Structured error types for epiloci.
//!
//! All fallible public APIs return `Result<T, EngineError>`. Build-phase
//! errors are raised before the first step runs; run-time errors are
//! limited to contract violations by the graph or initial conditions, and
//! failures raised from inside event effects.

use thiserror::Error;

use crate::graph::{EdgeId, NodeId};

/// The top-level error type for the simulation engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    // ── Compartment registry ──────────────────────────────

    /// A node was given an initial compartment twice.
    #[error("node {node} already has a compartment")]
    DuplicateAssignment { node: NodeId },

    /// A node was queried or changed before it was given a compartment.
    #[error("node {node} has no compartment")]
    UninitializedNode { node: NodeId },

    /// Two compartments were declared with the same label.
    #[error("compartment {label:?} is already declared")]
    DuplicateCompartment { label: String },

    /// A compartment label did not resolve.
    #[error("unknown compartment {0:?}")]
    UnknownCompartment(String),

    /// A single initial-occupancy probability outside `[0, 1]`.
    #[error("initial probability {probability} for compartment {label:?} is outside [0, 1]")]
    InvalidProbability { label: String, probability: f64 },

    /// The initial-occupancy probabilities do not sum to one.
    #[error("initial compartment probabilities sum to {sum}, expected 1")]
    InvalidDistribution { sum: f64 },

    // ── Loci and events ───────────────────────────────────

    /// A locus with the same name or predicate is already declared.
    #[error("locus {name:?} is already declared")]
    DuplicateLocus { name: String },

    /// A locus id that this engine never handed out.
    #[error("unknown locus #{0}")]
    UnknownLocus(usize),

    /// An event with the same name is already declared.
    #[error("event {name:?} is already declared")]
    DuplicateEvent { name: String },

    /// An event id that this engine never handed out.
    #[error("unknown event #{0}")]
    UnknownEvent(usize),

    /// A rate that is negative, non-finite, or above 1 under synchronous dynamics.
    #[error("invalid rate {rate} for event {event:?}")]
    InvalidRate { event: String, rate: f64 },

    /// A declaration was attempted after the first step.
    #[error("the build phase is closed; declarations must precede the first step")]
    BuildPhaseClosed,

    /// Incrementally maintained locus membership disagrees with the live predicate.
    #[error("locus {locus:?} is inconsistent: {detail}")]
    LocusInconsistent { locus: String, detail: String },

    // ── Graph ─────────────────────────────────────────────

    /// A node id the graph provider does not know.
    #[error("node {node} is not in the graph")]
    UnknownNode { node: NodeId },

    /// An edge id the graph provider does not know.
    #[error("edge {edge} is not in the graph")]
    UnknownEdge { edge: EdgeId },

    // ── Run time ──────────────────────────────────────────

    /// An effect callback reported a failure.
    #[error("effect of event {event:?} failed: {message}")]
    Effect { event: String, message: String },

    /// A posted event was scheduled before the current time.
    #[error("cannot post an event at t={requested} when the clock reads t={current}")]
    NonCausalPost { requested: f64, current: f64 },

    /// A previous step failed; the replica cannot be resumed.
    #[error("simulation aborted by an earlier failure")]
    Aborted,

    // ── Configuration ─────────────────────────────────────

    /// A run configuration could not be parsed or is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Convenience alias for `Result<T, EngineError>`.
pub type EngineResult<T> = Result<T, EngineError>;
