//! Model definitions.
//!
//! A model declares compartments, loci, and event bindings on an engine
//! during its build phase, and supplies the effects that run when those
//! events fire. Models never touch loci directly: effects change
//! compartments and mark edges through the [`EffectContext`], and the
//! engine keeps every locus in step.
//!
//! [`EffectContext`]: crate::engine::EffectContext

pub mod sir;

use crate::engine::Engine;
use crate::error::EngineResult;
use crate::graph::Graph;

pub use sir::{Sir, SirParams};

/// A compartmented process that can be installed on an engine.
///
/// # Contract
///
/// Implementations **must**:
/// - Only be built on an engine that is still in its build phase.
/// - Route every state change through the effect context.
/// - Not rely on global mutable state, so equal seeds give equal runs.
pub trait CompartmentedModel<G: Graph> {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Declare the model's compartments, loci, and events.
    fn build(&self, engine: &mut Engine<G>) -> EngineResult<()>;
}
