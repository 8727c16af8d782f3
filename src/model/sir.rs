//! Susceptible–Infected–Removed.
//!
//! Susceptible nodes are infected across edges from infected neighbours,
//! and infected nodes are removed. Infections mark the edge they travel
//! over, so the infection tree can be recovered from the occupied edges.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::graph::Graph;

use super::CompartmentedModel;

/// Compartment for nodes susceptible to infection.
pub const SUSCEPTIBLE: &str = "S";
/// Compartment for infected nodes.
pub const INFECTED: &str = "I";
/// Compartment for removed (recovered) nodes.
pub const REMOVED: &str = "R";
/// Edge locus able to transmit infection.
pub const SI: &str = "SI";

/// Name of the infection event.
pub const INFECT: &str = "infect";
/// Name of the removal event.
pub const REMOVE: &str = "remove";

/// SIR parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SirParams {
    /// Probability that a node starts infected.
    pub p_infected: f64,
    /// Infection rate per S–I edge.
    pub p_infect: f64,
    /// Removal rate per infected node.
    pub p_remove: f64,
}

impl Default for SirParams {
    fn default() -> Self {
        SirParams {
            p_infected: 0.01,
            p_infect: 0.3,
            p_remove: 0.05,
        }
    }
}

/// The SIR model.
#[derive(Debug, Clone, Default)]
pub struct Sir {
    params: SirParams,
}

impl Sir {
    pub fn new(params: SirParams) -> Self {
        Sir { params }
    }

    pub fn params(&self) -> &SirParams {
        &self.params
    }
}

impl<G: Graph> CompartmentedModel<G> for Sir {
    fn name(&self) -> &str {
        "SIR"
    }

    fn build(&self, engine: &mut Engine<G>) -> EngineResult<()> {
        let SirParams { p_infected, p_infect, p_remove } = self.params;

        let s = engine.add_compartment(SUSCEPTIBLE, 1.0 - p_infected)?;
        let i = engine.add_compartment(INFECTED, p_infected)?;
        let r = engine.add_compartment(REMOVED, 0.0)?;

        let si = engine.declare_edge_locus(s, i, SI)?;
        let infected = engine.declare_node_locus(i)?;

        // The susceptible end is always `left`.
        engine.add_event(INFECT, si, p_infect, move |ctx, element| {
            let edge = element.as_edge().ok_or_else(|| EngineError::Effect {
                event: INFECT.to_string(),
                message: format!("expected an edge, got {}", element),
            })?;
            ctx.change_compartment(edge.left, i)?;
            ctx.mark_occupied(edge.edge)
        })?;
        engine.add_event(REMOVE, infected, p_remove, move |ctx, element| {
            let node = element.as_node().ok_or_else(|| EngineError::Effect {
                event: REMOVE.to_string(),
                message: format!("expected a node, got {}", element),
            })?;
            ctx.change_compartment(node, r)?;
            Ok(())
        })?;

        debug!(p_infected, p_infect, p_remove, "SIR model built");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Dynamics, StopCondition};
    use crate::graph::{AdjacencyGraph, NodeId};

    fn engine(graph: AdjacencyGraph, params: SirParams, seed: u64) -> Engine<AdjacencyGraph> {
        let mut engine = Engine::new(graph, Dynamics::Stochastic, seed);
        Sir::new(params).build(&mut engine).unwrap();
        engine
    }

    #[test]
    fn test_declares_three_compartments() {
        let e = engine(AdjacencyGraph::path(3), SirParams::default(), 1);
        let labels: Vec<String> = e.compartment_counts().into_iter().map(|(l, _)| l).collect();
        assert_eq!(labels, vec!["S", "I", "R"]);
        assert!(e.locus_id(SI).is_some());
        assert!(e.locus_id(INFECTED).is_some());
        assert!(e.event_id(INFECT).is_some());
        assert!(e.event_id(REMOVE).is_some());
    }

    #[test]
    fn test_epidemic_ends_with_no_infected() {
        let mut e = engine(
            AdjacencyGraph::complete(20),
            SirParams { p_infected: 0.1, p_infect: 0.5, p_remove: 1.0 },
            7,
        );
        let summary = e.run(&StopCondition::exhaustion()).unwrap();
        assert_eq!(summary.count(INFECTED), 0);
        assert_eq!(summary.count(SUSCEPTIBLE) + summary.count(REMOVED), 20);
    }

    #[test]
    fn test_occupied_edges_form_infection_tree() {
        let mut e = engine(
            AdjacencyGraph::complete(15),
            SirParams { p_infected: 0.0, p_infect: 1.0, p_remove: 0.5 },
            3,
        );
        let s = e.compartment_id(SUSCEPTIBLE).unwrap();
        let i = e.compartment_id(INFECTED).unwrap();
        e.assign(NodeId::new(0), i).unwrap();
        for k in 1..15 {
            e.assign(NodeId::new(k), s).unwrap();
        }
        let summary = e.run(&StopCondition::exhaustion()).unwrap();

        // Every infection beyond the seed travelled over exactly one edge.
        let ever_infected = summary.count(REMOVED);
        assert_eq!(summary.occupied_edges, ever_infected - 1);
    }

    #[test]
    fn test_invalid_initial_probability() {
        let mut engine = Engine::new(AdjacencyGraph::path(2), Dynamics::Stochastic, 1);
        let result = Sir::new(SirParams { p_infected: 1.5, ..SirParams::default() }).build(&mut engine);
        assert!(matches!(result, Err(EngineError::InvalidProbability { .. })));
    }

    #[test]
    fn test_params_from_toml() {
        let p: SirParams = toml::from_str("p_infected = 0.2\np_infect = 0.1\np_remove = 0.4").unwrap();
        assert_eq!(p, SirParams { p_infected: 0.2, p_infect: 0.1, p_remove: 0.4 });
    }
}
