//! Independent replicas run in parallel.
//!
//! A single replica is strictly sequential. Parallelism only ever comes
//! from running many replicas at once: each builds its own engine inside
//! its own rayon task from the seed it is handed, so nothing is shared.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::StopCondition;
use crate::engine::{Engine, RunSummary};
use crate::error::EngineResult;
use crate::graph::Graph;

/// The outcome of one replica.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaOutcome {
    /// Position of the replica in the batch.
    pub index: usize,
    /// Seed the replica ran with (`base_seed + index`).
    pub seed: u64,
    pub result: EngineResult<RunSummary>,
}

/// Run `count` replicas to `stop`, replica `i` seeded with
/// `base_seed + i`. `factory` builds a fresh engine from a seed.
///
/// Outcomes come back in replica order whatever order the tasks finish
/// in.
pub fn run_replicas<G, F>(
    count: usize,
    base_seed: u64,
    stop: &StopCondition,
    factory: F,
) -> Vec<ReplicaOutcome>
where
    G: Graph,
    F: Fn(u64) -> EngineResult<Engine<G>> + Sync,
{
    let outcomes: Vec<ReplicaOutcome> = (0..count)
        .into_par_iter()
        .map(|index| {
            let seed = base_seed.wrapping_add(index as u64);
            let result = factory(seed).and_then(|mut engine| engine.run(stop));
            if let Err(e) = &result {
                warn!(index, seed, error = %e, "Replica failed");
            }
            ReplicaOutcome { index, seed, result }
        })
        .collect();

    info!(
        replicas = count,
        failed = outcomes.iter().filter(|o| o.result.is_err()).count(),
        "Replicas finished"
    );
    outcomes
}

/// Averages over the successful replicas of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaStats {
    pub replicas: usize,
    pub failures: usize,
    pub mean_time: f64,
    pub mean_events: f64,
    /// Mean final count per compartment label, in declaration order.
    pub mean_counts: Vec<(String, f64)>,
}

impl ReplicaStats {
    /// Aggregate a batch. Failed replicas are counted but not averaged.
    pub fn from_outcomes(outcomes: &[ReplicaOutcome]) -> Self {
        let ok: Vec<&RunSummary> = outcomes.iter().filter_map(|o| o.result.as_ref().ok()).collect();
        let mean_counts = match ok.first() {
            Some(first) => first
                .compartments
                .iter()
                .map(|(label, _)| (label.clone(), mean_of(&ok, |s| s.count(label) as f64)))
                .collect(),
            None => Vec::new(),
        };

        ReplicaStats {
            replicas: outcomes.len(),
            failures: outcomes.len() - ok.len(),
            mean_time: mean_of(&ok, |s| s.time),
            mean_events: mean_of(&ok, |s| s.events as f64),
            mean_counts,
        }
    }
}

fn mean_of(summaries: &[&RunSummary], f: impl Fn(&RunSummary) -> f64) -> f64 {
    if summaries.is_empty() {
        return 0.0;
    }
    summaries.iter().map(|s| f(*s)).sum::<f64>() / summaries.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Dynamics;
    use crate::error::EngineError;
    use crate::graph::AdjacencyGraph;
    use crate::model::{CompartmentedModel, Sir, SirParams};

    fn sir_factory(seed: u64) -> EngineResult<Engine<AdjacencyGraph>> {
        let mut engine = Engine::new(AdjacencyGraph::complete(20), Dynamics::Stochastic, seed);
        Sir::new(SirParams { p_infected: 0.1, p_infect: 0.3, p_remove: 0.5 }).build(&mut engine)?;
        Ok(engine)
    }

    #[test]
    fn test_replicas_match_sequential_runs() {
        let stop = StopCondition::exhaustion();
        let outcomes = run_replicas(8, 100, &stop, sir_factory);
        assert_eq!(outcomes.len(), 8);
        for (i, o) in outcomes.iter().enumerate() {
            assert_eq!(o.index, i);
            assert_eq!(o.seed, 100 + i as u64);
            let expected = sir_factory(o.seed).unwrap().run(&stop).unwrap();
            assert_eq!(o.result.as_ref().unwrap(), &expected);
        }
    }

    #[test]
    fn test_failures_are_isolated() {
        let outcomes = run_replicas(4, 0, &StopCondition::exhaustion(), |seed| {
            if seed == 2 {
                Err(EngineError::InvalidConfig("bad replica".into()))
            } else {
                sir_factory(seed)
            }
        });
        let stats = ReplicaStats::from_outcomes(&outcomes);
        assert_eq!(stats.replicas, 4);
        assert_eq!(stats.failures, 1);
        assert!(outcomes[2].result.is_err());
        let total: f64 = stats.mean_counts.iter().map(|(_, c)| c).sum();
        assert!((total - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_stats_of_empty_batch() {
        let stats = ReplicaStats::from_outcomes(&[]);
        assert_eq!(stats.replicas, 0);
        assert_eq!(stats.mean_time, 0.0);
        assert!(stats.mean_counts.is_empty());
    }
}
