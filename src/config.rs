//! Run configuration.
//!
//! Everything that decides how a replica runs, as opposed to what model
//! it runs: the time model, the seed, the stopping condition, and event
//! log checkpointing. Parses from TOML:
//!
//! ```toml
//! dynamics = "stochastic"
//! seed = 42
//! checkpoint_interval = 100
//!
//! [stop]
//! max_time = 50.0
//! max_events = 100000
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Time model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dynamics {
    /// Continuous time: exponential waiting times at the total event
    /// rate, one event per step (Gillespie).
    #[default]
    Stochastic,
    /// Discrete time: unit timesteps, every element independently
    /// tested against its event probability.
    Synchronous,
}

impl Dynamics {
    /// Largest admissible per-element rate under this time model.
    pub fn max_rate(self) -> Option<f64> {
        match self {
            Dynamics::Stochastic => None,
            Dynamics::Synchronous => Some(1.0),
        }
    }
}

impl std::fmt::Display for Dynamics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dynamics::Stochastic => write!(f, "stochastic"),
            Dynamics::Synchronous => write!(f, "synchronous"),
        }
    }
}

/// External limits on a run. A run with no limits stops only when no
/// event can fire.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StopCondition {
    /// No event fires after this simulated time.
    pub max_time: Option<f64>,
    /// At most this many events fire.
    pub max_events: Option<u64>,
}

impl StopCondition {
    /// Run until no event can fire.
    pub fn exhaustion() -> Self {
        Self::default()
    }

    /// Stop at simulated time `t`.
    pub fn at_time(t: f64) -> Self {
        StopCondition { max_time: Some(t), max_events: None }
    }

    /// Stop after `n` events.
    pub fn after_events(n: u64) -> Self {
        StopCondition { max_time: None, max_events: Some(n) }
    }

    /// Add a time limit.
    pub fn with_max_time(mut self, t: f64) -> Self {
        self.max_time = Some(t);
        self
    }

    /// Add an event budget.
    pub fn with_max_events(mut self, n: u64) -> Self {
        self.max_events = Some(n);
        self
    }

    /// Check ranges.
    pub fn validate(&self) -> EngineResult<()> {
        if let Some(t) = self.max_time {
            if !t.is_finite() || t < 0.0 {
                return Err(EngineError::InvalidConfig(format!("max_time {} is not a valid time", t)));
            }
        }
        Ok(())
    }
}

/// Configuration for a single replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub dynamics: Dynamics,
    /// Seed for the replica's random stream.
    pub seed: u64,
    pub stop: StopCondition,
    /// Record fired events, checkpointing every `n` events when `Some(n)`
    /// with `n > 0`, and recording without checkpoints when `Some(0)`.
    pub checkpoint_interval: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            dynamics: Dynamics::Stochastic,
            seed: 12345,
            stop: StopCondition::default(),
            checkpoint_interval: None,
        }
    }
}

impl RunConfig {
    /// Set the time model.
    pub fn with_dynamics(mut self, dynamics: Dynamics) -> Self {
        self.dynamics = dynamics;
        self
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the stopping condition.
    pub fn with_stop(mut self, stop: StopCondition) -> Self {
        self.stop = stop;
        self
    }

    /// Record fired events with a checkpoint every `n` events.
    pub fn with_checkpoints(mut self, n: u64) -> Self {
        self.checkpoint_interval = Some(n);
        self
    }

    /// Parse from a TOML document.
    pub fn from_toml_str(s: &str) -> EngineResult<Self> {
        let config: RunConfig =
            toml::from_str(s).map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        config.stop.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = RunConfig::default();
        assert_eq!(c.dynamics, Dynamics::Stochastic);
        assert_eq!(c.stop, StopCondition::exhaustion());
        assert!(c.checkpoint_interval.is_none());
    }

    #[test]
    fn test_parse_toml() {
        let c = RunConfig::from_toml_str(
            r#"
            dynamics = "synchronous"
            seed = 7

            [stop]
            max_time = 20.0
            "#,
        )
        .unwrap();
        assert_eq!(c.dynamics, Dynamics::Synchronous);
        assert_eq!(c.seed, 7);
        assert_eq!(c.stop.max_time, Some(20.0));
        assert_eq!(c.stop.max_events, None);
    }

    #[test]
    fn test_parse_rejects_unknown_dynamics() {
        assert!(matches!(
            RunConfig::from_toml_str(r#"dynamics = "quantum""#),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_parse_rejects_negative_time() {
        assert!(matches!(
            RunConfig::from_toml_str("[stop]\nmax_time = -1.0"),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_builders() {
        let c = RunConfig::default()
            .with_seed(3)
            .with_dynamics(Dynamics::Synchronous)
            .with_stop(StopCondition::after_events(10).with_max_time(5.0))
            .with_checkpoints(4);
        assert_eq!(c.seed, 3);
        assert_eq!(c.stop.max_events, Some(10));
        assert_eq!(c.stop.max_time, Some(5.0));
        assert_eq!(c.checkpoint_interval, Some(4));
    }

    #[test]
    fn test_synchronous_caps_rates() {
        assert_eq!(Dynamics::Synchronous.max_rate(), Some(1.0));
        assert_eq!(Dynamics::Stochastic.max_rate(), None);
    }
}
