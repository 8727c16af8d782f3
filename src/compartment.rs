//! Compartment registry: the one place a node's compartment lives.
//!
//! Assignment happens once per node during the build phase. Afterwards
//! [`CompartmentRegistry::change`] is the only mutation, and it is
//! crate-private: effects reach it through
//! [`EffectContext::change_compartment`](crate::engine::EffectContext::change_compartment),
//! which fans the change out to the locus index.

use std::collections::HashMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::eventlog::hash_combine;
use crate::graph::NodeId;

/// Tolerance when checking that initial probabilities sum to one.
pub const DISTRIBUTION_TOLERANCE: f64 = 1e-9;

/// Dense handle for a declared compartment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompartmentId(usize);

impl CompartmentId {
    /// Return the underlying index.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for CompartmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "C{}", self.0)
    }
}

/// A declared compartment and its initial-occupancy probability.
#[derive(Debug, Clone, PartialEq)]
pub struct Compartment {
    pub label: String,
    pub initial_probability: f64,
}

/// Compartment declarations plus the node → compartment assignment.
#[derive(Debug, Clone, Default)]
pub struct CompartmentRegistry {
    compartments: Vec<Compartment>,
    by_label: HashMap<String, CompartmentId>,
    assignment: HashMap<NodeId, CompartmentId>,
    counts: Vec<usize>,
}

impl CompartmentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a compartment.
    pub fn declare(&mut self, label: &str, initial_probability: f64) -> EngineResult<CompartmentId> {
        if self.by_label.contains_key(label) {
            return Err(EngineError::DuplicateCompartment { label: label.to_string() });
        }
        if !(0.0..=1.0).contains(&initial_probability) {
            return Err(EngineError::InvalidProbability {
                label: label.to_string(),
                probability: initial_probability,
            });
        }
        let id = CompartmentId(self.compartments.len());
        self.compartments.push(Compartment {
            label: label.to_string(),
            initial_probability,
        });
        self.by_label.insert(label.to_string(), id);
        self.counts.push(0);
        Ok(id)
    }

    /// Resolve a label.
    pub fn lookup(&self, label: &str) -> EngineResult<CompartmentId> {
        self.by_label
            .get(label)
            .copied()
            .ok_or_else(|| EngineError::UnknownCompartment(label.to_string()))
    }

    /// Declaration of `id`, if it exists.
    pub fn compartment(&self, id: CompartmentId) -> Option<&Compartment> {
        self.compartments.get(id.0)
    }

    /// Label of `id`, or `"?"` for ids from another registry.
    pub fn label(&self, id: CompartmentId) -> &str {
        self.compartments.get(id.0).map_or("?", |c| c.label.as_str())
    }

    /// Number of declared compartments.
    pub fn len(&self) -> usize {
        self.compartments.len()
    }

    /// Whether no compartments are declared.
    pub fn is_empty(&self) -> bool {
        self.compartments.is_empty()
    }

    /// Check that the initial probabilities form a distribution.
    pub fn validate_distribution(&self) -> EngineResult<()> {
        let sum: f64 = self.compartments.iter().map(|c| c.initial_probability).sum();
        if (sum - 1.0).abs() > DISTRIBUTION_TOLERANCE {
            return Err(EngineError::InvalidDistribution { sum });
        }
        Ok(())
    }

    /// Draw a compartment from the initial distribution.
    ///
    /// Compartments with probability zero are never drawn; rounding
    /// shortfall at the top end falls to the last compartment with
    /// positive probability.
    pub fn draw_initial<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<CompartmentId> {
        let u = rng.gen::<f64>();
        let mut cumulative = 0.0;
        let mut last_positive = None;
        for (i, c) in self.compartments.iter().enumerate() {
            if c.initial_probability <= 0.0 {
                continue;
            }
            last_positive = Some(CompartmentId(i));
            cumulative += c.initial_probability;
            if u < cumulative {
                return last_positive;
            }
        }
        last_positive
    }

    /// Give `node` its initial compartment.
    pub fn assign(&mut self, node: NodeId, compartment: CompartmentId) -> EngineResult<()> {
        self.check(compartment)?;
        if self.assignment.contains_key(&node) {
            return Err(EngineError::DuplicateAssignment { node });
        }
        self.assignment.insert(node, compartment);
        self.counts[compartment.0] += 1;
        Ok(())
    }

    /// Whether `node` has a compartment.
    pub fn is_assigned(&self, node: NodeId) -> bool {
        self.assignment.contains_key(&node)
    }

    /// Current compartment of `node`.
    pub fn get(&self, node: NodeId) -> EngineResult<CompartmentId> {
        self.assignment
            .get(&node)
            .copied()
            .ok_or(EngineError::UninitializedNode { node })
    }

    /// Move `node` to `compartment`, returning where it was.
    ///
    /// Callers are responsible for fanning the change out to the locus
    /// index; see `NetworkState::change_compartment`.
    pub(crate) fn change(
        &mut self,
        node: NodeId,
        compartment: CompartmentId,
    ) -> EngineResult<CompartmentId> {
        self.check(compartment)?;
        let slot = self
            .assignment
            .get_mut(&node)
            .ok_or(EngineError::UninitializedNode { node })?;
        let previous = std::mem::replace(slot, compartment);
        self.counts[previous.0] -= 1;
        self.counts[compartment.0] += 1;
        Ok(previous)
    }

    /// Number of nodes currently in `compartment`.
    pub fn count(&self, compartment: CompartmentId) -> usize {
        self.counts.get(compartment.0).copied().unwrap_or(0)
    }

    /// `(label, count)` for every compartment, in declaration order.
    pub fn counts(&self) -> Vec<(String, usize)> {
        self.compartments
            .iter()
            .zip(&self.counts)
            .map(|(c, n)| (c.label.clone(), *n))
            .collect()
    }

    /// Deterministic hash of the assignment, independent of map order.
    pub fn state_hash(&self) -> u64 {
        let mut entries: Vec<(u64, usize)> = self
            .assignment
            .iter()
            .map(|(n, c)| (n.raw(), c.0))
            .collect();
        entries.sort_unstable();
        entries
            .into_iter()
            .fold(0u64, |h, (n, c)| hash_combine(hash_combine(h, n), c as u64))
    }

    fn check(&self, compartment: CompartmentId) -> EngineResult<()> {
        if compartment.0 < self.compartments.len() {
            Ok(())
        } else {
            Err(EngineError::UnknownCompartment(compartment.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn sir() -> (CompartmentRegistry, CompartmentId, CompartmentId, CompartmentId) {
        let mut reg = CompartmentRegistry::new();
        let s = reg.declare("S", 0.9).unwrap();
        let i = reg.declare("I", 0.1).unwrap();
        let r = reg.declare("R", 0.0).unwrap();
        (reg, s, i, r)
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let (mut reg, ..) = sir();
        assert_eq!(
            reg.declare("S", 0.0),
            Err(EngineError::DuplicateCompartment { label: "S".into() })
        );
    }

    #[test]
    fn test_probability_range_checked() {
        let mut reg = CompartmentRegistry::new();
        assert!(matches!(
            reg.declare("X", 1.5),
            Err(EngineError::InvalidProbability { .. })
        ));
        assert!(matches!(
            reg.declare("Y", -0.1),
            Err(EngineError::InvalidProbability { .. })
        ));
    }

    #[test]
    fn test_distribution_must_sum_to_one() {
        let (reg, ..) = sir();
        assert!(reg.validate_distribution().is_ok());

        let mut bad = CompartmentRegistry::new();
        bad.declare("A", 0.5).unwrap();
        bad.declare("B", 0.4).unwrap();
        assert!(matches!(
            bad.validate_distribution(),
            Err(EngineError::InvalidDistribution { .. })
        ));
    }

    #[test]
    fn test_assign_get_change() {
        let (mut reg, s, i, r) = sir();
        let n = NodeId::new(3);

        assert_eq!(reg.get(n), Err(EngineError::UninitializedNode { node: n }));
        reg.assign(n, s).unwrap();
        assert_eq!(reg.assign(n, i), Err(EngineError::DuplicateAssignment { node: n }));
        assert_eq!(reg.get(n), Ok(s));

        assert_eq!(reg.change(n, i), Ok(s));
        assert_eq!(reg.change(n, r), Ok(i));
        assert_eq!(reg.get(n), Ok(r));
        assert_eq!(reg.count(s), 0);
        assert_eq!(reg.count(r), 1);
    }

    #[test]
    fn test_change_uninitialized_fails() {
        let (mut reg, s, ..) = sir();
        let n = NodeId::new(0);
        assert_eq!(reg.change(n, s), Err(EngineError::UninitializedNode { node: n }));
    }

    #[test]
    fn test_draw_initial_skips_zero_probability() {
        let (reg, _, _, r) = sir();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..1_000 {
            assert_ne!(reg.draw_initial(&mut rng), Some(r));
        }
    }

    #[test]
    fn test_state_hash_tracks_assignment() {
        let (mut a, s, i, _) = sir();
        let (mut b, ..) = sir();
        a.assign(NodeId::new(0), s).unwrap();
        a.assign(NodeId::new(1), i).unwrap();
        b.assign(NodeId::new(1), i).unwrap();
        b.assign(NodeId::new(0), s).unwrap();
        assert_eq!(a.state_hash(), b.state_hash());

        b.change(NodeId::new(0), i).unwrap();
        assert_ne!(a.state_hash(), b.state_hash());
    }

    #[test]
    fn test_counts_in_declaration_order() {
        let (mut reg, s, i, _) = sir();
        reg.assign(NodeId::new(0), s).unwrap();
        reg.assign(NodeId::new(1), s).unwrap();
        reg.assign(NodeId::new(2), i).unwrap();
        assert_eq!(
            reg.counts(),
            vec![("S".into(), 2), ("I".into(), 1), ("R".into(), 0)]
        );
    }
}
