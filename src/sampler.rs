//! Weighted selection over a small, fixed set of event types.
//!
//! A complete binary sum tree over `k` leaves. Updating one leaf
//! recomputes the sums on its path to the root from the children, so
//! floating-point error never accumulates across updates. Both update and
//! sampling are O(log k).

/// Sum tree over non-negative weights.
#[derive(Debug, Clone)]
pub struct SumTree {
    leaves: usize,
    /// `nodes[1]` is the root; leaf `i` lives at `nodes[capacity + i]`.
    nodes: Vec<f64>,
    capacity: usize,
    positive: usize,
}

impl SumTree {
    /// A tree with `k` leaves, all zero.
    pub fn new(k: usize) -> Self {
        let capacity = k.max(1).next_power_of_two();
        SumTree {
            leaves: k,
            nodes: vec![0.0; 2 * capacity],
            capacity,
            positive: 0,
        }
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        self.leaves
    }

    /// Whether the tree has no leaves.
    pub fn is_empty(&self) -> bool {
        self.leaves == 0
    }

    /// Weight of leaf `i`.
    pub fn get(&self, i: usize) -> f64 {
        if i < self.leaves {
            self.nodes[self.capacity + i]
        } else {
            0.0
        }
    }

    /// Set the weight of leaf `i`. Negative and non-finite weights are
    /// stored as zero; out-of-range indices are ignored.
    pub fn set(&mut self, i: usize, weight: f64) {
        if i >= self.leaves {
            return;
        }
        let weight = if weight.is_finite() && weight > 0.0 { weight } else { 0.0 };
        let mut pos = self.capacity + i;
        let old = self.nodes[pos];
        if old == weight {
            return;
        }
        match (old > 0.0, weight > 0.0) {
            (false, true) => self.positive += 1,
            (true, false) => self.positive -= 1,
            _ => {}
        }
        self.nodes[pos] = weight;
        while pos > 1 {
            pos /= 2;
            self.nodes[pos] = self.nodes[2 * pos] + self.nodes[2 * pos + 1];
        }
    }

    /// Sum of all weights.
    pub fn total(&self) -> f64 {
        self.nodes[1]
    }

    /// Whether any leaf has positive weight. Exact, unlike `total() > 0`.
    pub fn has_positive(&self) -> bool {
        self.positive > 0
    }

    /// Leaf selected by `u ∈ [0, total)`: leaf `i` is chosen for
    /// `u` in `[prefix(i), prefix(i) + weight(i))`. Zero-weight leaves are
    /// never returned; returns `None` only when every weight is zero.
    pub fn find(&self, u: f64) -> Option<usize> {
        if !self.has_positive() {
            return None;
        }
        let mut u = u.max(0.0);
        let mut pos = 1;
        while pos < self.capacity {
            let left = 2 * pos;
            let right = left + 1;
            if u < self.nodes[left] || self.nodes[right] <= 0.0 {
                pos = left;
            } else {
                u -= self.nodes[left];
                pos = right;
            }
        }
        Some(pos - self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_empty_tree_selects_nothing() {
        let tree = SumTree::new(3);
        assert_eq!(tree.total(), 0.0);
        assert!(!tree.has_positive());
        assert_eq!(tree.find(0.0), None);
    }

    #[test]
    fn test_find_respects_prefix_sums() {
        let mut tree = SumTree::new(3);
        tree.set(0, 1.0);
        tree.set(1, 2.0);
        tree.set(2, 3.0);
        assert_eq!(tree.total(), 6.0);
        assert_eq!(tree.find(0.5), Some(0));
        assert_eq!(tree.find(1.0), Some(1));
        assert_eq!(tree.find(2.9), Some(1));
        assert_eq!(tree.find(3.0), Some(2));
        assert_eq!(tree.find(5.999), Some(2));
    }

    #[test]
    fn test_zero_weight_leaf_never_selected() {
        let mut tree = SumTree::new(4);
        tree.set(0, 0.0);
        tree.set(1, 5.0);
        tree.set(2, 0.0);
        tree.set(3, 0.0);
        for u in [0.0, 1.0, 4.99, 5.0, 7.0] {
            assert_eq!(tree.find(u), Some(1));
        }
    }

    #[test]
    fn test_updates_do_not_drift() {
        let mut tree = SumTree::new(5);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..10_000 {
            let i = rng.gen_range(0..5);
            tree.set(i, rng.gen::<f64>() * 10.0);
        }
        for i in 0..5 {
            tree.set(i, 0.0);
        }
        assert_eq!(tree.total(), 0.0);
        assert!(!tree.has_positive());
    }

    #[test]
    fn test_invalid_weights_clamped() {
        let mut tree = SumTree::new(2);
        tree.set(0, -3.0);
        tree.set(1, f64::NAN);
        assert_eq!(tree.total(), 0.0);
        tree.set(7, 1.0);
        assert_eq!(tree.total(), 0.0);
    }

    #[test]
    fn test_selection_frequencies_track_weights() {
        let mut tree = SumTree::new(3);
        tree.set(0, 1.0);
        tree.set(1, 0.0);
        tree.set(2, 3.0);
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut hits = [0usize; 3];
        for _ in 0..40_000 {
            let u = rng.gen::<f64>() * tree.total();
            hits[tree.find(u).unwrap()] += 1;
        }
        assert_eq!(hits[1], 0);
        let ratio = hits[2] as f64 / hits[0] as f64;
        assert!((2.7..3.3).contains(&ratio), "ratio {}", ratio);
    }
}
