//! Simulation time.
//!
//! A non-negative, finite scalar advanced only by the engine's run loop.
//! Continuous-time dynamics advance it by exponential waiting times,
//! synchronous dynamics by whole timesteps.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// A point on the simulation clock.
///
/// Wraps an `f64` that is always finite, which makes the total order
/// below agree with the numeric one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimTime(f64);

impl SimTime {
    /// The zero-point of simulation time.
    pub const ZERO: SimTime = SimTime(0.0);

    /// Wrap a raw value. Returns `None` for NaN, infinities, and negatives.
    #[inline]
    pub fn new(t: f64) -> Option<Self> {
        if t.is_finite() && t >= 0.0 {
            Some(SimTime(t))
        } else {
            None
        }
    }

    /// Build from a whole timestep index.
    #[inline]
    pub fn from_steps(steps: u64) -> Self {
        SimTime(steps as f64)
    }

    /// Return the raw value.
    #[inline]
    pub fn as_f64(self) -> f64 {
        self.0
    }

    /// Advance time by `delta`. Non-finite or negative deltas leave the
    /// clock where it is, so time never runs backward.
    #[inline]
    pub fn advance(self, delta: f64) -> SimTime {
        let next = self.0 + delta;
        if next.is_finite() && next >= self.0 {
            SimTime(next)
        } else {
            self
        }
    }

    /// Returns `true` if `self` is strictly before `other`.
    #[inline]
    pub fn is_before(self, other: SimTime) -> bool {
        self.0 < other.0
    }

    /// Exact bit pattern, used for lossless export and hashing.
    #[inline]
    pub fn to_bits(self) -> u64 {
        self.0.to_bits()
    }

    /// Inverse of [`SimTime::to_bits`]; rejects bit patterns that are not valid times.
    #[inline]
    pub fn from_bits(bits: u64) -> Option<Self> {
        Self::new(f64::from_bits(bits))
    }
}

impl Eq for SimTime {}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Default for SimTime {
    fn default() -> Self {
        SimTime::ZERO
    }
}

impl std::fmt::Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t={}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero() {
        assert_eq!(SimTime::ZERO.as_f64(), 0.0);
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(SimTime::new(f64::NAN).is_none());
        assert!(SimTime::new(f64::INFINITY).is_none());
        assert!(SimTime::new(-1.0).is_none());
        assert!(SimTime::new(2.5).is_some());
    }

    #[test]
    fn test_ordering() {
        let t1 = SimTime::from_steps(1);
        let t2 = SimTime::new(1.5).unwrap();
        assert!(t1 < t2);
        assert!(t1.is_before(t2));
        assert!(!t2.is_before(t1));
    }

    #[test]
    fn test_advance_never_goes_backward() {
        let t = SimTime::from_steps(10);
        assert_eq!(t.advance(0.25).as_f64(), 10.25);
        assert_eq!(t.advance(-3.0), t);
        assert_eq!(t.advance(f64::NAN), t);
    }

    #[test]
    fn test_bits_are_exact() {
        let t = SimTime::new(0.1 + 0.2).unwrap();
        assert_eq!(SimTime::from_bits(t.to_bits()), Some(t));
        assert!(SimTime::from_bits(f64::NAN.to_bits()).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", SimTime::from_steps(42)), "t=42");
    }
}
