//! Scalar reward from a request outcome
//!
//! Both bandits learn from the same reward. The computation is a pure
//! function of the outcome and the weights so offline replay of archived
//! episodes reproduces exactly what the online learner saw.

mod outcome;
mod weights;

pub use outcome::Outcome;
pub use weights::{RewardPreset, RewardWeights};

pub(crate) use outcome::{coerce_bool, coerce_f64};

use crate::Result;

/// Weighted sum of outcome signals.
///
/// Not clamped; the bandits clamp to `[0, 1]` on update.
pub fn reward(outcome: &Outcome, weights: &RewardWeights) -> f64 {
    let flag = |b: bool| if b { 1.0 } else { 0.0 };
    let value = weights.success * flag(outcome.success)
        + weights.tool_correct * flag(outcome.tool_correct)
        + weights.cache_hit * flag(outcome.cache_hit)
        - weights.latency * outcome.latency_seconds()
        - weights.cost * outcome.cost
        - weights.policy_violation * flag(outcome.policy_violation);
    if value.is_finite() { value } else { 0.0 }
}

/// Reward function bound to a weight set
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RewardCalculator {
    weights: RewardWeights,
}

impl RewardCalculator {
    pub fn new(weights: RewardWeights) -> Self {
        Self { weights }
    }

    /// Calculator for a named preset
    pub fn from_preset(name: &str) -> Result<Self> {
        Ok(Self::new(RewardWeights::preset(name)?))
    }

    pub fn weights(&self) -> &RewardWeights {
        &self.weights
    }

    pub fn compute(&self, outcome: &Outcome) -> f64 {
        reward(outcome, &self.weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights() {
        let outcome = Outcome {
            success: true,
            tool_correct: true,
            latency_ms: 2000.0,
            cost: 0.1,
            cache_hit: false,
            policy_violation: false,
        };
        // 1.0 + 0.5 - 0.1 * 2 - 0.5 * 0.1
        assert!((reward(&outcome, &RewardWeights::default()) - 1.25).abs() < 1e-12);
    }

    #[test]
    fn test_violation_dominates() {
        let outcome = Outcome {
            success: true,
            policy_violation: true,
            ..Default::default()
        };
        let calc = RewardCalculator::from_preset("quality_optimized").unwrap();
        assert!(calc.compute(&outcome) < 0.0);
    }

    #[test]
    fn test_neutral_outcome_is_zero() {
        for preset in RewardPreset::ALL {
            assert_eq!(reward(&Outcome::default(), &preset.weights()), 0.0);
        }
    }

    #[test]
    fn test_deterministic() {
        let outcome = Outcome {
            success: true,
            latency_ms: 812.0,
            cost: 0.0031,
            cache_hit: true,
            ..Default::default()
        };
        let calc = RewardCalculator::from_preset("speed_optimized").unwrap();
        assert_eq!(calc.compute(&outcome).to_bits(), calc.compute(&outcome).to_bits());
    }

    #[test]
    fn test_speed_preset_penalizes_latency_more() {
        let slow = Outcome {
            success: true,
            latency_ms: 5000.0,
            ..Default::default()
        };
        let default = RewardCalculator::default().compute(&slow);
        let speed = RewardCalculator::from_preset("speed_optimized")
            .unwrap()
            .compute(&slow);
        assert!(speed < default);
    }
}
