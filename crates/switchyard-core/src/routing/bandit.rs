//! LinUCB contextual bandit for processing-tier selection
//!
//! Each arm keeps a ridge-regression estimate of reward as a linear function
//! of the request's feature vector, plus a confidence ellipsoid around it.
//!
//! ## Algorithm Overview
//!
//! 1. Every arm starts with `A = λI`, `b = 0`
//! 2. For a context `x`, each arm scores `θ·x + α·√(xᵀA⁻¹x)` with `θ = A⁻¹b`
//! 3. The highest score wins; ties go to the earlier arm in the configured order
//! 4. Observe reward `r ∈ [0, 1]` and update: `A += x xᵀ`, `b += r x`
//!
//! Arms with little data have wide confidence bounds, so a larger `α` sends
//! more traffic to them.
//!
//! ## Concurrency
//!
//! `choose` takes the read lock just long enough to clone the per-arm inverse
//! and accumulator, then scores without holding it. `update` takes the write
//! lock, so a decision never sees a half-applied update.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use super::linalg::{add_outer, dot, invert_or_pinv, mat_vec, scaled_identity};
use super::types::{
    ArmScore, ArmSnapshot, ArmStats, FitReport, RoutingBanditConfig, RoutingChoice,
    RoutingSnapshot,
};
use crate::error::Error;
use crate::features::FeatureVector;
use crate::Result;

#[derive(Debug, Clone)]
struct ArmState {
    a: Vec<f64>,
    a_inv: Vec<f64>,
    b: Vec<f64>,
    pulls: u64,
    reward_sum: f64,
    /// False while `a_inv` is a pseudo-inverse
    inverse_exact: bool,
}

impl ArmState {
    fn prior(dim: usize, lambda: f64) -> Self {
        Self::from_parts("", dim, scaled_identity(dim, lambda), vec![0.0; dim], 0, 0.0)
    }

    fn from_parts(
        arm: &str,
        dim: usize,
        a: Vec<f64>,
        b: Vec<f64>,
        pulls: u64,
        reward_sum: f64,
    ) -> Self {
        let (a_inv, fallback) = invert_or_pinv(&a, dim);
        if fallback {
            warn!(arm, pulls, "Arm design matrix is not positive-definite");
        }
        Self {
            a,
            a_inv,
            b,
            pulls,
            reward_sum,
            inverse_exact: !fallback,
        }
    }

    fn observe(&mut self, dim: usize, x: &[f64], reward: f64) {
        add_outer(&mut self.a, dim, x);
        for (bi, xi) in self.b.iter_mut().zip(x.iter()) {
            *bi += reward * xi;
        }
        self.pulls += 1;
        self.reward_sum += reward;

        // Always derived from `a` alone, so a restored arm scores bit-for-bit
        // like the live one.
        let (a_inv, fallback) = invert_or_pinv(&self.a, dim);
        if fallback && self.inverse_exact {
            warn!(pulls = self.pulls, "Arm design matrix is not positive-definite");
        }
        self.a_inv = a_inv;
        self.inverse_exact = !fallback;
    }

    fn theta(&self, dim: usize) -> Vec<f64> {
        mat_vec(&self.a_inv, dim, &self.b)
    }
}

/// Contextual bandit choosing a processing tier per request
#[derive(Debug)]
pub struct RoutingBandit {
    arms: Vec<String>,
    dim: usize,
    lambda: f64,
    alpha_bits: AtomicU64,
    state: RwLock<Vec<ArmState>>,
    total_updates: AtomicU64,
}

impl RoutingBandit {
    /// Create a bandit with every arm at its prior
    pub fn new(config: RoutingBanditConfig) -> Result<Self> {
        validate_config(&config)?;
        let state = config
            .arms
            .iter()
            .map(|_| ArmState::prior(config.dim, config.lambda))
            .collect();
        Ok(Self {
            arms: config.arms,
            dim: config.dim,
            lambda: config.lambda,
            alpha_bits: AtomicU64::new(config.alpha.to_bits()),
            state: RwLock::new(state),
            total_updates: AtomicU64::new(0),
        })
    }

    /// Rebuild a bandit exactly as it was when the snapshot was taken
    pub fn from_snapshot(snapshot: &RoutingSnapshot) -> Result<Self> {
        let config = RoutingBanditConfig {
            arms: snapshot.arms.clone(),
            dim: snapshot.dim,
            alpha: snapshot.alpha,
            lambda: snapshot.lambda,
        };
        let bandit = Self::new(config)?;
        bandit.restore(snapshot)?;
        Ok(bandit)
    }

    pub fn arms(&self) -> &[String] {
        &self.arms
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn alpha(&self) -> f64 {
        f64::from_bits(self.alpha_bits.load(Ordering::Relaxed))
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Updates applied since construction or the last restore
    pub fn total_updates(&self) -> u64 {
        self.total_updates.load(Ordering::Relaxed)
    }

    /// Change exploration strength; takes effect on the next decision
    pub fn set_alpha(&self, alpha: f64) -> Result<()> {
        if !alpha.is_finite() || alpha < 0.0 {
            return Err(Error::InvalidInput(format!(
                "alpha must be a finite non-negative number, got {}",
                alpha
            )));
        }
        self.alpha_bits.store(alpha.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    fn index_of(&self, arm: &str) -> Option<usize> {
        self.arms.iter().position(|a| a == arm)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, Vec<ArmState>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, Vec<ArmState>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Coerce an input vector to the configured dimension with finite values
    fn sanitize(&self, x: &[f64]) -> FeatureVector {
        if x.len() != self.dim {
            warn!(
                expected = self.dim,
                actual = x.len(),
                "Feature vector length mismatch, padding/truncating"
            );
        }
        let mut out = vec![0.0; self.dim];
        let mut non_finite = 0usize;
        for (slot, v) in out.iter_mut().zip(x.iter()) {
            if v.is_finite() {
                *slot = *v;
            } else {
                non_finite += 1;
            }
        }
        if non_finite > 0 {
            warn!(count = non_finite, "Replaced non-finite feature values with 0");
        }
        out
    }

    /// Pick an arm for context `x`. Always returns an arm.
    pub fn choose(&self, x: &[f64]) -> RoutingChoice {
        let x = self.sanitize(x);
        let alpha = self.alpha();

        let copies: Vec<(Vec<f64>, Vec<f64>)> = {
            let state = self.read_state();
            state.iter().map(|s| (s.a_inv.clone(), s.b.clone())).collect()
        };

        let scores: Vec<ArmScore> = self
            .arms
            .iter()
            .zip(copies.iter())
            .map(|(arm, (a_inv, b))| {
                let theta = mat_vec(a_inv, self.dim, b);
                let value = finite_or_zero(dot(&theta, &x));
                let variance = dot(&x, &mat_vec(a_inv, self.dim, &x)).max(0.0);
                let bonus = finite_or_zero(alpha * variance.sqrt());
                ArmScore {
                    arm: arm.clone(),
                    value,
                    bonus,
                    ucb: value + bonus,
                }
            })
            .collect();

        let best = first_max(scores.iter().map(|s| s.ucb));
        let greedy = first_max(scores.iter().map(|s| s.value));
        let choice = RoutingChoice {
            arm: self.arms[best].clone(),
            index: best,
            is_exploration: best != greedy,
            scores,
        };

        debug!(
            arm = %choice.arm,
            ucb = choice.scores[best].ucb,
            exploration = choice.is_exploration,
            "Routing decision"
        );
        choice
    }

    /// Record an observed reward. Returns false if the arm is unknown.
    pub fn update(&self, arm: &str, x: &[f64], reward: f64) -> bool {
        let Some(index) = self.index_of(arm) else {
            warn!(arm, "Ignoring update for unknown arm");
            return false;
        };
        let x = self.sanitize(x);
        let reward = clamp_reward(reward);

        let mut state = self.write_state();
        state[index].observe(self.dim, &x, reward);
        self.total_updates.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Predicted reward `θ·x` for one arm
    pub fn predict(&self, arm: &str, x: &[f64]) -> Option<f64> {
        let index = self.index_of(arm)?;
        let x = self.sanitize(x);
        let theta = {
            let state = self.read_state();
            state[index].theta(self.dim)
        };
        Some(finite_or_zero(dot(&theta, &x)))
    }

    /// Closed-form ridge solve per arm from historical samples.
    ///
    /// Replaces all arm state. Arms with fewer than two samples are reset to
    /// the prior.
    pub fn fit(&self, xs: &[FeatureVector], rewards: &[f64], arms: &[String]) -> Result<FitReport> {
        if xs.len() != rewards.len() || xs.len() != arms.len() {
            return Err(Error::InvalidInput(format!(
                "fit needs equal lengths, got {} vectors, {} rewards, {} arms",
                xs.len(),
                rewards.len(),
                arms.len()
            )));
        }

        let mut groups: Vec<Vec<usize>> = vec![Vec::new(); self.arms.len()];
        let mut report = FitReport::default();
        for (i, arm) in arms.iter().enumerate() {
            match self.index_of(arm) {
                Some(index) => groups[index].push(i),
                None => report.skipped_samples += 1,
            }
        }
        if report.skipped_samples > 0 {
            warn!(count = report.skipped_samples, "Skipped samples for unknown arms");
        }

        let mut fitted = Vec::with_capacity(self.arms.len());
        for (arm, samples) in self.arms.iter().zip(groups.iter()) {
            if samples.len() < 2 {
                warn!(arm = %arm, samples = samples.len(), "Too few samples, zero-initializing arm");
                report.zero_initialized.push(arm.clone());
                fitted.push(ArmState::prior(self.dim, self.lambda));
                continue;
            }

            let mut a = scaled_identity(self.dim, self.lambda);
            let mut b = vec![0.0; self.dim];
            let mut reward_sum = 0.0;
            for &i in samples {
                let x = self.sanitize(&xs[i]);
                let r = clamp_reward(rewards[i]);
                add_outer(&mut a, self.dim, &x);
                for (bj, xj) in b.iter_mut().zip(x.iter()) {
                    *bj += r * xj;
                }
                reward_sum += r;
            }
            report.trained.push(arm.clone());
            fitted.push(ArmState::from_parts(
                arm,
                self.dim,
                a,
                b,
                samples.len() as u64,
                reward_sum,
            ));
        }

        let total: u64 = fitted.iter().map(|s| s.pulls).sum();
        *self.write_state() = fitted;
        self.total_updates.store(total, Ordering::Relaxed);
        debug!(
            trained = report.trained.len(),
            zero_initialized = report.zero_initialized.len(),
            "Routing bandit fitted"
        );
        Ok(report)
    }

    /// Per-arm pull counts and cumulative reward, in arm order
    pub fn arm_stats(&self) -> Vec<ArmStats> {
        let state = self.read_state();
        self.arms
            .iter()
            .zip(state.iter())
            .map(|(arm, s)| ArmStats {
                arm: arm.clone(),
                pulls: s.pulls,
                reward_sum: s.reward_sum,
            })
            .collect()
    }

    /// Copy the full state for persistence
    pub fn snapshot(&self) -> RoutingSnapshot {
        let copies: Vec<ArmState> = self.read_state().clone();
        RoutingSnapshot {
            dim: self.dim,
            alpha: self.alpha(),
            lambda: self.lambda,
            arms: self.arms.clone(),
            states: self
                .arms
                .iter()
                .zip(copies)
                .map(|(arm, s)| ArmSnapshot {
                    arm: arm.clone(),
                    pulls: s.pulls,
                    reward_sum: s.reward_sum,
                    a: s.a,
                    b: s.b,
                })
                .collect(),
            total_updates: self.total_updates(),
            taken_at: Utc::now(),
            feature_fingerprint: None,
            encoder: None,
        }
    }

    /// Replace arm state from a snapshot.
    ///
    /// The snapshot must match this bandit's dimension. Configured arms missing
    /// from the snapshot start at the prior; extra snapshot arms are ignored.
    pub fn restore(&self, snapshot: &RoutingSnapshot) -> Result<()> {
        if snapshot.dim != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                actual: snapshot.dim,
            });
        }
        for s in &snapshot.states {
            if s.a.len() != self.dim * self.dim || s.b.len() != self.dim {
                return Err(Error::InvalidInput(format!(
                    "Arm '{}' state has {} matrix / {} vector entries, expected {} / {}",
                    s.arm,
                    s.a.len(),
                    s.b.len(),
                    self.dim * self.dim,
                    self.dim
                )));
            }
        }

        let mut restored = Vec::with_capacity(self.arms.len());
        for arm in &self.arms {
            match snapshot.states.iter().find(|s| &s.arm == arm) {
                Some(s) => restored.push(ArmState::from_parts(
                    arm,
                    self.dim,
                    s.a.clone(),
                    s.b.clone(),
                    s.pulls,
                    s.reward_sum,
                )),
                None => {
                    warn!(arm = %arm, "Arm missing from snapshot, starting from prior");
                    restored.push(ArmState::prior(self.dim, self.lambda));
                }
            }
        }
        for s in &snapshot.states {
            if self.index_of(&s.arm).is_none() {
                warn!(arm = %s.arm, "Ignoring snapshot state for unconfigured arm");
            }
        }

        *self.write_state() = restored;
        self.total_updates
            .store(snapshot.total_updates, Ordering::Relaxed);
        Ok(())
    }
}

fn validate_config(config: &RoutingBanditConfig) -> Result<()> {
    if config.arms.is_empty() {
        return Err(Error::InvalidInput("routing bandit needs at least one arm".into()));
    }
    for (i, arm) in config.arms.iter().enumerate() {
        if arm.trim().is_empty() {
            return Err(Error::InvalidInput("arm names must not be empty".into()));
        }
        if config.arms[..i].contains(arm) {
            return Err(Error::InvalidInput(format!("duplicate arm '{}'", arm)));
        }
    }
    if config.dim == 0 {
        return Err(Error::InvalidInput("feature dimension must be positive".into()));
    }
    if !config.alpha.is_finite() || config.alpha < 0.0 {
        return Err(Error::InvalidInput(format!("invalid alpha {}", config.alpha)));
    }
    if !config.lambda.is_finite() || config.lambda < 0.0 {
        return Err(Error::InvalidInput(format!("invalid lambda {}", config.lambda)));
    }
    Ok(())
}

fn clamp_reward(reward: f64) -> f64 {
    if reward.is_finite() {
        reward.clamp(0.0, 1.0)
    } else {
        warn!(reward, "Non-finite reward treated as 0");
        0.0
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

/// Index of the first maximum; later equal values never win
fn first_max(values: impl Iterator<Item = f64>) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (i, v) in values.enumerate() {
        if v > best_value {
            best = i;
            best_value = v;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn bandit(dim: usize) -> RoutingBandit {
        RoutingBandit::new(RoutingBanditConfig::new(["fast", "planner", "deep"], dim)).unwrap()
    }

    #[test]
    fn test_fresh_bandit_breaks_ties_by_order() {
        let bandit = bandit(4);
        let choice = bandit.choose(&[1.0, 0.5, 0.0, 0.0]);
        assert_eq!(choice.arm, "fast");
        assert_eq!(choice.index, 0);
        assert_eq!(choice.scores.len(), 3);
        assert!(!choice.is_exploration);
    }

    #[test]
    fn test_update_counts_and_clamps() {
        let bandit = bandit(3);
        let x = [1.0, 0.0, 0.0];
        for r in [1.5, 0.25, -0.2, 0.5] {
            assert!(bandit.update("planner", &x, r));
        }
        let stats = bandit.arm_stats();
        assert_eq!(stats[1].pulls, 4);
        assert!((stats[1].reward_sum - 1.75).abs() < 1e-12);
        assert_eq!(stats[0].pulls, 0);
        assert_eq!(bandit.total_updates(), 4);
    }

    #[test]
    fn test_unknown_arm_is_ignored() {
        let bandit = bandit(3);
        assert!(!bandit.update("turbo", &[1.0, 0.0, 0.0], 1.0));
        assert_eq!(bandit.total_updates(), 0);
        assert!(bandit.predict("turbo", &[1.0, 0.0, 0.0]).is_none());
    }

    #[test]
    fn test_prediction_converges() {
        let bandit = bandit(6);
        let x = [1.0, 0.0, 0.0, 0.0, 0.0, 0.0];

        let mut previous = 0.0;
        for _ in 0..3 {
            bandit.update("planner", &x, 1.0);
        }
        let after_three = bandit.predict("planner", &x).unwrap();
        assert!((after_three - 0.75).abs() < 1e-12);
        assert!(after_three > previous);
        previous = after_three;

        for _ in 0..97 {
            bandit.update("planner", &x, 1.0);
        }
        let after_hundred = bandit.predict("planner", &x).unwrap();
        assert!(after_hundred > previous);
        assert!((1.0 - after_hundred).abs() < 0.02);
    }

    #[test]
    fn test_wrong_length_and_nan_are_sanitized() {
        let bandit = bandit(4);
        bandit.update("deep", &[1.0, f64::NAN], 1.0);
        let choice = bandit.choose(&[1.0, f64::INFINITY, 0.0, 0.0, 9.0, 9.0]);
        assert!(choice.scores.iter().all(|s| s.ucb.is_finite()));
        assert_eq!(bandit.arm_stats()[2].pulls, 1);
    }

    #[test]
    fn test_alpha_changes_bonus() {
        let bandit = bandit(2);
        let x = [1.0, 0.0];
        let wide = bandit.choose(&x).scores[0].bonus;
        bandit.set_alpha(0.0).unwrap();
        assert_eq!(bandit.choose(&x).scores[0].bonus, 0.0);
        assert!(wide > 0.0);
        assert!(bandit.set_alpha(-1.0).is_err());
        assert!(bandit.set_alpha(f64::NAN).is_err());
    }

    #[test]
    fn test_fit_trains_and_zero_initializes() {
        let bandit = bandit(2);
        let xs = vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]];
        let rewards = vec![1.0, 1.0, 0.0, 0.5];
        let arms: Vec<String> = ["fast", "fast", "deep", "turbo"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let report = bandit.fit(&xs, &rewards, &arms).unwrap();
        assert_eq!(report.trained, vec!["fast"]);
        assert_eq!(report.zero_initialized, vec!["planner", "deep"]);
        assert_eq!(report.skipped_samples, 1);

        // ridge: A = I + 2 e1 e1ᵀ, b = 2 e1 → θ₀ = 2/3
        let predicted = bandit.predict("fast", &[1.0, 0.0]).unwrap();
        assert!((predicted - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(bandit.predict("deep", &[0.0, 1.0]), Some(0.0));
        assert_eq!(bandit.arm_stats()[2].pulls, 0);
    }

    #[test]
    fn test_fit_rejects_mismatched_lengths() {
        let bandit = bandit(2);
        let err = bandit
            .fit(&[vec![1.0, 0.0]], &[1.0, 0.0], &["fast".to_string()])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_snapshot_restore_is_bit_identical() {
        let bandit = bandit(3);
        bandit.update("fast", &[1.0, 0.3, -0.7], 0.9);
        bandit.update("deep", &[0.1, 1.0, 0.2], 0.1);
        bandit.update("fast", &[1.0, -0.3, 0.7], 0.4);

        let snapshot = bandit.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let decoded: RoutingSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, snapshot);

        let restored = RoutingBandit::from_snapshot(&decoded).unwrap();
        assert_eq!(restored.snapshot().states, snapshot.states);

        let x = [0.5, 0.5, 0.5];
        let before = bandit.choose(&x);
        let after = restored.choose(&x);
        assert_eq!(before.arm, after.arm);
        for (b, a) in before.scores.iter().zip(after.scores.iter()) {
            assert_eq!(b.ucb.to_bits(), a.ucb.to_bits());
        }
        assert_eq!(restored.total_updates(), 3);

        // both keep learning identically after the restore
        for (arm, reward) in [("deep", 0.8), ("fast", 0.2), ("planner", 0.6)] {
            bandit.update(arm, &[0.3, -0.2, 0.9], reward);
            restored.update(arm, &[0.3, -0.2, 0.9], reward);
        }
        for arm in ["fast", "planner", "deep"] {
            let live = bandit.predict(arm, &x).unwrap();
            let reloaded = restored.predict(arm, &x).unwrap();
            assert_eq!(live.to_bits(), reloaded.to_bits());
        }
    }

    #[test]
    fn test_restore_rejects_dimension_mismatch() {
        let small = bandit(2);
        let large = bandit(3);
        let err = large.restore(&small.snapshot()).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_singular_state_still_chooses() {
        let bandit =
            RoutingBandit::new(RoutingBanditConfig::new(["fast", "deep"], 2).with_lambda(0.0))
                .unwrap();
        let choice = bandit.choose(&[1.0, 1.0]);
        assert_eq!(choice.arm, "fast");

        bandit.update("deep", &[1.0, 0.0], 1.0);
        bandit.update("deep", &[1.0, 0.0], 1.0);
        // A = [[2,0],[0,0]] is singular; the pseudo-inverse still gives θ₀ = 1
        let predicted = bandit.predict("deep", &[1.0, 0.0]).unwrap();
        assert!((predicted - 1.0).abs() < 1e-9);
        assert_eq!(bandit.choose(&[1.0, 0.0]).arm, "deep");
    }

    #[test]
    fn test_invalid_config() {
        assert!(RoutingBandit::new(RoutingBanditConfig::new(Vec::<String>::new(), 2)).is_err());
        assert!(RoutingBandit::new(RoutingBanditConfig::new(["a", "a"], 2)).is_err());
        assert!(RoutingBandit::new(RoutingBanditConfig::new(["a"], 0)).is_err());
        assert!(RoutingBandit::new(RoutingBanditConfig::new(["a"], 2).with_alpha(f64::NAN)).is_err());
    }

    #[test]
    fn test_concurrent_choose_and_update() {
        let bandit = Arc::new(bandit(4));
        std::thread::scope(|scope| {
            for t in 0..4 {
                let bandit = Arc::clone(&bandit);
                scope.spawn(move || {
                    for i in 0..250 {
                        let x = [1.0, (i % 7) as f64 / 7.0, t as f64 / 4.0, 0.0];
                        let choice = bandit.choose(&x);
                        bandit.update(&choice.arm, &x, 0.5);
                    }
                });
            }
        });
        let pulls: u64 = bandit.arm_stats().iter().map(|s| s.pulls).sum();
        assert_eq!(pulls, 1000);
        assert_eq!(bandit.total_updates(), 1000);
    }
}
