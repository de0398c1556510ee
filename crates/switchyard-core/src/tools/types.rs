//! Types for per-intent tool selection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Beta posterior and usage counters for one (intent, tool) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToolStats {
    /// Beta distribution alpha parameter
    pub alpha: f64,
    /// Beta distribution beta parameter
    pub beta: f64,
    /// Total number of updates
    pub pulls: u64,
    /// Sum of clamped rewards
    pub reward_sum: f64,
}

impl Default for ToolStats {
    fn default() -> Self {
        // Uninformed prior (Beta(1,1) = uniform distribution)
        Self {
            alpha: 1.0,
            beta: 1.0,
            pulls: 0,
            reward_sum: 0.0,
        }
    }
}

impl ToolStats {
    /// Apply a clamped reward
    pub fn observe(&mut self, reward: f64) {
        self.alpha += reward;
        self.beta += 1.0 - reward;
        self.pulls += 1;
        self.reward_sum += reward;
    }

    /// Mean of the Beta posterior
    pub fn expected_value(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Standard deviation of the Beta posterior
    pub fn uncertainty(&self) -> f64 {
        let ab = self.alpha + self.beta;
        ((self.alpha * self.beta) / (ab * ab * (ab + 1.0))).sqrt()
    }

    /// Mean observed reward, or the prior mean if never used
    pub fn mean_reward(&self) -> f64 {
        if self.pulls == 0 {
            return 0.5;
        }
        self.reward_sum / self.pulls as f64
    }
}

/// Result of a tool selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSelection {
    pub tool: String,
    /// Beta sample that won the draw
    pub sampled_value: f64,
    /// Posterior mean of the selected tool
    pub expected_value: f64,
    /// Posterior standard deviation of the selected tool
    pub uncertainty: f64,
    /// True when the winner is not the tool with the highest posterior mean
    pub is_exploration: bool,
}

/// Persisted state of a tool bandit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSnapshot {
    /// intent → tool → posterior
    pub intents: BTreeMap<String, BTreeMap<String, ToolStats>>,
    pub total_updates: u64,
    pub taken_at: DateTime<Utc>,
}
