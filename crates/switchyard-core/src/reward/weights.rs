//! Reward weights and named presets

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::Error;
use crate::Result;

/// Named weight sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardPreset {
    #[default]
    Default,
    SpeedOptimized,
    CostOptimized,
    QualityOptimized,
}

impl RewardPreset {
    pub const ALL: [RewardPreset; 4] = [
        Self::Default,
        Self::SpeedOptimized,
        Self::CostOptimized,
        Self::QualityOptimized,
    ];

    pub fn weights(self) -> RewardWeights {
        match self {
            Self::Default => RewardWeights::default(),
            Self::SpeedOptimized => RewardWeights {
                success: 1.0,
                tool_correct: 0.3,
                latency: 0.4,
                cost: 0.2,
                cache_hit: 0.3,
                policy_violation: 1.0,
            },
            Self::CostOptimized => RewardWeights {
                success: 1.0,
                tool_correct: 0.3,
                latency: 0.05,
                cost: 1.5,
                cache_hit: 0.4,
                policy_violation: 1.0,
            },
            Self::QualityOptimized => RewardWeights {
                success: 1.5,
                tool_correct: 1.0,
                latency: 0.02,
                cost: 0.1,
                cache_hit: 0.05,
                policy_violation: 2.0,
            },
        }
    }
}

impl std::fmt::Display for RewardPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::SpeedOptimized => write!(f, "speed_optimized"),
            Self::CostOptimized => write!(f, "cost_optimized"),
            Self::QualityOptimized => write!(f, "quality_optimized"),
        }
    }
}

impl std::str::FromStr for RewardPreset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "default" => Ok(Self::Default),
            "speed_optimized" | "speed" => Ok(Self::SpeedOptimized),
            "cost_optimized" | "cost" => Ok(Self::CostOptimized),
            "quality_optimized" | "quality" => Ok(Self::QualityOptimized),
            _ => Err(Error::UnknownPreset(s.to_string())),
        }
    }
}

/// Weight magnitudes for each outcome signal.
///
/// `success`, `tool_correct` and `cache_hit` add to the reward; `latency`
/// (per second), `cost` (per unit) and `policy_violation` subtract from it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardWeights {
    pub success: f64,
    pub tool_correct: f64,
    pub latency: f64,
    pub cost: f64,
    pub cache_hit: f64,
    pub policy_violation: f64,
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self {
            success: 1.0,
            tool_correct: 0.5,
            latency: 0.1,
            cost: 0.5,
            cache_hit: 0.2,
            policy_violation: 1.0,
        }
    }
}

impl RewardWeights {
    /// Weights for a preset name
    pub fn preset(name: &str) -> Result<Self> {
        Ok(name.parse::<RewardPreset>()?.weights())
    }

    /// Default weights overridden by a custom map.
    ///
    /// Unknown keys and non-finite values are ignored; missing keys keep
    /// their default.
    pub fn from_map(map: &BTreeMap<String, f64>) -> Self {
        let mut weights = Self::default();
        for (key, value) in map {
            if !value.is_finite() {
                warn!(key = %key, "Ignoring non-finite reward weight");
                continue;
            }
            let slot = match key.as_str() {
                "success" => &mut weights.success,
                "tool_correct" => &mut weights.tool_correct,
                "latency" => &mut weights.latency,
                "cost" => &mut weights.cost,
                "cache_hit" => &mut weights.cache_hit,
                "policy_violation" => &mut weights.policy_violation,
                _ => {
                    warn!(key = %key, "Ignoring unknown reward weight");
                    continue;
                }
            };
            *slot = *value;
        }
        weights
    }
}
