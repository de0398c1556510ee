//! Types for contextual tier routing
//!
//! This module defines the configuration, decision and persistence types used
//! by the LinUCB routing bandit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::features::{FeatureEncoder, FeatureSchema};
use crate::storage::codec::f64_base64;

/// Default processing tiers, in tie-break order
pub const DEFAULT_ARMS: &[&str] = &["fast", "planner", "deep"];

/// Classification of request complexity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskComplexity {
    /// Lookups, greetings, single-step answers
    Simple,
    /// Typical single-tool requests
    Medium,
    /// Multi-step requests that need planning
    Complex,
    /// Long-horizon or high-risk requests
    Expert,
}

impl TaskComplexity {
    /// Best-effort parse that never fails; unknown values read as `Medium`
    pub fn coerce(value: Option<&str>) -> Self {
        value
            .and_then(|v| v.parse().ok())
            .unwrap_or(Self::Medium)
    }
}

impl std::fmt::Display for TaskComplexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simple => write!(f, "simple"),
            Self::Medium => write!(f, "medium"),
            Self::Complex => write!(f, "complex"),
            Self::Expert => write!(f, "expert"),
        }
    }
}

impl std::str::FromStr for TaskComplexity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "simple" | "low" => Ok(Self::Simple),
            "medium" => Ok(Self::Medium),
            "complex" | "high" => Ok(Self::Complex),
            "expert" => Ok(Self::Expert),
            _ => Err(format!("Unknown complexity level: {}", s)),
        }
    }
}

/// Parameters for a routing bandit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingBanditConfig {
    /// Arm names in tie-break order
    pub arms: Vec<String>,
    /// Feature vector dimension
    pub dim: usize,
    /// Exploration strength
    pub alpha: f64,
    /// L2 regularization; every arm starts with `A = λI`
    pub lambda: f64,
}

impl Default for RoutingBanditConfig {
    fn default() -> Self {
        Self {
            arms: DEFAULT_ARMS.iter().map(|a| a.to_string()).collect(),
            dim: FeatureSchema::default().dimension(),
            alpha: 1.0,
            lambda: 1.0,
        }
    }
}

impl RoutingBanditConfig {
    pub fn new(arms: impl IntoIterator<Item = impl Into<String>>, dim: usize) -> Self {
        Self {
            arms: arms.into_iter().map(Into::into).collect(),
            dim,
            ..Default::default()
        }
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.lambda = lambda;
        self
    }
}

/// Score breakdown for one arm in a decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmScore {
    pub arm: String,
    /// Predicted reward `θ·x`
    pub value: f64,
    /// Exploration bonus `α·√(xᵀA⁻¹x)`
    pub bonus: f64,
    /// `value + bonus`
    pub ucb: f64,
}

/// Outcome of a routing decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingChoice {
    /// Selected arm
    pub arm: String,
    /// Position of the arm in the configured order
    pub index: usize,
    /// Scores for every arm, in configured order
    pub scores: Vec<ArmScore>,
    /// True when the chosen arm is not the one with the best predicted value
    pub is_exploration: bool,
}

/// Per-arm summary statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmStats {
    pub arm: String,
    pub pulls: u64,
    pub reward_sum: f64,
}

impl ArmStats {
    pub fn mean_reward(&self) -> f64 {
        if self.pulls == 0 {
            0.0
        } else {
            self.reward_sum / self.pulls as f64
        }
    }
}

/// Result of a batch fit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    /// Arms solved from data
    pub trained: Vec<String>,
    /// Arms with fewer than two samples, reset to the prior
    pub zero_initialized: Vec<String>,
    /// Samples whose arm label is not configured
    pub skipped_samples: usize,
}

/// Persisted state of one arm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmSnapshot {
    pub arm: String,
    pub pulls: u64,
    pub reward_sum: f64,
    /// Row-major `dim × dim` design matrix
    #[serde(with = "f64_base64")]
    pub a: Vec<f64>,
    #[serde(with = "f64_base64")]
    pub b: Vec<f64>,
}

/// Persisted state of a routing bandit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingSnapshot {
    pub dim: usize,
    pub alpha: f64,
    pub lambda: f64,
    /// Arm order at the time of the snapshot
    pub arms: Vec<String>,
    pub states: Vec<ArmSnapshot>,
    pub total_updates: u64,
    pub taken_at: DateTime<Utc>,
    /// Schema fingerprint of the encoder the state was trained with
    #[serde(default)]
    pub feature_fingerprint: Option<String>,
    /// Fitted encoder, so replicas transform identically
    #[serde(default)]
    pub encoder: Option<FeatureEncoder>,
}

impl RoutingSnapshot {
    /// Attach the encoder the state was trained against
    pub fn with_encoder(mut self, encoder: &FeatureEncoder) -> Self {
        self.feature_fingerprint = Some(encoder.fingerprint());
        self.encoder = Some(encoder.clone());
        self
    }
}
