use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::routing::TaskComplexity;
use crate::Result;

/// Default seed for session bucketing
pub const CANARY_HASH_SEED: u64 = 0x3a11_ab1e_5e55_1015;

/// Canary rollout settings.
///
/// Loaded from the `[canary]` section of the configuration file and
/// replaceable at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanaryConfig {
    /// A disabled canary routes nothing
    pub enabled: bool,
    /// Share of sessions eligible for the candidate, in [0, 100]
    pub traffic_percent: f64,
    /// Minimum rolling rate of requests where both results are schema-valid
    pub min_schema_validity: f64,
    /// Minimum rolling rate of intent agreement
    pub min_intent_agreement: f64,
    /// Largest tolerated latency increase (candidate - primary)
    pub max_latency_increase_ms: f64,
    /// Complexity levels the candidate may serve
    pub allowed_complexity: Vec<TaskComplexity>,
    /// Number of recent comparisons the rolling gates look at
    pub evaluation_window: usize,
    /// Seed for session bucketing; changing it reshuffles sessions
    pub hash_seed: u64,
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            traffic_percent: 5.0,
            min_schema_validity: 0.98,
            min_intent_agreement: 0.90,
            max_latency_increase_ms: 250.0,
            allowed_complexity: vec![TaskComplexity::Simple, TaskComplexity::Medium],
            evaluation_window: 200,
            hash_seed: CANARY_HASH_SEED,
        }
    }
}

impl CanaryConfig {
    /// Traffic share actually applied; a disabled canary is 0%
    pub fn effective_percent(&self) -> f64 {
        if self.enabled {
            self.traffic_percent
        } else {
            0.0
        }
    }

    pub fn allows(&self, complexity: TaskComplexity) -> bool {
        self.allowed_complexity.contains(&complexity)
    }

    pub fn validate(&self) -> Result<()> {
        let rate = |name: &str, v: f64| -> Result<()> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(Error::ConfigError(format!("canary.{} must be in [0, 1], got {}", name, v)))
            }
        };
        if !(0.0..=100.0).contains(&self.traffic_percent) {
            return Err(Error::ConfigError(format!(
                "canary.traffic_percent must be in [0, 100], got {}",
                self.traffic_percent
            )));
        }
        rate("min_schema_validity", self.min_schema_validity)?;
        rate("min_intent_agreement", self.min_intent_agreement)?;
        if !self.max_latency_increase_ms.is_finite() {
            return Err(Error::ConfigError(
                "canary.max_latency_increase_ms must be finite".into(),
            ));
        }
        if self.evaluation_window == 0 {
            return Err(Error::ConfigError(
                "canary.evaluation_window must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        CanaryConfig::default().validate().unwrap();
    }

    #[test]
    fn test_disabled_is_zero_percent() {
        let config = CanaryConfig {
            enabled: false,
            traffic_percent: 50.0,
            ..Default::default()
        };
        assert_eq!(config.effective_percent(), 0.0);
    }

    #[test]
    fn test_validation() {
        let bad = [
            CanaryConfig {
                traffic_percent: 120.0,
                ..Default::default()
            },
            CanaryConfig {
                min_intent_agreement: 1.5,
                ..Default::default()
            },
            CanaryConfig {
                evaluation_window: 0,
                ..Default::default()
            },
            CanaryConfig {
                traffic_percent: f64::NAN,
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(Error::ConfigError(_))));
        }
    }

    #[test]
    fn test_toml_section() {
        let config: CanaryConfig = toml::from_str(
            r#"
            traffic_percent = 10.0
            allowed_complexity = ["simple", "complex"]
            "#,
        )
        .unwrap();
        assert_eq!(config.traffic_percent, 10.0);
        assert!(config.allows(TaskComplexity::Complex));
        assert!(!config.allows(TaskComplexity::Medium));
        assert_eq!(config.evaluation_window, 200);
    }
}
