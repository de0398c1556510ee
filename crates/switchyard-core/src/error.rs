//! Error types for Switchyard

use thiserror::Error;

/// Result type alias using Switchyard's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Switchyard error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Policy errors (E001-E099)
    #[error("Policy validation failed for '{component}': {message}")]
    PolicyValidation { component: String, message: String },

    #[error("No active policy package for stage '{0}'. Run `switchyard promote` first.")]
    PolicyNotFound(String),

    #[error("Policy package '{0}' is marked invalid. Fix the sub-policies or pass --force.")]
    InvalidPackage(String),

    #[error("Feature dimension mismatch: configured {expected}, snapshot has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    // Deployment errors (E100-E199)
    #[error("No rollback snapshot available for stage '{0}'")]
    NoRollbackSnapshot(String),

    #[error("Pre-flight health check failed: {0}. Use --force to promote anyway.")]
    PreflightFailed(String),

    #[error("Deployment to '{stage}' was unstable (stability {ratio:.2} < {floor:.2}); rolled back automatically")]
    UnstableDeployment { stage: String, ratio: f64, floor: f64 },

    #[error("Unknown deployment stage '{0}'. Valid stages: canary, prod.")]
    UnknownStage(String),

    // Decision errors (E200-E299)
    #[error("Unknown routing arm '{0}'")]
    UnknownArm(String),

    #[error("Unknown reward preset '{0}'. Valid presets: default, speed_optimized, cost_optimized, quality_optimized.")]
    UnknownPreset(String),

    // Canary errors (E300-E399)
    #[error("Primary policy evaluation failed: {0}")]
    EvaluationFailed(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Serialization / network / io
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::PolicyValidation { .. } => "E001",
            Self::PolicyNotFound(_) => "E002",
            Self::InvalidPackage(_) => "E003",
            Self::DimensionMismatch { .. } => "E004",
            Self::NoRollbackSnapshot(_) => "E100",
            Self::PreflightFailed(_) => "E101",
            Self::UnstableDeployment { .. } => "E102",
            Self::UnknownStage(_) => "E103",
            Self::UnknownArm(_) => "E200",
            Self::UnknownPreset(_) => "E201",
            Self::EvaluationFailed(_) => "E300",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Serialization(_) => "E900",
            Self::Network(_) => "E901",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::PolicyNotFound(stage) => Some(format!("switchyard promote <package> --stage {}", stage)),
            Self::InvalidPackage(_) => Some("switchyard export --help".to_string()),
            Self::NoRollbackSnapshot(stage) => Some(format!("switchyard snapshots --stage {}", stage)),
            Self::PreflightFailed(_) => Some("switchyard promote --force".to_string()),
            Self::UnknownPreset(_) => Some("switchyard config set reward.preset default".to_string()),
            Self::ConfigError(_) => Some("switchyard config list".to_string()),
            _ => None,
        }
    }

    /// Whether the error came from the deployment pipeline
    pub fn is_deployment_error(&self) -> bool {
        matches!(
            self,
            Self::NoRollbackSnapshot(_)
                | Self::PreflightFailed(_)
                | Self::UnstableDeployment { .. }
                | Self::UnknownStage(_)
                | Self::InvalidPackage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_grouped() {
        assert_eq!(Error::PolicyNotFound("prod".into()).code(), "E002");
        assert_eq!(Error::NoRollbackSnapshot("canary".into()).code(), "E100");
        assert_eq!(Error::UnknownArm("deep".into()).code(), "E200");
        assert_eq!(Error::Other("x".into()).code(), "E9999");
    }

    #[test]
    fn test_unstable_deployment_message() {
        let err = Error::UnstableDeployment {
            stage: "canary".to_string(),
            ratio: 0.25,
            floor: 0.5,
        };
        let message = err.to_string();
        assert!(message.contains("0.25"));
        assert!(message.contains("rolled back"));
        assert!(err.is_deployment_error());
    }

    #[test]
    fn test_suggestion_mentions_stage() {
        let err = Error::NoRollbackSnapshot("prod".to_string());
        assert_eq!(
            err.suggestion().as_deref(),
            Some("switchyard snapshots --stage prod")
        );
        assert!(Error::UnknownArm("x".into()).suggestion().is_none());
    }
}
