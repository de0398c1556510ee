//! Export, promotion and rollback of policy packages
//!
//! ```text
//! sub-policy files ──export──▶ PolicyPackage ──promote──▶ <stage>/active.json
//!                                                 │
//!                             snapshot ◀──────────┘ ──rollback──▶ previous package
//! ```

mod export;
mod health;
mod pipeline;

pub use export::{default_version, export_package, read_package, write_package};
pub use health::{HealthProbe, HealthReport, HttpHealthProbe};
pub use pipeline::{
    DeployConfig, DeploymentPipeline, PreflightOutcome, PromoteOptions, PromotionReport,
    RollbackReport, RollbackSnapshot, SnapshotInfo, StabilityReport, StageStatus,
    DEFAULT_STABILITY_FLOOR,
};
