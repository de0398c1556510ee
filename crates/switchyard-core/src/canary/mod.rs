//! Canary rollout of candidate policies
//!
//! The candidate runs in shadow next to the live policy on every request.
//! Its result is served only for sessions hashed into the canary share, and
//! only while the comparison gates hold over the evaluation window.

mod compare;
mod config;
mod router;
mod summary;

pub use compare::{compare, structural_similarity, Comparison, EvaluationResult};
pub use config::{CanaryConfig, CANARY_HASH_SEED};
pub use router::{
    rollback_reason, CanaryDecision, CanaryRequest, CanaryRouter, ComparisonRecord,
    PolicyEvaluator, RollbackReason,
};
pub use summary::ComparisonSummary;
