//! Switchyard Core Library
//!
//! Decision layer for a conversational assistant, including:
//! - Feature encoding of request context
//! - Contextual routing across model tiers (LinUCB)
//! - Tool selection per intent (Thompson sampling)
//! - Reward computation from request outcomes
//! - Policy store with hot reload and bandit snapshots
//! - Canary shadow evaluation with gated rollout
//! - Policy packaging, promotion, stability monitoring and rollback

pub mod canary;
pub mod config;
pub mod deploy;
pub mod engine;
pub mod episode;
pub mod error;
pub mod features;
pub mod policy;
pub mod reward;
pub mod routing;
pub mod storage;
pub mod tools;

#[cfg(test)]
mod config_tests;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::engine::{Decision, DecisionEngine, EngineConfig};
    pub use crate::episode::Episode;
    pub use crate::error::{Error, Result};
    pub use crate::features::{FeatureEncoder, FeatureRecord};
    pub use crate::policy::{PolicyStore, Stage};
    pub use crate::reward::{Outcome, RewardCalculator};
}
