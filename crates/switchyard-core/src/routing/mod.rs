//! Contextual routing of requests to processing tiers
//!
//! This module chooses which tier ("arm") serves a request from the request's
//! feature vector. The key components are:
//!
//! - **LinUCB bandit**: per-arm ridge regression with an upper-confidence
//!   bonus, balancing proven tiers against under-sampled ones.
//!
//! - **Linear algebra**: Cholesky inversion with a pseudo-inverse fallback so a
//!   degenerate design matrix never fails a decision.
//!
//! - **Snapshots**: lossless persistence of every arm's `A` and `b`.
//!
//! ## How It Works
//!
//! 1. The feature encoder turns the request context into a vector `x`
//! 2. `choose(x)` scores each arm and returns the best one
//! 3. The surrounding system serves the request with that tier
//! 4. The outcome's reward flows back through `update(arm, x, reward)`
//!
//! ## Example
//!
//! ```rust,ignore
//! use switchyard_core::routing::{RoutingBandit, RoutingBanditConfig};
//!
//! let bandit = RoutingBandit::new(RoutingBanditConfig::new(["fast", "planner", "deep"], 6))?;
//! let x = [1.0, 0.0, 0.0, 0.0, 0.0, 0.0];
//!
//! let choice = bandit.choose(&x);
//! // serve the request with `choice.arm`...
//! bandit.update(&choice.arm, &x, 1.0);
//! ```

mod bandit;
pub mod linalg;
mod types;

pub use bandit::RoutingBandit;
pub use types::{
    ArmScore, ArmSnapshot, ArmStats, FitReport, RoutingBanditConfig, RoutingChoice,
    RoutingSnapshot, TaskComplexity, DEFAULT_ARMS,
};
