//! Per-intent tool selection
//!
//! Given a classified intent, pick which downstream tool to call. Each
//! (intent, tool) pair learns a Beta posterior from clamped rewards and the
//! choice is made by Thompson Sampling.

mod bandit;
mod types;

pub use bandit::ToolBandit;
pub use types::{ToolSelection, ToolSnapshot, ToolStats};
