//! Thompson Sampling bandit for tool selection
//!
//! Each (intent, tool) pair keeps a Beta(α, β) posterior over its success
//! probability. A decision draws one sample per registered tool and takes the
//! highest, so uncertain tools still get tried while proven ones dominate.
//!
//! ## Algorithm Overview
//!
//! 1. For each tool registered for the intent, sample θ ~ Beta(α, β)
//! 2. Select the tool with the highest sample
//! 3. Observe reward `r ∈ [0, 1]` and update: α += r, β += 1 - r

use chrono::Utc;
use rand::prelude::*;
use rand_distr::{Beta, Distribution};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use tracing::{debug, warn};

use super::types::{ToolSelection, ToolSnapshot, ToolStats};
use crate::error::Error;
use crate::Result;

type IntentTable = BTreeMap<String, BTreeMap<String, ToolStats>>;

/// Thompson Sampling bandit choosing a tool per intent
#[derive(Debug)]
pub struct ToolBandit {
    /// intent → tool → posterior
    stats: RwLock<IntentTable>,
    rng: Mutex<StdRng>,
    total_updates: AtomicU64,
}

impl Default for ToolBandit {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolBandit {
    /// Create a bandit seeded from OS entropy
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create a bandit with a fixed seed (for reproducibility in tests)
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            stats: RwLock::new(BTreeMap::new()),
            rng: Mutex::new(rng),
            total_updates: AtomicU64::new(0),
        }
    }

    pub fn total_updates(&self) -> u64 {
        self.total_updates.load(Ordering::Relaxed)
    }

    /// Make tools selectable for an intent. Existing posteriors are kept.
    pub fn register<I, S>(&self, intent: &str, tools: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut stats = self.stats.write().unwrap_or_else(PoisonError::into_inner);
        let entry = stats.entry(intent.to_string()).or_default();
        for tool in tools {
            entry.entry(tool.into()).or_default();
        }
    }

    /// Tools registered for an intent, in selection order
    pub fn tools_for(&self, intent: &str) -> Vec<String> {
        let stats = self.stats.read().unwrap_or_else(PoisonError::into_inner);
        stats
            .get(intent)
            .map(|tools| tools.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Posterior for one pair, if it exists
    pub fn stats(&self, intent: &str, tool: &str) -> Option<ToolStats> {
        let stats = self.stats.read().unwrap_or_else(PoisonError::into_inner);
        stats.get(intent).and_then(|tools| tools.get(tool)).copied()
    }

    fn sample_beta(rng: &mut StdRng, alpha: f64, beta: f64) -> f64 {
        if !(alpha > 0.0 && beta > 0.0) {
            return 0.5;
        }
        match Beta::new(alpha, beta) {
            Ok(dist) => dist.sample(rng),
            Err(_) => alpha / (alpha + beta),
        }
    }

    /// Select a tool for an intent. Returns `None` when no tools are registered.
    pub fn choose(&self, intent: &str) -> Option<ToolSelection> {
        let candidates: Vec<(String, ToolStats)> = {
            let stats = self.stats.read().unwrap_or_else(PoisonError::into_inner);
            stats
                .get(intent)?
                .iter()
                .map(|(tool, s)| (tool.clone(), *s))
                .collect()
        };
        if candidates.is_empty() {
            return None;
        }

        let samples: Vec<f64> = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            candidates
                .iter()
                .map(|(_, s)| Self::sample_beta(&mut rng, s.alpha, s.beta))
                .collect()
        };

        let mut best = 0;
        let mut greedy = 0;
        for i in 1..candidates.len() {
            if samples[i] > samples[best] {
                best = i;
            }
            if candidates[i].1.expected_value() > candidates[greedy].1.expected_value() {
                greedy = i;
            }
        }

        let (tool, stats) = &candidates[best];
        let selection = ToolSelection {
            tool: tool.clone(),
            sampled_value: samples[best],
            expected_value: stats.expected_value(),
            uncertainty: stats.uncertainty(),
            is_exploration: best != greedy,
        };
        debug!(
            intent,
            tool = %selection.tool,
            sample = selection.sampled_value,
            exploration = selection.is_exploration,
            "Tool decision"
        );
        Some(selection)
    }

    /// Update the bandit with observed reward
    ///
    /// Registers the pair with a Beta(1,1) prior if it was never seen.
    pub fn update(&self, intent: &str, tool: &str, reward: f64) {
        let reward = if reward.is_finite() {
            reward.clamp(0.0, 1.0)
        } else {
            warn!(intent, tool, "Non-finite tool reward treated as 0");
            0.0
        };

        let mut stats = self.stats.write().unwrap_or_else(PoisonError::into_inner);
        stats
            .entry(intent.to_string())
            .or_default()
            .entry(tool.to_string())
            .or_default()
            .observe(reward);
        self.total_updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Posterior means for all tools of an intent
    pub fn expected_values(&self, intent: &str) -> BTreeMap<String, f64> {
        let stats = self.stats.read().unwrap_or_else(PoisonError::into_inner);
        stats
            .get(intent)
            .map(|tools| {
                tools
                    .iter()
                    .map(|(tool, s)| (tool.clone(), s.expected_value()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Posterior standard deviations for all tools of an intent
    pub fn uncertainties(&self, intent: &str) -> BTreeMap<String, f64> {
        let stats = self.stats.read().unwrap_or_else(PoisonError::into_inner);
        stats
            .get(intent)
            .map(|tools| {
                tools
                    .iter()
                    .map(|(tool, s)| (tool.clone(), s.uncertainty()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Copy all posteriors for persistence
    pub fn snapshot(&self) -> ToolSnapshot {
        let intents = self
            .stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        ToolSnapshot {
            intents,
            total_updates: self.total_updates(),
            taken_at: Utc::now(),
        }
    }

    /// Replace all posteriors from a snapshot
    pub fn restore(&self, snapshot: &ToolSnapshot) -> Result<()> {
        for (intent, tools) in &snapshot.intents {
            for (tool, s) in tools {
                let valid = s.alpha.is_finite()
                    && s.beta.is_finite()
                    && s.alpha > 0.0
                    && s.beta > 0.0
                    && s.reward_sum.is_finite();
                if !valid {
                    return Err(Error::InvalidInput(format!(
                        "Invalid posterior for {}/{}: alpha={}, beta={}",
                        intent, tool, s.alpha, s.beta
                    )));
                }
            }
        }
        *self.stats.write().unwrap_or_else(PoisonError::into_inner) = snapshot.intents.clone();
        self.total_updates
            .store(snapshot.total_updates, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_tools_means_no_selection() {
        let bandit = ToolBandit::with_seed(1);
        assert!(bandit.choose("billing").is_none());

        bandit.register("billing", Vec::<String>::new());
        assert!(bandit.choose("billing").is_none());
    }

    #[test]
    fn test_single_tool_is_always_chosen() {
        let bandit = ToolBandit::with_seed(1);
        bandit.register("billing", ["invoice_lookup"]);
        for _ in 0..20 {
            assert_eq!(bandit.choose("billing").unwrap().tool, "invoice_lookup");
        }
    }

    #[test]
    fn test_strong_posterior_wins() {
        let bandit = ToolBandit::with_seed(42);
        for _ in 0..49 {
            bandit.update("search", "tool_a", 1.0);
            bandit.update("search", "tool_b", 0.0);
        }
        let a = bandit.stats("search", "tool_a").unwrap();
        assert_eq!((a.alpha, a.beta), (50.0, 1.0));

        let wins = (0..1000)
            .filter(|_| bandit.choose("search").unwrap().tool == "tool_a")
            .count();
        assert!(wins > 900, "tool_a won {} of 1000", wins);
    }

    #[test]
    fn test_update_registers_lazily_and_clamps() {
        let bandit = ToolBandit::with_seed(3);
        bandit.update("refund", "ledger", 2.0);
        bandit.update("refund", "ledger", -1.0);

        let stats = bandit.stats("refund", "ledger").unwrap();
        assert_eq!(stats.alpha, 2.0);
        assert_eq!(stats.beta, 2.0);
        assert_eq!(stats.pulls, 2);
        assert_eq!(stats.reward_sum, 1.0);
        assert_eq!(bandit.tools_for("refund"), vec!["ledger"]);
    }

    #[test]
    fn test_register_keeps_existing_posterior() {
        let bandit = ToolBandit::with_seed(3);
        bandit.update("refund", "ledger", 1.0);
        bandit.register("refund", ["ledger", "crm"]);

        assert_eq!(bandit.stats("refund", "ledger").unwrap().pulls, 1);
        let expected = bandit.expected_values("refund");
        assert!((expected["ledger"] - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(expected["crm"], 0.5);
        assert!(bandit.uncertainties("refund")["crm"] > bandit.uncertainties("refund")["ledger"]);
    }

    #[test]
    fn test_same_seed_same_choices() {
        let run = |seed| {
            let bandit = ToolBandit::with_seed(seed);
            bandit.register("faq", ["a", "b", "c"]);
            (0..50)
                .map(|_| bandit.choose("faq").unwrap().tool)
                .collect::<Vec<_>>()
        };
        assert_eq!(run(9), run(9));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let bandit = ToolBandit::with_seed(5);
        bandit.update("faq", "kb", 0.3);
        bandit.update("faq", "web", 0.9);

        let snapshot = bandit.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let decoded: ToolSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, snapshot);

        let restored = ToolBandit::with_seed(5);
        restored.restore(&decoded).unwrap();
        assert_eq!(restored.snapshot().intents, snapshot.intents);
        assert_eq!(restored.total_updates(), 2);
    }

    #[test]
    fn test_restore_rejects_bad_posterior() {
        let bandit = ToolBandit::with_seed(5);
        let mut snapshot = bandit.snapshot();
        snapshot
            .intents
            .entry("faq".into())
            .or_default()
            .insert("kb".into(), ToolStats {
                alpha: 0.0,
                ..Default::default()
            });
        assert!(bandit.restore(&snapshot).is_err());
    }
}
