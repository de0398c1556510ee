//! Offline replay of archived episodes

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::episode::Episode;
use crate::features::{FeatureEncoder, FeatureVector};
use crate::reward::RewardCalculator;
use crate::routing::{FitReport, RoutingBandit, RoutingBanditConfig, RoutingSnapshot};
use crate::tools::{ToolBandit, ToolSnapshot};
use crate::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayOptions {
    /// Refit numeric normalization on the replayed contexts
    pub refit_encoder: bool,
    /// Seed for the replayed tool bandit
    pub tool_seed: Option<u64>,
}

/// Result of a replay: fitted state ready to be saved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub episodes: usize,
    /// Episodes that carried a routing arm
    pub routed: usize,
    pub tool_updates: usize,
    pub mean_reward: f64,
    pub fit: FitReport,
    pub routing: RoutingSnapshot,
    pub tools: ToolSnapshot,
}

/// Recompute rewards for `episodes` and rebuild both bandits from scratch.
///
/// The routing bandit is solved in closed form with [`RoutingBandit::fit`];
/// tool posteriors are updated in archive order. Stored feature vectors are
/// reused unless the encoder is refitted or their dimension disagrees.
pub fn replay(
    episodes: &[Episode],
    mut encoder: FeatureEncoder,
    bandit: RoutingBanditConfig,
    calculator: &RewardCalculator,
    options: &ReplayOptions,
) -> Result<ReplayReport> {
    if options.refit_encoder {
        encoder.fit(episodes.iter().map(|e| &e.context));
        debug!(episodes = episodes.len(), "Refitted feature encoder");
    }

    let routing = RoutingBandit::new(bandit)?;
    let tools = match options.tool_seed {
        Some(seed) => ToolBandit::with_seed(seed),
        None => ToolBandit::new(),
    };

    let rewards: Vec<f64> = episodes.iter().map(|e| calculator.compute(&e.outcome)).collect();

    let mut xs: Vec<FeatureVector> = Vec::new();
    let mut fit_rewards = Vec::new();
    let mut arms = Vec::new();
    let mut tool_updates = 0;
    for (episode, &reward) in episodes.iter().zip(rewards.iter()) {
        if let Some(arm) = &episode.arm {
            let x = match &episode.features {
                Some(stored) if !options.refit_encoder && stored.len() == encoder.dimension() => {
                    stored.clone()
                }
                _ => encoder.transform(&episode.context),
            };
            xs.push(x);
            fit_rewards.push(reward);
            arms.push(arm.clone());
        }
        if let Some(tool) = &episode.tool {
            tools.update(&episode.intent, tool, reward);
            tool_updates += 1;
        }
    }

    let fit = routing.fit(&xs, &fit_rewards, &arms)?;
    let mean_reward = if rewards.is_empty() {
        0.0
    } else {
        rewards.iter().sum::<f64>() / rewards.len() as f64
    };

    info!(
        episodes = episodes.len(),
        routed = arms.len(),
        tool_updates,
        mean_reward,
        "Replayed episodes"
    );

    Ok(ReplayReport {
        episodes: episodes.len(),
        routed: arms.len(),
        tool_updates,
        mean_reward,
        fit,
        routing: routing.snapshot().with_encoder(&encoder),
        tools: tools.snapshot(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureRecord;
    use crate::reward::Outcome;

    fn episode(arm: &str, tool: Option<&str>, success: bool, length: i64) -> Episode {
        let episode = Episode::new("s", "billing")
            .with_context(
                FeatureRecord::new()
                    .with("intent", "billing")
                    .with("message_length", length),
            )
            .with_arm(arm)
            .with_outcome(Outcome {
                success,
                latency_ms: 500.0,
                ..Default::default()
            });
        match tool {
            Some(tool) => episode.with_tool(tool),
            None => episode,
        }
    }

    #[test]
    fn test_replay_rebuilds_both_bandits() {
        let episodes = vec![
            episode("deep", Some("invoice_lookup"), true, 200),
            episode("deep", Some("invoice_lookup"), true, 220),
            episode("fast", Some("faq_search"), false, 20),
            episode("fast", None, false, 30),
            episode("turbo", None, true, 40),
        ];
        let calculator = RewardCalculator::default();
        let report = replay(
            &episodes,
            FeatureEncoder::default(),
            RoutingBanditConfig::default(),
            &calculator,
            &ReplayOptions::default(),
        )
        .unwrap();

        assert_eq!(report.episodes, 5);
        assert_eq!(report.routed, 5);
        assert_eq!(report.tool_updates, 3);
        assert_eq!(report.fit.trained, vec!["fast", "deep"]);
        assert_eq!(report.fit.zero_initialized, vec!["planner"]);
        assert_eq!(report.fit.skipped_samples, 1);
        assert_eq!(report.routing.total_updates, 4);
        assert_eq!(report.tools.total_updates, 3);

        let expected: f64 =
            episodes.iter().map(|e| calculator.compute(&e.outcome)).sum::<f64>() / 5.0;
        assert!((report.mean_reward - expected).abs() < 1e-12);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let episodes: Vec<_> = (0..20)
            .map(|i| episode(if i % 2 == 0 { "deep" } else { "planner" }, None, i % 3 == 0, i * 10))
            .collect();
        let options = ReplayOptions {
            refit_encoder: true,
            tool_seed: Some(1),
        };
        let run = || {
            replay(
                &episodes,
                FeatureEncoder::default(),
                RoutingBanditConfig::default(),
                &RewardCalculator::default(),
                &options,
            )
            .unwrap()
        };
        let (a, b) = (run(), run());
        assert_eq!(a.routing.states, b.routing.states);
        assert_eq!(a.routing.encoder, b.routing.encoder);
        assert!(a.routing.encoder.unwrap().stats("message_length").is_some());
    }

    #[test]
    fn test_stored_features_used_when_dimension_matches() {
        let mut x = vec![0.0; 28];
        x[0] = 1.0;
        let episodes: Vec<_> = (0..3)
            .map(|_| {
                Episode::new("s", "plan")
                    .with_arm("planner")
                    .with_features(x.clone())
                    .with_outcome(Outcome {
                        success: true,
                        ..Default::default()
                    })
            })
            .collect();
        let report = replay(
            &episodes,
            FeatureEncoder::default(),
            RoutingBanditConfig::default(),
            &RewardCalculator::default(),
            &ReplayOptions::default(),
        )
        .unwrap();

        let bandit = RoutingBandit::from_snapshot(&report.routing).unwrap();
        // three samples of x=e0 with reward 1 under lambda 1: theta0 = 3/4
        assert!((bandit.predict("planner", &x).unwrap() - 0.75).abs() < 1e-9);
    }
}
