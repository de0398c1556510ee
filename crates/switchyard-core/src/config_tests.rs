//! Config module tests

use crate::config::{BanditConfig, Config, RewardConfig, StoreConfig};
use crate::policy::Stage;
use crate::routing::TaskComplexity;
use tempfile::TempDir;

#[test]
fn test_config_default() {
    let config = Config::default();

    assert_eq!(config.bandit.arms, vec!["fast", "planner", "deep"]);
    assert_eq!(config.bandit.alpha, 1.0);
    assert!(config.bandit.tool_seed.is_none());
    assert_eq!(config.reward.preset, "default");
    assert!(config.reward.weights.is_empty());
    assert_eq!(config.store.stage, "prod");
    assert_eq!(config.store.reload_interval_secs, 30);
    assert_eq!(config.canary.traffic_percent, 5.0);
    assert_eq!(config.deploy.stability_floor, 0.5);

    config.validate().unwrap();
}

#[test]
fn test_bandit_dimension_follows_features() {
    let mut config = Config::default();
    assert_eq!(config.bandit_config().dim, 28);

    config.set("features.hash_dim", "32").unwrap();
    assert_eq!(config.bandit_config().dim, 44);
    assert_eq!(config.encoder().unwrap().dimension(), 44);
    assert_eq!(config.decision_engine().unwrap().routing().dim(), 44);
}

#[test]
fn test_save_and_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = Config::default();
    config.set("store.root", "/var/lib/switchyard").unwrap();
    config.set("canary.allowed_complexity", "simple, complex").unwrap();
    config.set("reward.weights", "success=2, latency=0.5").unwrap();
    config.set("bandit.tool_seed", "42").unwrap();
    config.save_to(&path).unwrap();

    let loaded = Config::load_from(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(
        loaded.canary.allowed_complexity,
        vec![TaskComplexity::Simple, TaskComplexity::Complex]
    );
}

#[test]
fn test_missing_file_is_default() {
    let dir = TempDir::new().unwrap();
    let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_partial_file_fills_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[canary]\ntraffic_percent = 20.0\n\n[store]\nstage = \"canary\"\n").unwrap();

    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.canary.traffic_percent, 20.0);
    assert_eq!(config.canary.evaluation_window, 200);
    assert_eq!(config.stage().unwrap(), Stage::Canary);
    assert_eq!(config.bandit, BanditConfig::default());
}

#[test]
fn test_invalid_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[canary]\ntraffic_percent = 150.0\n").unwrap();
    assert!(Config::load_from(&path).is_err());

    std::fs::write(&path, "not toml [").unwrap();
    assert!(Config::load_from(&path).is_err());
}

#[test]
fn test_set_validates_and_keeps_previous_value() {
    let mut config = Config::default();

    assert!(config.set("canary.traffic_percent", "101").is_err());
    assert!(config.set("canary.min_intent_agreement", "abc").is_err());
    assert!(config.set("bandit.arms", "").is_err());
    assert!(config.set("bandit.arms", "fast, fast").is_err());
    assert!(config.set("bandit.lambda", "0").is_err());
    assert!(config.set("reward.preset", "cheapest").is_err());
    assert!(config.set("store.stage", "staging").is_err());
    assert!(config.set("canary.allowed_complexity", "simple, trivial").is_err());
    assert!(config.set("reward.weights", "success").is_err());
    assert!(config.set("nope.key", "1").is_err());
    assert_eq!(config, Config::default());

    config.set("reward.preset", "speed").unwrap();
    assert_eq!(config.reward.preset, "speed_optimized");
    config.set("store.stage", "production").unwrap();
    assert_eq!(config.store.stage, "prod");
    config.set("deploy.health_url", "http://localhost:8080/health").unwrap();
    assert_eq!(config.get("deploy.health_url").unwrap(), "http://localhost:8080/health");
    config.set("deploy.health_url", "none").unwrap();
    assert!(config.deploy.health_url.is_none());
}

#[test]
fn test_get_and_list() {
    let mut config = Config::default();
    config.store = StoreConfig {
        root: Some("/srv/switchyard".into()),
        ..Default::default()
    };

    assert_eq!(config.get("bandit.arms").unwrap(), "fast, planner, deep");
    assert_eq!(config.get("store.root").unwrap(), "/srv/switchyard");
    assert_eq!(config.get("reward.weights").unwrap(), "(preset default)");
    assert_eq!(config.get("canary.allowed_complexity").unwrap(), "simple, medium");
    assert!(config.get("store.episode_log").unwrap().contains("not set"));
    assert!(config.get("unknown").is_err());

    let listed = config.list().unwrap();
    assert!(listed.iter().any(|(k, v)| k == "canary.enabled" && v == "true"));
    assert!(listed.iter().any(|(k, _)| k == "deploy.max_snapshots"));
    for (key, _) in &listed {
        config.get(key).unwrap();
    }
}

#[test]
fn test_derived_paths_and_reward() {
    let config = Config {
        store: StoreConfig {
            root: Some("/data".into()),
            ..Default::default()
        },
        reward: RewardConfig {
            preset: "cost_optimized".into(),
            weights: Default::default(),
        },
        ..Default::default()
    };

    assert_eq!(config.episode_log().unwrap(), std::path::PathBuf::from("/data/episodes.jsonl"));
    assert_eq!(config.comparison_log().unwrap(), std::path::PathBuf::from("/data/comparisons.jsonl"));
    assert_eq!(config.reward_calculator().unwrap().weights().cost, 1.5);

    let store = config.policy_store(Stage::Canary).unwrap();
    assert_eq!(store.config().expected_dim, Some(28));
    assert_eq!(store.layout().stage(), Stage::Canary);
}
