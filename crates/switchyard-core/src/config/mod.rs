//! Configuration management with file persistence

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::canary::CanaryConfig;
use crate::deploy::{DeployConfig, DeploymentPipeline};
use crate::engine::{DecisionEngine, EngineConfig};
use crate::features::{FeatureEncoder, FeatureSchema};
use crate::policy::{PolicyStore, PolicyStoreConfig, Stage};
use crate::reward::{RewardCalculator, RewardPreset, RewardWeights};
use crate::routing::{RoutingBanditConfig, TaskComplexity, DEFAULT_ARMS};

/// Switchyard configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub features: FeatureSchema,
    pub bandit: BanditConfig,
    pub reward: RewardConfig,
    pub store: StoreConfig,
    pub canary: CanaryConfig,
    pub deploy: DeployConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BanditConfig {
    pub arms: Vec<String>,
    pub alpha: f64,
    pub lambda: f64,
    /// Fixed seed for tool sampling; random when unset
    pub tool_seed: Option<u64>,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            arms: DEFAULT_ARMS.iter().map(|a| a.to_string()).collect(),
            alpha: 1.0,
            lambda: 1.0,
            tool_seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    pub preset: String,
    /// Custom weights; when non-empty they replace the preset
    pub weights: BTreeMap<String, f64>,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            preset: RewardPreset::Default.to_string(),
            weights: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the stage directories; platform data dir when unset
    pub root: Option<PathBuf>,
    /// Stage served by this process
    pub stage: String,
    pub reload_interval_secs: u64,
    pub snapshot_min_updates: u64,
    pub snapshot_min_interval_secs: u64,
    /// Episode archive; `<root>/episodes.jsonl` when unset
    pub episode_log: Option<PathBuf>,
    /// Canary comparison log; `<root>/comparisons.jsonl` when unset
    pub comparison_log: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: None,
            stage: Stage::Prod.to_string(),
            reload_interval_secs: 30,
            snapshot_min_updates: 100,
            snapshot_min_interval_secs: 60,
            episode_log: None,
            comparison_log: None,
        }
    }
}

const KEYS: &[&str] = &[
    "features.categorical",
    "features.numeric",
    "features.hash_dim",
    "features.interaction_dim",
    "bandit.arms",
    "bandit.alpha",
    "bandit.lambda",
    "bandit.tool_seed",
    "reward.preset",
    "reward.weights",
    "store.root",
    "store.stage",
    "store.reload_interval_secs",
    "store.snapshot_min_updates",
    "store.snapshot_min_interval_secs",
    "store.episode_log",
    "store.comparison_log",
    "canary.enabled",
    "canary.traffic_percent",
    "canary.min_schema_validity",
    "canary.min_intent_agreement",
    "canary.max_latency_increase_ms",
    "canary.allowed_complexity",
    "canary.evaluation_window",
    "canary.hash_seed",
    "deploy.health_url",
    "deploy.health_timeout_ms",
    "deploy.stability_window_secs",
    "deploy.check_interval_secs",
    "deploy.stability_floor",
    "deploy.max_snapshots",
];

const NOT_SET: &str = "(not set)";

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| anyhow!("Invalid {} value '{}': {}", key, value, e))
}

fn optional(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

fn show_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| NOT_SET.to_string())
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("SWITCHYARD_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("switchyard")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or the default if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.features.validate()?;

        let arms = &self.bandit.arms;
        if arms.is_empty() {
            return Err(anyhow!("bandit.arms must name at least one arm"));
        }
        for (i, arm) in arms.iter().enumerate() {
            if arms[..i].contains(arm) {
                return Err(anyhow!("bandit.arms lists '{}' twice", arm));
            }
        }
        if !self.bandit.alpha.is_finite() || self.bandit.alpha < 0.0 {
            return Err(anyhow!("bandit.alpha must be a non-negative number"));
        }
        if !self.bandit.lambda.is_finite() || self.bandit.lambda <= 0.0 {
            return Err(anyhow!("bandit.lambda must be positive"));
        }

        self.reward
            .preset
            .parse::<RewardPreset>()
            .context("Invalid reward.preset")?;
        self.store
            .stage
            .parse::<Stage>()
            .context("Invalid store.stage")?;
        if self.store.reload_interval_secs == 0 {
            return Err(anyhow!("store.reload_interval_secs must be positive"));
        }

        self.canary.validate()?;
        if self.canary.hash_seed > i64::MAX as u64 {
            return Err(anyhow!("canary.hash_seed must fit in a signed 64-bit integer"));
        }
        self.deploy.validate()?;
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        let value = match key {
            "features.categorical" => self.features.categorical.join(", "),
            "features.numeric" => self.features.numeric.join(", "),
            "features.hash_dim" => self.features.hash_dim.to_string(),
            "features.interaction_dim" => self.features.interaction_dim.to_string(),

            "bandit.arms" => self.bandit.arms.join(", "),
            "bandit.alpha" => self.bandit.alpha.to_string(),
            "bandit.lambda" => self.bandit.lambda.to_string(),
            "bandit.tool_seed" => self
                .bandit
                .tool_seed
                .map(|s| s.to_string())
                .unwrap_or_else(|| NOT_SET.to_string()),

            "reward.preset" => self.reward.preset.clone(),
            "reward.weights" => {
                if self.reward.weights.is_empty() {
                    format!("(preset {})", self.reward.preset)
                } else {
                    self.reward
                        .weights
                        .iter()
                        .map(|(k, v)| format!("{}={}", k, v))
                        .collect::<Vec<_>>()
                        .join(", ")
                }
            }

            "store.root" => self.store_root()?.display().to_string(),
            "store.stage" => self.store.stage.clone(),
            "store.reload_interval_secs" => self.store.reload_interval_secs.to_string(),
            "store.snapshot_min_updates" => self.store.snapshot_min_updates.to_string(),
            "store.snapshot_min_interval_secs" => self.store.snapshot_min_interval_secs.to_string(),
            "store.episode_log" => show_path(&self.store.episode_log),
            "store.comparison_log" => show_path(&self.store.comparison_log),

            "canary.enabled" => self.canary.enabled.to_string(),
            "canary.traffic_percent" => self.canary.traffic_percent.to_string(),
            "canary.min_schema_validity" => self.canary.min_schema_validity.to_string(),
            "canary.min_intent_agreement" => self.canary.min_intent_agreement.to_string(),
            "canary.max_latency_increase_ms" => self.canary.max_latency_increase_ms.to_string(),
            "canary.allowed_complexity" => self
                .canary
                .allowed_complexity
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "canary.evaluation_window" => self.canary.evaluation_window.to_string(),
            "canary.hash_seed" => self.canary.hash_seed.to_string(),

            "deploy.health_url" => self
                .deploy
                .health_url
                .clone()
                .unwrap_or_else(|| NOT_SET.to_string()),
            "deploy.health_timeout_ms" => self.deploy.health_timeout_ms.to_string(),
            "deploy.stability_window_secs" => self.deploy.stability_window_secs.to_string(),
            "deploy.check_interval_secs" => self.deploy.check_interval_secs.to_string(),
            "deploy.stability_floor" => self.deploy.stability_floor.to_string(),
            "deploy.max_snapshots" => self.deploy.max_snapshots.to_string(),

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `switchyard config list` to see available keys.",
                    key
                ))
            }
        };
        Ok(value)
    }

    /// Set a configuration value by key.
    ///
    /// The whole configuration is validated afterwards; on failure nothing
    /// is changed.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut next = self.clone();
        next.apply(key, value)?;
        next.validate()?;
        *self = next;
        Ok(())
    }

    fn apply(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "features.categorical" => self.features.categorical = split_list(value),
            "features.numeric" => self.features.numeric = split_list(value),
            "features.hash_dim" => self.features.hash_dim = parse(key, value)?,
            "features.interaction_dim" => self.features.interaction_dim = parse(key, value)?,

            "bandit.arms" => self.bandit.arms = split_list(value),
            "bandit.alpha" => self.bandit.alpha = parse(key, value)?,
            "bandit.lambda" => self.bandit.lambda = parse(key, value)?,
            "bandit.tool_seed" => {
                self.bandit.tool_seed = match optional(value) {
                    Some(v) => {
                        let seed: u64 = parse(key, &v)?;
                        if seed > i64::MAX as u64 {
                            return Err(anyhow!("bandit.tool_seed must fit in a signed 64-bit integer"));
                        }
                        Some(seed)
                    }
                    None => None,
                }
            }

            "reward.preset" => {
                let preset: RewardPreset = value.parse()?;
                self.reward.preset = preset.to_string();
            }
            "reward.weights" => {
                let mut weights = BTreeMap::new();
                for pair in split_list(value) {
                    let (name, weight) = pair
                        .split_once('=')
                        .ok_or_else(|| anyhow!("Expected name=weight pairs, got '{}'", pair))?;
                    weights.insert(name.trim().to_string(), parse::<f64>(key, weight)?);
                }
                self.reward.weights = weights;
            }

            "store.root" => self.store.root = optional(value).map(PathBuf::from),
            "store.stage" => {
                let stage: Stage = value.parse()?;
                self.store.stage = stage.to_string();
            }
            "store.reload_interval_secs" => self.store.reload_interval_secs = parse(key, value)?,
            "store.snapshot_min_updates" => self.store.snapshot_min_updates = parse(key, value)?,
            "store.snapshot_min_interval_secs" => {
                self.store.snapshot_min_interval_secs = parse(key, value)?
            }
            "store.episode_log" => self.store.episode_log = optional(value).map(PathBuf::from),
            "store.comparison_log" => self.store.comparison_log = optional(value).map(PathBuf::from),

            "canary.enabled" => self.canary.enabled = parse(key, value)?,
            "canary.traffic_percent" => self.canary.traffic_percent = parse(key, value)?,
            "canary.min_schema_validity" => self.canary.min_schema_validity = parse(key, value)?,
            "canary.min_intent_agreement" => self.canary.min_intent_agreement = parse(key, value)?,
            "canary.max_latency_increase_ms" => {
                self.canary.max_latency_increase_ms = parse(key, value)?
            }
            "canary.allowed_complexity" => {
                self.canary.allowed_complexity = split_list(value)
                    .iter()
                    .map(|v| parse::<TaskComplexity>(key, v))
                    .collect::<anyhow::Result<_>>()?;
            }
            "canary.evaluation_window" => self.canary.evaluation_window = parse(key, value)?,
            "canary.hash_seed" => self.canary.hash_seed = parse(key, value)?,

            "deploy.health_url" => self.deploy.health_url = optional(value),
            "deploy.health_timeout_ms" => self.deploy.health_timeout_ms = parse(key, value)?,
            "deploy.stability_window_secs" => self.deploy.stability_window_secs = parse(key, value)?,
            "deploy.check_interval_secs" => self.deploy.check_interval_secs = parse(key, value)?,
            "deploy.stability_floor" => self.deploy.stability_floor = parse(key, value)?,
            "deploy.max_snapshots" => self.deploy.max_snapshots = parse(key, value)?,

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `switchyard config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        KEYS.iter()
            .map(|key| Ok((key.to_string(), self.get(key)?)))
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }

    /// Directory holding the stage directories
    pub fn store_root(&self) -> anyhow::Result<PathBuf> {
        match &self.store.root {
            Some(root) => Ok(root.clone()),
            None => Ok(dirs::data_dir()
                .ok_or_else(|| anyhow!("Could not determine data directory; set store.root"))?
                .join("switchyard")),
        }
    }

    pub fn stage(&self) -> anyhow::Result<Stage> {
        Ok(self.store.stage.parse()?)
    }

    pub fn episode_log(&self) -> anyhow::Result<PathBuf> {
        match &self.store.episode_log {
            Some(path) => Ok(path.clone()),
            None => Ok(self.store_root()?.join("episodes.jsonl")),
        }
    }

    pub fn comparison_log(&self) -> anyhow::Result<PathBuf> {
        match &self.store.comparison_log {
            Some(path) => Ok(path.clone()),
            None => Ok(self.store_root()?.join("comparisons.jsonl")),
        }
    }

    pub fn encoder(&self) -> anyhow::Result<FeatureEncoder> {
        Ok(FeatureEncoder::new(self.features.clone())?)
    }

    /// Bandit parameters; the dimension follows the feature schema
    pub fn bandit_config(&self) -> RoutingBanditConfig {
        RoutingBanditConfig::new(self.bandit.arms.iter().cloned(), self.features.dimension())
            .with_alpha(self.bandit.alpha)
            .with_lambda(self.bandit.lambda)
    }

    pub fn reward_calculator(&self) -> anyhow::Result<RewardCalculator> {
        if self.reward.weights.is_empty() {
            Ok(RewardCalculator::from_preset(&self.reward.preset)?)
        } else {
            Ok(RewardCalculator::new(RewardWeights::from_map(&self.reward.weights)))
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            snapshot_min_updates: self.store.snapshot_min_updates,
            snapshot_min_interval: Duration::from_secs(self.store.snapshot_min_interval_secs),
            tool_seed: self.bandit.tool_seed,
        }
    }

    /// Policy store for `stage`, rejecting snapshots from another schema
    pub fn policy_store(&self, stage: Stage) -> anyhow::Result<PolicyStore> {
        let encoder = self.encoder()?;
        let config = PolicyStoreConfig::new(self.store_root()?, stage)
            .with_reload_interval(Duration::from_secs(self.store.reload_interval_secs))
            .with_expected_encoder(encoder.dimension(), encoder.fingerprint());
        Ok(PolicyStore::new(config))
    }

    pub fn decision_engine(&self) -> anyhow::Result<DecisionEngine> {
        Ok(DecisionEngine::new(
            self.encoder()?,
            self.bandit_config(),
            self.reward_calculator()?,
            self.engine_config(),
        )?)
    }

    pub fn pipeline(&self) -> anyhow::Result<DeploymentPipeline> {
        Ok(DeploymentPipeline::new(self.store_root()?, self.deploy.clone())?)
    }
}
