//! Decision engine
//!
//! The service object a server constructs once at startup and shares by
//! `Arc`. It ties the pieces of a decision together:
//!
//! ```text
//! context ─▶ FeatureEncoder ─▶ RoutingBandit.choose ─┐
//! intent  ──────────────────▶ ToolBandit.choose ────┴▶ Decision
//!
//! Episode ─▶ RewardCalculator ─▶ bandit updates ─▶ gated snapshot ─▶ PolicyStore
//! ```
//!
//! Decisions read in-memory state only. Learning happens on the learner task
//! ([`spawn_learner`]), which also writes snapshots once enough updates and
//! enough time have accumulated.

mod learner;
mod replay;

pub use learner::{spawn_learner, LearnerStats};
pub use replay::{replay, ReplayOptions, ReplayReport};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::episode::Episode;
use crate::error::Error;
use crate::features::{FeatureEncoder, FeatureRecord, FeatureVector};
use crate::policy::{PolicyComponent, PolicyStore, RoutingPolicy, ToolPolicy};
use crate::reward::RewardCalculator;
use crate::routing::{RoutingBandit, RoutingBanditConfig, RoutingChoice, RoutingSnapshot};
use crate::tools::{ToolBandit, ToolSelection, ToolSnapshot};
use crate::Result;

/// Engine tuning
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Updates needed since the last snapshot before another is written
    pub snapshot_min_updates: u64,
    /// Time needed since the last snapshot before another is written
    pub snapshot_min_interval: Duration,
    /// Fixed seed for tool sampling
    pub tool_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            snapshot_min_updates: 100,
            snapshot_min_interval: Duration::from_secs(60),
            tool_seed: None,
        }
    }
}

/// What to do for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub features: FeatureVector,
    pub routing: RoutingChoice,
    pub tool: Option<ToolSelection>,
}

impl Decision {
    pub fn arm(&self) -> &str {
        &self.routing.arm
    }

    /// Start an episode recording this decision; fill in the outcome later
    pub fn episode(
        &self,
        session_id: impl Into<String>,
        intent: impl Into<String>,
        context: FeatureRecord,
    ) -> Episode {
        let episode = Episode::new(session_id, intent)
            .with_context(context)
            .with_arm(self.routing.arm.clone())
            .with_features(self.features.clone());
        match &self.tool {
            Some(selection) => episode.with_tool(selection.tool.clone()),
            None => episode,
        }
    }
}

/// Effect of learning from one episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnOutcome {
    pub reward: f64,
    pub routing_updated: bool,
    pub tool_updated: bool,
}

#[derive(Debug)]
struct SnapshotGate {
    last_at: Instant,
    updates_at_last: u64,
}

/// Encoder, bandits and reward function behind one handle
pub struct DecisionEngine {
    encoder: ArcSwap<FeatureEncoder>,
    routing: RoutingBandit,
    tools: ToolBandit,
    reward: RewardCalculator,
    store: Option<Arc<PolicyStore>>,
    config: EngineConfig,
    gate: Mutex<SnapshotGate>,
}

impl std::fmt::Debug for DecisionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionEngine")
            .field("arms", &self.routing.arms())
            .field("dim", &self.routing.dim())
            .field("routing_updates", &self.routing.total_updates())
            .field("tool_updates", &self.tools.total_updates())
            .field("store", &self.store.is_some())
            .finish()
    }
}

impl DecisionEngine {
    pub fn new(
        encoder: FeatureEncoder,
        bandit: RoutingBanditConfig,
        reward: RewardCalculator,
        config: EngineConfig,
    ) -> Result<Self> {
        if encoder.dimension() != bandit.dim {
            return Err(Error::DimensionMismatch {
                expected: bandit.dim,
                actual: encoder.dimension(),
            });
        }
        let tools = match config.tool_seed {
            Some(seed) => ToolBandit::with_seed(seed),
            None => ToolBandit::new(),
        };
        Ok(Self {
            encoder: ArcSwap::from_pointee(encoder),
            routing: RoutingBandit::new(bandit)?,
            tools,
            reward,
            store: None,
            config,
            gate: Mutex::new(SnapshotGate {
                last_at: Instant::now(),
                updates_at_last: 0,
            }),
        })
    }

    /// Persist snapshots to this store and follow its reloads (see [`attach`](Self::attach))
    pub fn with_store(mut self, store: Arc<PolicyStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn encoder(&self) -> Arc<FeatureEncoder> {
        self.encoder.load_full()
    }

    pub fn routing(&self) -> &RoutingBandit {
        &self.routing
    }

    pub fn tools(&self) -> &ToolBandit {
        &self.tools
    }

    pub fn reward_calculator(&self) -> &RewardCalculator {
        &self.reward
    }

    pub fn store(&self) -> Option<&Arc<PolicyStore>> {
        self.store.as_ref()
    }

    /// Apply the store's current policy and subscribe to its reloads.
    ///
    /// Components that fail to apply are logged and skipped.
    pub fn attach(self: &Arc<Self>) {
        let Some(store) = &self.store else {
            return;
        };
        let current = store.current();
        for component in [
            PolicyComponent::Routing,
            PolicyComponent::Tools,
            PolicyComponent::RoutingState,
            PolicyComponent::ToolState,
        ] {
            if let Some(value) = current.get(component) {
                if let Err(e) = self.apply(component, &value) {
                    warn!(component = %component, error = %e, "Could not apply stored policy");
                }
            }
        }

        let engine = Arc::downgrade(self);
        store.subscribe(Arc::new(move |component: PolicyComponent, value: &Value| {
            if let Some(engine) = engine.upgrade() {
                if let Err(e) = engine.apply(component, value) {
                    warn!(component = %component, error = %e, "Ignoring reloaded policy component");
                }
            }
        }));
        info!(version = current.version().unwrap_or("none"), "Decision engine attached to policy store");
    }

    /// Apply one policy component to the live engine
    pub fn apply(&self, component: PolicyComponent, value: &Value) -> Result<()> {
        match component {
            PolicyComponent::Routing => {
                let policy: RoutingPolicy = serde_json::from_value(value.clone())?;
                if policy.feature_dim != self.routing.dim() {
                    return Err(Error::DimensionMismatch {
                        expected: self.routing.dim(),
                        actual: policy.feature_dim,
                    });
                }
                if policy.arms.as_slice() != self.routing.arms() {
                    warn!(
                        policy = ?policy.arms,
                        configured = ?self.routing.arms(),
                        "Routing policy lists different arms; keeping configured arms"
                    );
                }
                self.routing.set_alpha(policy.alpha)?;
                debug!(alpha = policy.alpha, "Applied routing policy");
            }
            PolicyComponent::Tools => {
                let policy: ToolPolicy = serde_json::from_value(value.clone())?;
                for (intent, tools) in &policy.intents {
                    self.tools.register(intent, tools.iter().cloned());
                }
                debug!(intents = policy.intents.len(), "Applied tool policy");
            }
            PolicyComponent::RoutingState => {
                let snapshot: RoutingSnapshot = serde_json::from_value(value.clone())?;
                self.restore_routing(&snapshot)?;
            }
            PolicyComponent::ToolState => {
                let snapshot: ToolSnapshot = serde_json::from_value(value.clone())?;
                self.tools.restore(&snapshot)?;
                debug!(updates = snapshot.total_updates, "Restored tool state");
            }
            PolicyComponent::Cache | PolicyComponent::Adapter => {
                debug!(component = %component, "Component not used by the decision engine");
            }
        }
        Ok(())
    }

    /// Restore routing state, adopting the snapshot's fitted encoder
    pub fn restore_routing(&self, snapshot: &RoutingSnapshot) -> Result<()> {
        let current = self.encoder.load_full();
        if let Some(fingerprint) = &snapshot.feature_fingerprint {
            if *fingerprint != current.fingerprint() {
                return Err(Error::PolicyValidation {
                    component: PolicyComponent::RoutingState.to_string(),
                    message: format!(
                        "snapshot was trained with feature schema {}, engine uses {}",
                        fingerprint,
                        current.fingerprint()
                    ),
                });
            }
        }
        self.routing.restore(snapshot)?;
        if let Some(encoder) = &snapshot.encoder {
            if encoder.fingerprint() == current.fingerprint() {
                self.encoder.store(Arc::new(encoder.clone()));
            }
        }
        debug!(updates = snapshot.total_updates, "Restored routing state");
        Ok(())
    }

    /// Choose an arm and a tool. No I/O.
    pub fn decide(&self, intent: &str, context: &FeatureRecord) -> Decision {
        let features = self.encoder.load().transform(context);
        let routing = self.routing.choose(&features);
        let tool = self.tools.choose(intent);
        debug!(
            intent,
            arm = %routing.arm,
            tool = ?tool.as_ref().map(|t| t.tool.as_str()),
            "Decision"
        );
        Decision {
            features,
            routing,
            tool,
        }
    }

    /// Update both bandits from a completed episode
    pub fn learn(&self, episode: &Episode) -> LearnOutcome {
        let reward = self.reward.compute(&episode.outcome);

        let routing_updated = match &episode.arm {
            Some(arm) => {
                let features = match &episode.features {
                    Some(features) => features.clone(),
                    None => self.encoder.load().transform(&episode.context),
                };
                self.routing.update(arm, &features, reward)
            }
            None => false,
        };

        let tool_updated = match &episode.tool {
            Some(tool) => {
                self.tools.update(&episode.intent, tool, reward);
                true
            }
            None => false,
        };

        debug!(
            episode_id = %episode.episode_id,
            reward,
            routing_updated,
            tool_updated,
            "Learned from episode"
        );
        LearnOutcome {
            reward,
            routing_updated,
            tool_updated,
        }
    }

    fn updates(&self) -> u64 {
        self.routing.total_updates() + self.tools.total_updates()
    }

    /// Write snapshots if both the update count and the elapsed time passed
    /// their thresholds. Returns whether snapshots were written.
    pub fn maybe_snapshot(&self) -> Result<bool> {
        if self.store.is_none() {
            return Ok(false);
        }
        {
            let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
            let updates = self.updates();
            let pending = updates.saturating_sub(gate.updates_at_last);
            if pending < self.config.snapshot_min_updates
                || gate.last_at.elapsed() < self.config.snapshot_min_interval
            {
                return Ok(false);
            }
            gate.updates_at_last = updates;
            gate.last_at = Instant::now();
        }
        self.snapshot_now()?;
        Ok(true)
    }

    /// Write routing and tool snapshots to the store now
    pub fn snapshot_now(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Err(Error::ConfigError("decision engine has no policy store".into()));
        };
        let routing = self.routing.snapshot().with_encoder(&self.encoder.load());
        let tools = self.tools.snapshot();
        store.save_routing_state(&routing)?;
        store.save_tool_state(&tools)?;
        info!(
            routing_updates = routing.total_updates,
            tool_updates = tools.total_updates,
            "Saved bandit snapshots"
        );
        Ok(())
    }
}
