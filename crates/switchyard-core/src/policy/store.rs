//! Active policy storage with hot reload
//!
//! The store owns the canonical in-memory view of one stage: the active
//! package plus the learned bandit snapshots. Readers get an `Arc` to an
//! immutable [`ActivePolicy`] through `arc-swap`, so serving never waits on a
//! reload. Reloads parse and validate the full candidate first and only then
//! swap; a broken file leaves the previous policy live.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::layout::{ActivePointer, Stage, StageLayout};
use super::package::{PolicyComponent, PolicyPackage, RoutingPolicy, ToolPolicy};
use crate::error::Error;
use crate::routing::RoutingSnapshot;
use crate::storage::{content_hash, file_stamp, write_json_atomic, FileStamp};
use crate::tools::ToolSnapshot;
use crate::Result;

/// Callback run after a component changes: (component, new value)
pub type PolicyListener = Arc<dyn Fn(PolicyComponent, &Value) + Send + Sync>;

/// Policy store settings
#[derive(Debug, Clone)]
pub struct PolicyStoreConfig {
    /// Directory holding one subdirectory per stage
    pub root: PathBuf,
    pub stage: Stage,
    /// How often the reload loop checks file stamps
    pub reload_interval: Duration,
    /// Routing snapshots must have this dimension
    pub expected_dim: Option<usize>,
    /// Routing snapshots that record a fingerprint must match this one
    pub expected_fingerprint: Option<String>,
}

impl PolicyStoreConfig {
    pub fn new(root: impl Into<PathBuf>, stage: Stage) -> Self {
        Self {
            root: root.into(),
            stage,
            reload_interval: Duration::from_secs(30),
            expected_dim: None,
            expected_fingerprint: None,
        }
    }

    pub fn with_reload_interval(mut self, interval: Duration) -> Self {
        self.reload_interval = interval;
        self
    }

    pub fn with_expected_encoder(mut self, dim: usize, fingerprint: impl Into<String>) -> Self {
        self.expected_dim = Some(dim);
        self.expected_fingerprint = Some(fingerprint.into());
        self
    }
}

/// Immutable view of everything live for a stage
#[derive(Debug, Clone, Default)]
pub struct ActivePolicy {
    pub pointer: Option<ActivePointer>,
    pub package: Option<PolicyPackage>,
    pub routing_state: Option<RoutingSnapshot>,
    pub tool_state: Option<ToolSnapshot>,
    pub loaded_at: Option<DateTime<Utc>>,
}

impl ActivePolicy {
    /// JSON copy of one component
    pub fn get(&self, component: PolicyComponent) -> Option<Value> {
        match component {
            PolicyComponent::RoutingState => {
                serde_json::to_value(self.routing_state.as_ref()?).ok()
            }
            PolicyComponent::ToolState => serde_json::to_value(self.tool_state.as_ref()?).ok(),
            packaged => self.package.as_ref()?.policies.get(packaged),
        }
    }

    pub fn version(&self) -> Option<&str> {
        self.package.as_ref().map(|p| p.version.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FileStamps {
    pointer: Option<FileStamp>,
    package: Option<FileStamp>,
    routing: Option<FileStamp>,
    tools: Option<FileStamp>,
}

/// Loads, serves and persists the active policy of one stage
pub struct PolicyStore {
    config: PolicyStoreConfig,
    layout: StageLayout,
    active: ArcSwap<ActivePolicy>,
    /// Stamps of the files the current view was built from
    stamps: Mutex<FileStamps>,
    listeners: RwLock<Vec<PolicyListener>>,
    /// Serializes every write this store makes
    writer: Mutex<()>,
}

impl std::fmt::Debug for PolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyStore")
            .field("config", &self.config)
            .field("version", &self.current().version())
            .finish()
    }
}

impl PolicyStore {
    pub fn new(config: PolicyStoreConfig) -> Self {
        let layout = StageLayout::new(config.root.clone(), config.stage);
        Self {
            config,
            layout,
            active: ArcSwap::from_pointee(ActivePolicy::default()),
            stamps: Mutex::new(FileStamps::default()),
            listeners: RwLock::new(Vec::new()),
            writer: Mutex::new(()),
        }
    }

    pub fn layout(&self) -> &StageLayout {
        &self.layout
    }

    pub fn config(&self) -> &PolicyStoreConfig {
        &self.config
    }

    /// Current view. Never blocks on a reload.
    pub fn current(&self) -> Arc<ActivePolicy> {
        self.active.load_full()
    }

    /// Copy of one active component
    pub fn get(&self, component: PolicyComponent) -> Option<Value> {
        self.active.load().get(component)
    }

    pub fn routing_policy(&self) -> Option<RoutingPolicy> {
        self.active.load().package.as_ref()?.policies.routing.clone()
    }

    pub fn tool_policy(&self) -> Option<ToolPolicy> {
        self.active.load().package.as_ref()?.policies.tools.clone()
    }

    pub fn routing_state(&self) -> Option<RoutingSnapshot> {
        self.active.load().routing_state.clone()
    }

    pub fn tool_state(&self) -> Option<ToolSnapshot> {
        self.active.load().tool_state.clone()
    }

    /// Register a callback for component changes made by reloads
    pub fn subscribe(&self, listener: PolicyListener) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn current_stamps(&self) -> FileStamps {
        let pointer = file_stamp(&self.layout.pointer_path());
        let package = self
            .layout
            .read_pointer()
            .ok()
            .flatten()
            .and_then(|p| file_stamp(&self.layout.resolve(&p.package)));
        FileStamps {
            pointer,
            package,
            routing: file_stamp(&self.layout.routing_state_path()),
            tools: file_stamp(&self.layout.tool_state_path()),
        }
    }

    /// Load the stage from disk and make it live.
    ///
    /// Missing files are not an error; the corresponding parts are empty.
    pub fn load(&self) -> Result<Arc<ActivePolicy>> {
        // Held from stamping to swap so no save interleaves; released before
        // listeners run, as they may save.
        let (previous, candidate) = {
            let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
            let stamps = self.current_stamps();
            let result = self.read_candidate();
            *self.stamps.lock().unwrap_or_else(PoisonError::into_inner) = stamps;

            let candidate = Arc::new(result?);
            let previous = self.active.swap(Arc::clone(&candidate));
            (previous, candidate)
        };
        info!(
            stage = %self.config.stage,
            version = candidate.version().unwrap_or("none"),
            "Loaded policy"
        );
        self.notify_changes(&previous, &candidate);
        Ok(candidate)
    }

    /// Reload if any watched file changed since the last load.
    ///
    /// Returns whether a new view went live. On error the previous view stays.
    pub fn reload_if_changed(&self) -> Result<bool> {
        let stamps = self.current_stamps();
        {
            let seen = self.stamps.lock().unwrap_or_else(PoisonError::into_inner);
            if *seen == stamps {
                return Ok(false);
            }
        }
        debug!(stage = %self.config.stage, "Policy files changed, reloading");
        self.load().map(|_| true)
    }

    /// Parse and validate everything the stage directory holds
    fn read_candidate(&self) -> Result<ActivePolicy> {
        let pointer = self.layout.read_pointer()?;
        let package = match &pointer {
            Some(pointer) => {
                let bytes = std::fs::read(self.layout.resolve(&pointer.package))?;
                let actual = content_hash(&bytes);
                if actual != pointer.sha256 {
                    return Err(Error::PolicyValidation {
                        component: "package".into(),
                        message: format!(
                            "hash mismatch for {}: pointer has {}, file has {}",
                            pointer.package, pointer.sha256, actual
                        ),
                    });
                }
                Some(PolicyPackage::from_slice(&bytes)?)
            }
            None => None,
        };

        let routing_state = match std::fs::read(self.layout.routing_state_path()) {
            Ok(bytes) => {
                let snapshot: RoutingSnapshot = serde_json::from_slice(&bytes)?;
                self.check_routing_snapshot(&snapshot)?;
                Some(snapshot)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let tool_state = match std::fs::read(self.layout.tool_state_path()) {
            Ok(bytes) => Some(serde_json::from_slice::<ToolSnapshot>(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        Ok(ActivePolicy {
            pointer,
            package,
            routing_state,
            tool_state,
            loaded_at: Some(Utc::now()),
        })
    }

    fn check_routing_snapshot(&self, snapshot: &RoutingSnapshot) -> Result<()> {
        if let Some(expected) = self.config.expected_dim {
            if snapshot.dim != expected {
                return Err(Error::DimensionMismatch {
                    expected,
                    actual: snapshot.dim,
                });
            }
        }
        if let (Some(expected), Some(actual)) = (
            self.config.expected_fingerprint.as_deref(),
            snapshot.feature_fingerprint.as_deref(),
        ) {
            if expected != actual {
                return Err(Error::PolicyValidation {
                    component: PolicyComponent::RoutingState.to_string(),
                    message: format!(
                        "feature schema fingerprint {} does not match configured {}",
                        actual, expected
                    ),
                });
            }
        }
        for state in &snapshot.states {
            if state.a.len() != snapshot.dim * snapshot.dim || state.b.len() != snapshot.dim {
                return Err(Error::PolicyValidation {
                    component: PolicyComponent::RoutingState.to_string(),
                    message: format!("arm '{}' has malformed state", state.arm),
                });
            }
        }
        Ok(())
    }

    fn notify_changes(&self, previous: &ActivePolicy, next: &ActivePolicy) {
        let listeners: Vec<PolicyListener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if listeners.is_empty() {
            return;
        }
        for component in [
            PolicyComponent::Routing,
            PolicyComponent::Tools,
            PolicyComponent::Cache,
            PolicyComponent::Adapter,
            PolicyComponent::RoutingState,
            PolicyComponent::ToolState,
        ] {
            let Some(value) = next.get(component) else {
                continue;
            };
            if previous.get(component).as_ref() == Some(&value) {
                continue;
            }
            debug!(component = %component, "Notifying policy listeners");
            for listener in &listeners {
                listener(component, &value);
            }
        }
    }

    /// Persist a routing snapshot and make it the live routing state.
    ///
    /// The write does not trigger a reload of this store.
    pub fn save_routing_state(&self, snapshot: &RoutingSnapshot) -> Result<()> {
        self.check_routing_snapshot(snapshot)?;
        let path = self.layout.routing_state_path();

        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        write_json_atomic(&path, snapshot)?;
        self.stamps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .routing = file_stamp(&path);
        self.active.rcu(|current| {
            let mut next = ActivePolicy::clone(current);
            next.routing_state = Some(snapshot.clone());
            next
        });
        debug!(path = %path.display(), updates = snapshot.total_updates, "Saved routing state");
        Ok(())
    }

    /// Persist a tool snapshot and make it the live tool state
    pub fn save_tool_state(&self, snapshot: &ToolSnapshot) -> Result<()> {
        let path = self.layout.tool_state_path();

        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        write_json_atomic(&path, snapshot)?;
        self.stamps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tools = file_stamp(&path);
        self.active.rcu(|current| {
            let mut next = ActivePolicy::clone(current);
            next.tool_state = Some(snapshot.clone());
            next
        });
        debug!(path = %path.display(), updates = snapshot.total_updates, "Saved tool state");
        Ok(())
    }

    /// Spawn the background reload loop. Stops when `cancel` fires.
    pub fn spawn_reload_loop(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(store.config.reload_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(stage = %store.config.stage, "Policy reload loop stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let worker = Arc::clone(&store);
                        match tokio::task::spawn_blocking(move || worker.reload_if_changed()).await {
                            Ok(Ok(true)) => {
                                info!(stage = %store.config.stage, "Policy hot-reloaded");
                            }
                            Ok(Ok(false)) => {}
                            Ok(Err(error)) => {
                                warn!(%error, stage = %store.config.stage, "Policy reload rejected, keeping previous policy");
                            }
                            Err(error) => {
                                error!(%error, "Policy reload task failed");
                            }
                        }
                    }
                }
            }
        })
    }
}
