//! Promotion and rollback of policy packages
//!
//! Every pointer change is preceded by a rollback snapshot that holds the
//! exact bytes of the pointer and package it replaces, so a rollback puts back
//! a byte-identical active package.
//!
//! Promotion to the canary stage is followed by a stability window: the
//! health probe is polled on an interval until the window closes, each check
//! bounded by its own timeout. If the healthy share ends below the floor the
//! promotion is rolled back and reported as an error.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::health::{HealthProbe, HealthReport, HttpHealthProbe};
use crate::error::Error;
use crate::policy::{ActivePointer, PolicyPackage, Stage, StageLayout};
use crate::storage::{content_hash, write_atomic, write_json_atomic};
use crate::Result;

/// Default minimum healthy share during the canary stability window
pub const DEFAULT_STABILITY_FLOOR: f64 = 0.5;

/// `[deploy]` configuration section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Health endpoint polled before and after promotion
    pub health_url: Option<String>,
    pub health_timeout_ms: u64,
    /// Length of the post-promotion stability window
    pub stability_window_secs: u64,
    pub check_interval_secs: u64,
    pub stability_floor: f64,
    /// Rollback snapshots, and rollback history archives, kept per stage
    pub max_snapshots: usize,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            health_url: None,
            health_timeout_ms: 2_000,
            stability_window_secs: 60,
            check_interval_secs: 5,
            stability_floor: DEFAULT_STABILITY_FLOOR,
            max_snapshots: 20,
        }
    }
}

impl DeployConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.stability_floor) {
            return Err(Error::ConfigError(format!(
                "deploy.stability_floor must be in [0, 1], got {}",
                self.stability_floor
            )));
        }
        if self.check_interval_secs == 0 {
            return Err(Error::ConfigError("deploy.check_interval_secs must be positive".into()));
        }
        if self.health_timeout_ms == 0 {
            return Err(Error::ConfigError("deploy.health_timeout_ms must be positive".into()));
        }
        if self.max_snapshots == 0 {
            return Err(Error::ConfigError("deploy.max_snapshots must be positive".into()));
        }
        Ok(())
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }
}

/// Flags for one promotion
#[derive(Debug, Clone, Default)]
pub struct PromoteOptions {
    pub skip_preflight: bool,
    /// Promote invalid packages and ignore a failed pre-flight check
    pub force: bool,
    /// Cancelling during the stability window rolls the promotion back
    pub cancel: CancellationToken,
}

/// What happened in the pre-flight check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreflightOutcome {
    Passed,
    Skipped,
    /// No health probe configured
    NotConfigured,
    /// Failed but overridden with force
    Forced,
}

/// Health polling summary for the stability window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityReport {
    pub checks: usize,
    pub healthy: usize,
    pub ratio: f64,
    pub floor: f64,
}

impl StabilityReport {
    pub fn is_stable(&self) -> bool {
        self.ratio >= self.floor
    }
}

/// Result of a successful promotion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionReport {
    pub stage: Stage,
    pub version: String,
    pub previous_version: Option<String>,
    pub snapshot: PathBuf,
    pub preflight: PreflightOutcome,
    pub stability: Option<StabilityReport>,
}

/// Result of a rollback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub stage: Stage,
    /// Version active again, `None` if the stage had no package before
    pub restored_version: Option<String>,
    pub replaced_version: Option<String>,
    pub snapshot: PathBuf,
    /// Where the replaced state was archived
    pub history: PathBuf,
}

/// Current state of a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageStatus {
    pub stage: Stage,
    pub active: Option<ActivePointer>,
    pub package_valid: Option<bool>,
    pub snapshots: usize,
    pub latest_snapshot: Option<PathBuf>,
}

/// Saved pointer and package bytes of a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackSnapshot {
    pub stage: Stage,
    pub created_at: DateTime<Utc>,
    pub version: Option<String>,
    /// Package path relative to the stage directory
    pub package_path: Option<String>,
    /// base64 of `active.json`
    pub pointer_bytes: Option<String>,
    /// base64 of the package file
    pub package_bytes: Option<String>,
}

impl RollbackSnapshot {
    /// Capture the stage as it is on disk now
    fn capture(layout: &StageLayout) -> Result<Self> {
        let pointer_bytes = read_optional(&layout.pointer_path())?;
        let pointer: Option<ActivePointer> = match &pointer_bytes {
            Some(bytes) => Some(serde_json::from_slice(bytes)?),
            None => None,
        };
        let package_bytes = match &pointer {
            Some(p) => read_optional(&layout.resolve(&p.package))?,
            None => None,
        };
        Ok(Self {
            stage: layout.stage(),
            created_at: Utc::now(),
            version: pointer.as_ref().map(|p| p.version.clone()),
            package_path: pointer.map(|p| p.package),
            pointer_bytes: pointer_bytes.map(|b| STANDARD.encode(b)),
            package_bytes: package_bytes.map(|b| STANDARD.encode(b)),
        })
    }

    /// Put the captured bytes back; an empty snapshot clears the pointer
    fn restore(&self, layout: &StageLayout) -> Result<()> {
        if let (Some(relative), Some(encoded)) = (&self.package_path, &self.package_bytes) {
            write_atomic(&layout.resolve(relative), &decode(encoded)?)?;
        }
        match &self.pointer_bytes {
            Some(encoded) => write_atomic(&layout.pointer_path(), &decode(encoded)?),
            None => match std::fs::remove_file(layout.pointer_path()) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
        }
    }
}

fn decode(encoded: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(encoded)
        .map_err(|e| Error::InvalidInput(format!("corrupt rollback snapshot: {}", e)))
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Snapshot listing entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub version: Option<String>,
}

/// Moves packages through the canary and prod stages
pub struct DeploymentPipeline {
    root: PathBuf,
    config: DeployConfig,
    probe: Option<Arc<dyn HealthProbe>>,
    /// Serializes pointer changes within this process
    op_lock: Mutex<()>,
}

impl std::fmt::Debug for DeploymentPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentPipeline")
            .field("root", &self.root)
            .field("config", &self.config)
            .field("probe", &self.probe.is_some())
            .finish()
    }
}

impl DeploymentPipeline {
    /// Pipeline over a policy root; the probe comes from `health_url` if set
    pub fn new(root: impl Into<PathBuf>, config: DeployConfig) -> Result<Self> {
        config.validate()?;
        let probe: Option<Arc<dyn HealthProbe>> = match &config.health_url {
            Some(url) => Some(Arc::new(HttpHealthProbe::new(url.clone(), config.health_timeout())?)),
            None => None,
        };
        Ok(Self {
            root: root.into(),
            config,
            probe,
            op_lock: Mutex::new(()),
        })
    }

    /// Replace the health probe
    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    pub fn layout(&self, stage: Stage) -> StageLayout {
        StageLayout::new(&self.root, stage)
    }

    /// Make `package` the active package of `stage`
    pub async fn promote(
        &self,
        package: &PolicyPackage,
        stage: Stage,
        options: PromoteOptions,
    ) -> Result<PromotionReport> {
        let _guard = self.op_lock.lock().await;
        let layout = self.layout(stage);

        if !package.is_valid() {
            if !options.force {
                return Err(Error::InvalidPackage(package.version.clone()));
            }
            warn!(version = %package.version, "Promoting invalid package (forced)");
        }

        let preflight = self.preflight(&options).await?;

        let snapshot = RollbackSnapshot::capture(&layout)?;
        let previous_version = snapshot.version.clone();
        let snapshot_path = self.write_snapshot(&layout, &snapshot)?;

        let bytes = package.to_bytes()?;
        let relative = layout.package_relative(&package.version);
        write_atomic(&layout.resolve(&relative), &bytes)?;
        let pointer = ActivePointer {
            version: package.version.clone(),
            package: relative,
            sha256: content_hash(&bytes),
            activated_at: Utc::now(),
        };
        write_json_atomic(&layout.pointer_path(), &pointer)?;
        info!(
            stage = %stage,
            version = %package.version,
            previous = ?previous_version,
            "Promoted policy package"
        );

        let stability = match (&self.probe, stage) {
            (Some(probe), Stage::Canary) => {
                match self.monitor(probe.as_ref(), &options.cancel).await {
                    Some(report) if report.is_stable() => Some(report),
                    Some(report) => {
                        error!(
                            stage = %stage,
                            ratio = report.ratio,
                            floor = report.floor,
                            "Deployment unstable, rolling back"
                        );
                        self.rollback_locked(&layout)?;
                        return Err(Error::UnstableDeployment {
                            stage: stage.to_string(),
                            ratio: report.ratio,
                            floor: report.floor,
                        });
                    }
                    None => {
                        warn!(stage = %stage, "Promotion cancelled, rolling back");
                        self.rollback_locked(&layout)?;
                        return Err(Error::Other(format!(
                            "Promotion of '{}' to {} cancelled and rolled back",
                            package.version, stage
                        )));
                    }
                }
            }
            _ => None,
        };

        Ok(PromotionReport {
            stage,
            version: package.version.clone(),
            previous_version,
            snapshot: snapshot_path,
            preflight,
            stability,
        })
    }

    async fn preflight(&self, options: &PromoteOptions) -> Result<PreflightOutcome> {
        if options.skip_preflight {
            return Ok(PreflightOutcome::Skipped);
        }
        let Some(probe) = &self.probe else {
            info!("No health probe configured, skipping pre-flight check");
            return Ok(PreflightOutcome::NotConfigured);
        };

        let report = match tokio::time::timeout(self.config.health_timeout(), probe.check()).await {
            Ok(report) => report,
            Err(_) => HealthReport::unhealthy("health check timed out"),
        };
        if report.healthy {
            return Ok(PreflightOutcome::Passed);
        }
        let reason = report.message.unwrap_or_else(|| "unhealthy".to_string());
        if options.force {
            warn!(reason = %reason, "Pre-flight check failed, continuing (forced)");
            Ok(PreflightOutcome::Forced)
        } else {
            Err(Error::PreflightFailed(reason))
        }
    }

    /// Poll the probe until the window closes. `None` if cancelled.
    async fn monitor(&self, probe: &dyn HealthProbe, cancel: &CancellationToken) -> Option<StabilityReport> {
        let window = Duration::from_secs(self.config.stability_window_secs);
        let interval = Duration::from_secs(self.config.check_interval_secs.max(1));
        let deadline = Instant::now() + window;
        let mut checks = 0usize;
        let mut healthy = 0usize;

        loop {
            let ok = tokio::select! {
                _ = cancel.cancelled() => return None,
                result = tokio::time::timeout(self.config.health_timeout(), probe.check()) => {
                    matches!(result, Ok(report) if report.healthy)
                }
            };
            checks += 1;
            if ok {
                healthy += 1;
            }

            let next = Instant::now() + interval;
            if next > deadline {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep_until(next) => {}
            }
        }

        let ratio = healthy as f64 / checks as f64;
        info!(checks, healthy, ratio, "Stability window closed");
        Some(StabilityReport {
            checks,
            healthy,
            ratio,
            floor: self.config.stability_floor,
        })
    }

    /// Restore the most recent snapshot of `stage`
    pub async fn rollback(&self, stage: Stage) -> Result<RollbackReport> {
        let _guard = self.op_lock.lock().await;
        self.rollback_locked(&self.layout(stage))
    }

    fn rollback_locked(&self, layout: &StageLayout) -> Result<RollbackReport> {
        let stage = layout.stage();
        let latest = self
            .list_snapshots(stage)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NoRollbackSnapshot(stage.to_string()))?;
        let snapshot: RollbackSnapshot = serde_json::from_slice(&std::fs::read(&latest.path)?)?;

        let current = RollbackSnapshot::capture(layout)?;
        let history = write_archive(&layout.history_dir(), stage, &current)?;
        prune_archives(&layout.history_dir(), stage, self.config.max_snapshots)?;

        snapshot.restore(layout)?;
        std::fs::remove_file(&latest.path)?;

        info!(
            stage = %stage,
            restored = ?snapshot.version,
            replaced = ?current.version,
            "Rolled back policy package"
        );
        Ok(RollbackReport {
            stage,
            restored_version: snapshot.version,
            replaced_version: current.version,
            snapshot: latest.path,
            history,
        })
    }

    fn write_snapshot(&self, layout: &StageLayout, snapshot: &RollbackSnapshot) -> Result<PathBuf> {
        let path = write_archive(&layout.snapshots_dir(), layout.stage(), snapshot)?;
        self.prune_snapshots(layout.stage())?;
        Ok(path)
    }

    fn prune_snapshots(&self, stage: Stage) -> Result<()> {
        let snapshots = self.list_snapshots(stage)?;
        for old in snapshots.iter().skip(self.config.max_snapshots.max(1)) {
            std::fs::remove_file(&old.path)?;
        }
        Ok(())
    }

    /// Rollback snapshots of a stage, newest first
    pub fn list_snapshots(&self, stage: Stage) -> Result<Vec<SnapshotInfo>> {
        let paths = archive_files(&self.layout(stage).snapshots_dir(), stage)?;
        let mut snapshots = Vec::with_capacity(paths.len());
        for path in paths {
            match std::fs::read(&path)
                .map_err(Error::from)
                .and_then(|bytes| Ok(serde_json::from_slice::<RollbackSnapshot>(&bytes)?))
            {
                Ok(snapshot) => snapshots.push(SnapshotInfo {
                    path,
                    created_at: snapshot.created_at,
                    version: snapshot.version,
                }),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable snapshot"),
            }
        }
        Ok(snapshots)
    }

    /// Active pointer and snapshot count of a stage
    pub fn status(&self, stage: Stage) -> Result<StageStatus> {
        let layout = self.layout(stage);
        let active = layout.read_pointer()?;
        let package_valid = match &active {
            Some(pointer) => match std::fs::read(layout.resolve(&pointer.package)) {
                Ok(bytes) => PolicyPackage::from_slice(&bytes).ok().map(|p| p.is_valid()),
                Err(_) => None,
            },
            None => None,
        };
        let snapshots = self.list_snapshots(stage)?;
        Ok(StageStatus {
            stage,
            active,
            package_valid,
            snapshots: snapshots.len(),
            latest_snapshot: snapshots.into_iter().next().map(|s| s.path),
        })
    }
}

fn file_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%S%.6fZ").to_string()
}

fn snapshot_file_name(stage: Stage, at: DateTime<Utc>) -> String {
    format!("{}-{}.json", stage, file_timestamp(at))
}

/// Write a snapshot into `dir` under a time-ordered name
fn write_archive(dir: &Path, stage: Stage, snapshot: &RollbackSnapshot) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;

    // Names sort by time; bump past a same-instant collision
    let mut at = snapshot.created_at;
    let mut path = dir.join(snapshot_file_name(stage, at));
    while path.exists() {
        at += ChronoDuration::microseconds(1);
        path = dir.join(snapshot_file_name(stage, at));
    }
    write_json_atomic(&path, snapshot)?;
    Ok(path)
}

/// Archive files of `stage` in `dir`, newest first
fn archive_files(dir: &Path, stage: Stage) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let prefix = format!("{}-", stage);
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".json"))
        })
        .collect();
    paths.sort();
    paths.reverse();
    Ok(paths)
}

fn prune_archives(dir: &Path, stage: Stage, keep: usize) -> Result<()> {
    for old in archive_files(dir, stage)?.iter().skip(keep.max(1)) {
        debug!(path = %old.display(), "Pruning archived snapshot");
        std::fs::remove_file(old)?;
    }
    Ok(())
}
