use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::DecisionEngine;
use crate::episode::{Episode, EpisodeArchive};

/// Episodes taken off the channel per blocking batch
const MAX_BATCH: usize = 64;

/// Counters returned when the learner stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LearnerStats {
    pub episodes: u64,
    pub archived: u64,
    pub archive_failures: u64,
    pub snapshots: u64,
}

/// Spawn the background learner.
///
/// Every episode received is learned from exactly once and then appended to
/// the archive. On cancellation the episodes already queued are drained,
/// a final snapshot is written when a store is attached, and the task
/// returns its counters.
pub fn spawn_learner(
    engine: Arc<DecisionEngine>,
    archive: Option<Arc<EpisodeArchive>>,
    mut episodes: mpsc::Receiver<Episode>,
    cancel: CancellationToken,
) -> JoinHandle<LearnerStats> {
    tokio::spawn(async move {
        let mut stats = LearnerStats::default();

        loop {
            let first = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Learner cancelled, draining queued episodes");
                    break;
                }
                received = episodes.recv() => match received {
                    Some(episode) => episode,
                    None => break,
                },
            };

            let mut batch = vec![first];
            while batch.len() < MAX_BATCH {
                match episodes.try_recv() {
                    Ok(episode) => batch.push(episode),
                    Err(_) => break,
                }
            }
            process(&engine, &archive, batch, &mut stats).await;
        }

        episodes.close();
        let mut rest = Vec::new();
        while let Ok(episode) = episodes.try_recv() {
            rest.push(episode);
        }
        if !rest.is_empty() {
            process(&engine, &archive, rest, &mut stats).await;
        }

        if engine.store().is_some() {
            let worker = Arc::clone(&engine);
            match tokio::task::spawn_blocking(move || worker.snapshot_now()).await {
                Ok(Ok(())) => stats.snapshots += 1,
                Ok(Err(e)) => error!(error = %e, "Final snapshot failed"),
                Err(e) => error!(error = %e, "Final snapshot task failed"),
            }
        }

        info!(
            episodes = stats.episodes,
            archived = stats.archived,
            snapshots = stats.snapshots,
            "Learner stopped"
        );
        stats
    })
}

async fn process(
    engine: &Arc<DecisionEngine>,
    archive: &Option<Arc<EpisodeArchive>>,
    batch: Vec<Episode>,
    stats: &mut LearnerStats,
) {
    let engine = Arc::clone(engine);
    let archive = archive.clone();
    let count = batch.len() as u64;

    let result = tokio::task::spawn_blocking(move || {
        let mut archived = 0u64;
        let mut failures = 0u64;
        for episode in &batch {
            engine.learn(episode);
            if let Some(archive) = &archive {
                match archive.append(episode) {
                    Ok(()) => archived += 1,
                    Err(e) => {
                        failures += 1;
                        warn!(episode_id = %episode.episode_id, error = %e, "Failed to archive episode");
                    }
                }
            }
        }
        let snapshot = match engine.maybe_snapshot() {
            Ok(written) => written,
            Err(e) => {
                error!(error = %e, "Snapshot failed");
                false
            }
        };
        (archived, failures, snapshot)
    })
    .await;

    match result {
        Ok((archived, failures, snapshot)) => {
            stats.episodes += count;
            stats.archived += archived;
            stats.archive_failures += failures;
            if snapshot {
                stats.snapshots += 1;
            }
        }
        Err(e) => error!(error = %e, "Learner batch failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::features::{FeatureEncoder, FeatureRecord};
    use crate::policy::{PolicyStore, PolicyStoreConfig, Stage};
    use crate::reward::{Outcome, RewardCalculator};
    use crate::routing::RoutingBanditConfig;
    use std::time::Duration;
    use tempfile::TempDir;

    fn engine() -> DecisionEngine {
        DecisionEngine::new(
            FeatureEncoder::default(),
            RoutingBanditConfig::default(),
            RewardCalculator::default(),
            EngineConfig {
                snapshot_min_updates: 10,
                snapshot_min_interval: Duration::ZERO,
                tool_seed: Some(3),
            },
        )
        .unwrap()
    }

    fn episode(i: usize) -> Episode {
        Episode::new(format!("s{}", i), "faq")
            .with_context(FeatureRecord::new().with("intent", "faq"))
            .with_arm("planner")
            .with_tool("kb")
            .with_outcome(Outcome {
                success: true,
                ..Default::default()
            })
    }

    #[tokio::test]
    async fn test_each_episode_learned_once_and_archived() {
        let dir = TempDir::new().unwrap();
        let archive = Arc::new(EpisodeArchive::new(dir.path().join("episodes.jsonl")));
        let engine = Arc::new(engine());
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = spawn_learner(engine.clone(), Some(archive.clone()), rx, cancel.clone());

        for i in 0..25 {
            tx.send(episode(i)).await.unwrap();
        }
        drop(tx);
        let stats = handle.await.unwrap();

        assert_eq!(stats.episodes, 25);
        assert_eq!(stats.archived, 25);
        assert_eq!(engine.routing().total_updates(), 25);
        assert_eq!(engine.tools().stats("faq", "kb").unwrap().pulls, 25);

        let archived = archive.read_all().unwrap();
        assert_eq!(archived.len(), 25);
        let mut ids: Vec<_> = archived.iter().map(|e| e.session_id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 25);
    }

    #[tokio::test]
    async fn test_cancel_drains_and_snapshots() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(PolicyStore::new(PolicyStoreConfig::new(dir.path(), Stage::Prod)));
        let engine = Arc::new(engine().with_store(store.clone()));
        let (tx, rx) = mpsc::channel(64);
        for i in 0..5 {
            tx.send(episode(i)).await.unwrap();
        }

        let cancel = CancellationToken::new();
        cancel.cancel();
        let stats = spawn_learner(engine.clone(), None, rx, cancel).await.unwrap();

        assert_eq!(stats.episodes, 5);
        assert_eq!(stats.archived, 0);
        assert!(stats.snapshots >= 1);
        assert_eq!(store.routing_state().unwrap().total_updates, 5);
        assert!(tx.send(episode(9)).await.is_err());
    }
}
