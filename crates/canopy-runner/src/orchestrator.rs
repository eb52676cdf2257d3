//! Batch orchestration: list tiles, fan out, gather, report.

use crate::error::{BatchError, TaskError};
use crate::manifest::{Manifest, TileStatus};
use crate::metrics::metric_defs;
use crate::pool::{TaskOutcome, WorkerPool};
use crate::task::{TileRef, TileTask};
use canopy_common::{CancelToken, TaskContext};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Tile counts by final status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub complete: usize,
    pub partial: usize,
    pub failed: usize,
}

/// Aggregated result of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: BatchSummary,
    /// One manifest per tile, ordered by stem.
    pub tiles: Vec<Manifest>,
}

impl BatchReport {
    /// Aggregate manifests. The result does not depend on their order.
    pub fn new(started_at: DateTime<Utc>, finished_at: DateTime<Utc>, mut tiles: Vec<Manifest>) -> Self {
        tiles.sort_by(|a, b| a.stem.cmp(&b.stem).then_with(|| a.tile.cmp(&b.tile)));
        let mut summary = BatchSummary {
            total: tiles.len(),
            ..Default::default()
        };
        for manifest in &tiles {
            match manifest.status {
                TileStatus::Complete => summary.complete += 1,
                TileStatus::Partial => summary.partial += 1,
                TileStatus::Failed => summary.failed += 1,
            }
        }
        Self {
            started_at,
            finished_at,
            summary,
            tiles,
        }
    }

    /// No tile failed outright.
    pub fn is_success(&self) -> bool {
        self.summary.failed == 0
    }

    /// Manifest of the tile with the given stem.
    pub fn tile(&self, stem: &str) -> Option<&Manifest> {
        self.tiles.iter().find(|m| m.stem == stem)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Runs a whole batch: every tile under the input prefix, in parallel.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    task: Arc<TileTask>,
    cancel: CancelToken,
}

impl Orchestrator {
    pub fn new(task: TileTask) -> Self {
        Self {
            task: Arc::new(task),
            cancel: CancelToken::new(),
        }
    }

    /// Token that cancels the running batch.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// List the input prefix and describe every tile in it.
    ///
    /// Fails when two tiles share a stem, since their products would share
    /// output keys.
    pub fn discover(&self) -> Result<Vec<TileRef>, BatchError> {
        let config = self.task.config();
        let prefix = match config.input_prefix.trim_matches('/') {
            "" => String::new(),
            p => format!("{p}/"),
        };
        let store = self.task.input_store();
        let ctx = TaskContext::new(self.cancel.clone(), None);
        let keys = config.retry.run("list", &ctx, || store.list(&prefix))?;

        let mut stems: BTreeMap<String, String> = BTreeMap::new();
        let mut tiles = Vec::new();
        for key in keys {
            let Some(tile) = TileRef::from_key(&key) else {
                tracing::trace!(%key, "Skipping non-tile object");
                continue;
            };
            if let Some(first) = stems.insert(tile.stem.clone(), key.clone()) {
                return Err(BatchError::DuplicateStem {
                    stem: tile.stem,
                    first,
                    second: key,
                });
            }
            tiles.push(tile);
        }
        Ok(tiles)
    }

    /// Process every tile and wait for all of them.
    pub fn run(&self) -> Result<BatchReport, BatchError> {
        let started_at = Utc::now();
        let tiles = self.discover()?;
        let config = self.task.config();
        if tiles.is_empty() {
            tracing::warn!(prefix = %config.input_prefix, "No tiles found");
        }
        tracing::info!(
            tiles = tiles.len(),
            workers = config.workers,
            timeout_secs = ?config.task_timeout_secs,
            "Starting batch"
        );

        let pool = WorkerPool::new(config.workers)
            .with_task_timeout(config.task_timeout())
            .with_cancel_token(self.cancel.clone());
        let task = Arc::clone(&self.task);
        let handle = pool.submit(
            move |tile: &TileRef, ctx: &TaskContext| match task.run(tile, ctx).to_json() {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(tile = %tile.key, error = %e, "Failed to encode manifest");
                    String::new()
                }
            },
            tiles,
        )?;

        let manifests = handle
            .gather()
            .into_iter()
            .map(|(tile, outcome)| manifest_from_outcome(&tile, outcome))
            .collect::<Vec<_>>();
        for manifest in &manifests {
            record_metrics(manifest);
        }

        let report = BatchReport::new(started_at, Utc::now(), manifests);
        tracing::info!(
            total = report.summary.total,
            complete = report.summary.complete,
            partial = report.summary.partial,
            failed = report.summary.failed,
            "Batch finished"
        );
        Ok(report)
    }
}

/// Turn a pool outcome into the tile's manifest.
fn manifest_from_outcome(tile: &TileRef, outcome: TaskOutcome) -> Manifest {
    let err = match outcome {
        TaskOutcome::Finished(payload) => match Manifest::from_json(&payload) {
            Ok(manifest) => return manifest,
            Err(e) => TaskError::MalformedResult(e.to_string()),
        },
        TaskOutcome::TimedOut => TaskError::TimedOut,
        TaskOutcome::Cancelled => TaskError::Cancelled,
        TaskOutcome::Panicked(message) => TaskError::Panicked(message),
    };
    tracing::error!(tile = %tile.key, error = %err, "Tile did not report");
    Manifest::failed(tile, &err, 0)
}

fn record_metrics(manifest: &Manifest) {
    metrics::counter!(metric_defs::TILES_PROCESSED.name, "status" => manifest.status.as_str())
        .increment(1);
    if manifest.status == TileStatus::Failed {
        let kind = manifest
            .failure
            .as_ref()
            .map_or_else(|| "publish".to_string(), |f| f.kind.clone());
        metrics::counter!(metric_defs::TILES_FAILED.name, "kind" => kind).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BatchConfig;
    use canopy_store::{MemoryStore, ObjectStore};

    fn orchestrator(store: Arc<MemoryStore>) -> Orchestrator {
        let config = Arc::new(BatchConfig::default());
        Orchestrator::new(TileTask::new(config, store))
    }

    #[test]
    fn test_discover_filters_and_sorts() {
        let store = Arc::new(MemoryStore::new());
        for key in ["tiles/b.laz", "tiles/a.las", "tiles/notes.txt", "tilesets/c.laz", "other/d.laz"] {
            store.put(key, b"x").unwrap();
        }
        let tiles = orchestrator(store).discover().unwrap();
        let stems: Vec<_> = tiles.iter().map(|t| t.stem.as_str()).collect();
        assert_eq!(stems, ["a", "b"]);
    }

    #[test]
    fn test_duplicate_stems_rejected() {
        let store = Arc::new(MemoryStore::new());
        store.put("tiles/2023/t1.laz", b"x").unwrap();
        store.put("tiles/2024/t1.laz", b"x").unwrap();
        let err = orchestrator(store).discover().unwrap_err();
        assert!(matches!(
            err,
            BatchError::DuplicateStem { ref stem, .. } if stem == "t1"
        ));
    }

    #[test]
    fn test_report_is_order_independent() {
        let tile = |key: &str| TileRef::from_key(key).unwrap();
        let a = Manifest::failed(&tile("tiles/a.laz"), &TaskError::Cancelled, 0);
        let b = Manifest::published(&tile("tiles/b.laz"), vec![], vec![], 1);
        let now = Utc::now();
        let forward = BatchReport::new(now, now, vec![a.clone(), b.clone()]);
        let backward = BatchReport::new(now, now, vec![b, a]);
        assert_eq!(forward, backward);
        assert_eq!(forward.summary.failed, 1);
        assert_eq!(forward.summary.complete, 1);
        assert!(!forward.is_success());
        assert_eq!(forward.tile("b").unwrap().duration_ms, 1);
    }

    #[test]
    fn test_pool_outcomes_become_failed_manifests() {
        let tile = TileRef::from_key("tiles/t1.laz").unwrap();
        for (outcome, kind) in [
            (TaskOutcome::TimedOut, "timed_out"),
            (TaskOutcome::Cancelled, "cancelled"),
            (TaskOutcome::Panicked("boom".into()), "panicked"),
            (TaskOutcome::Finished("{".into()), "malformed_result"),
        ] {
            let manifest = manifest_from_outcome(&tile, outcome);
            assert_eq!(manifest.status, TileStatus::Failed);
            assert_eq!(manifest.failure.unwrap().kind, kind);
        }
    }
}
