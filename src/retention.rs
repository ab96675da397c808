mod rules;
mod scheduler;

pub use rules::{CutoffRule, SweepPlan};
pub use scheduler::SweepScheduler;

use crate::rollup::{Granularity, RollupEngine, SensorLocks, TimeBucket};
use crate::stats::IngestStats;
use crate::store::SensorStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::sync::Arc;

/// What a sweep does to a sequence that holds buckets older than the cutoff.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetentionMode {
    /// Empty the whole sequence, recent buckets included.
    #[default]
    ClearSequence,
    /// Drop only the buckets that started before the cutoff.
    PruneStale,
}

impl FromStr for RetentionMode {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "clear" | "clear_sequence" => Ok(RetentionMode::ClearSequence),
            "prune" | "prune_stale" => Ok(RetentionMode::PruneStale),
            other => anyhow::bail!("unknown retention mode {other:?}; expected clear or prune"),
        }
    }
}

/// Applies `mode` to one sequence and returns how many buckets were dropped.
pub fn apply_retention(
    series: &mut Vec<TimeBucket>,
    cutoff: DateTime<Utc>,
    mode: RetentionMode,
) -> usize {
    let before = series.len();
    match mode {
        RetentionMode::ClearSequence => {
            if series.iter().any(|bucket| bucket.timestamp() < cutoff) {
                series.clear();
            }
        }
        RetentionMode::PruneStale => series.retain(|bucket| bucket.timestamp() >= cutoff),
    }
    before - series.len()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweepReport {
    pub granularity: Granularity,
    pub cutoff: DateTime<Utc>,
    pub scanned: usize,
    pub swept_sensors: usize,
    pub removed_buckets: usize,
    pub failed: usize,
}

/// Runs retention passes over every stored sensor, one sensor at a time
/// under the same per-sensor lock ingestion uses.
#[derive(Clone)]
pub struct RetentionSweeper {
    store: Arc<dyn SensorStore>,
    locks: SensorLocks,
    mode: RetentionMode,
    stats: Arc<IngestStats>,
}

impl RetentionSweeper {
    pub fn new(engine: &RollupEngine, mode: RetentionMode) -> Self {
        Self {
            store: engine.store(),
            locks: engine.locks(),
            mode,
            stats: engine.stats(),
        }
    }

    pub fn mode(&self) -> RetentionMode {
        self.mode
    }

    /// Errors only when the sensor list cannot be read; a failure on one
    /// sensor is logged, counted in `failed` and the pass moves on.
    pub async fn sweep(
        &self,
        granularity: Granularity,
        cutoff: DateTime<Utc>,
    ) -> Result<SweepReport> {
        let ids = self
            .store
            .sensor_ids()
            .await
            .context("failed to list sensors for retention sweep")?;

        let mut report = SweepReport {
            granularity,
            cutoff,
            scanned: ids.len(),
            swept_sensors: 0,
            removed_buckets: 0,
            failed: 0,
        };

        for sensor_id in &ids {
            match self.sweep_sensor(sensor_id, granularity, cutoff).await {
                Ok(0) => {}
                Ok(removed) => {
                    report.swept_sensors += 1;
                    report.removed_buckets += removed;
                }
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(
                        sensor = %sensor_id,
                        granularity = %granularity,
                        error = %format!("{err:#}"),
                        "retention sweep failed for sensor"
                    );
                }
            }
        }

        self.stats.record_sweep(report.removed_buckets as u64);
        tracing::info!(
            granularity = %granularity,
            cutoff = %cutoff,
            scanned = report.scanned,
            swept = report.swept_sensors,
            removed = report.removed_buckets,
            failed = report.failed,
            "retention sweep completed"
        );
        Ok(report)
    }

    async fn sweep_sensor(
        &self,
        sensor_id: &str,
        granularity: Granularity,
        cutoff: DateTime<Utc>,
    ) -> Result<usize> {
        let _guard = self.locks.acquire(sensor_id).await;
        let Some(mut record) = self.store.load(sensor_id).await? else {
            return Ok(0);
        };

        let removed = apply_retention(record.buckets_mut(granularity), cutoff, self.mode);
        if removed > 0 {
            self.store.save(&record).await?;
            tracing::debug!(sensor = %sensor_id, granularity = %granularity, removed, "buckets swept");
        }
        Ok(removed)
    }
}
