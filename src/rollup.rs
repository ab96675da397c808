mod aggregator;
mod calendar;
mod projector;
mod sensors;
mod series;
mod state;
mod types;


pub use aggregator::apply_reading;
pub use calendar::{days_in_month, CalendarZone};
pub use projector::{build_calendar_grid, CalendarGrid, GridSlot, SlotStats};
pub use series::trailing;
pub use state::SensorLocks;
pub use types::{
    BucketQuery, BucketSummary, CalendarKey, Granularity, Position, RollupSnapshot,
    SensorRecord, SensorStatus, TimeBucket,
};

pub(crate) use calendar::first_of_month_offset;

use crate::clock::{Clock, SystemClock};
use crate::stats::IngestStats;
use crate::store::SensorStore;
use std::sync::Arc;

/// Owns the rollup engine's collaborators: the record store, the per-sensor
/// write locks, the clock that stamps readings and the calendar zone keys
/// are computed in. Clones share all of them.
#[derive(Clone)]
pub struct RollupEngine {
    store: Arc<dyn SensorStore>,
    locks: SensorLocks,
    clock: Arc<dyn Clock>,
    zone: CalendarZone,
    stats: Arc<IngestStats>,
}

impl RollupEngine {
    pub fn new(store: Arc<dyn SensorStore>) -> Self {
        Self {
            store,
            locks: SensorLocks::new(),
            clock: Arc::new(SystemClock),
            zone: CalendarZone::utc(),
            stats: Arc::new(IngestStats::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_zone(mut self, zone: CalendarZone) -> Self {
        self.zone = zone;
        self
    }

    pub fn with_stats(mut self, stats: Arc<IngestStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn store(&self) -> Arc<dyn SensorStore> {
        self.store.clone()
    }

    pub fn locks(&self) -> SensorLocks {
        self.locks.clone()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn zone(&self) -> CalendarZone {
        self.zone
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }
}

fn normalize_sensor_id(sensor_id: &str) -> Result<&str, crate::error::RollupError> {
    let trimmed = sensor_id.trim();
    if trimmed.is_empty() {
        return Err(crate::error::RollupError::invalid("sensor id is required"));
    }
    Ok(trimmed)
}
