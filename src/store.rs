mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgSensorStore;

use crate::rollup::SensorRecord;
use anyhow::Result;
use async_trait::async_trait;

/// Persistence for whole sensor aggregate records.
///
/// `save` is a compare-and-swap on [`SensorRecord::revision`]: it only
/// succeeds when the stored revision still equals the one the caller
/// loaded, and returns the new revision. A stale save fails with
/// [`crate::error::StoreConflict`] and leaves the stored record untouched.
#[async_trait]
pub trait SensorStore: Send + Sync {
    /// Stores a new record. Returns `false` when the id is already taken.
    async fn insert(&self, record: &SensorRecord) -> Result<bool>;

    async fn load(&self, sensor_id: &str) -> Result<Option<SensorRecord>>;

    async fn save(&self, record: &SensorRecord) -> Result<i64>;

    async fn remove(&self, sensor_id: &str) -> Result<bool>;

    async fn sensor_ids(&self) -> Result<Vec<String>>;
}
