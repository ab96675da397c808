use super::SensorStore;
use crate::error::StoreConflict;
use crate::rollup::SensorRecord;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Process-local store. Records are cloned in and out so callers never
/// observe a half-applied update.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<String, SensorRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl SensorStore for MemoryStore {
    async fn insert(&self, record: &SensorRecord) -> Result<bool> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.sensor_id) {
            return Ok(false);
        }
        records.insert(record.sensor_id.clone(), record.clone());
        Ok(true)
    }

    async fn load(&self, sensor_id: &str) -> Result<Option<SensorRecord>> {
        Ok(self.records.read().await.get(sensor_id).cloned())
    }

    async fn save(&self, record: &SensorRecord) -> Result<i64> {
        let mut records = self.records.write().await;
        let current = records
            .get_mut(&record.sensor_id)
            .filter(|current| current.revision == record.revision)
            .ok_or_else(|| StoreConflict {
                sensor_id: record.sensor_id.clone(),
                expected: record.revision,
            })?;
        *current = record.clone();
        current.revision = record.revision + 1;
        Ok(current.revision)
    }

    async fn remove(&self, sensor_id: &str) -> Result<bool> {
        Ok(self.records.write().await.remove(sensor_id).is_some())
    }

    async fn sensor_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.records.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
