use super::types::{Position, SensorRecord, SensorStatus};
use super::{normalize_sensor_id, RollupEngine};
use crate::error::{RollupError, RollupResult};

impl RollupEngine {
    /// Creates an empty aggregate record for a sensor the registry just added.
    pub async fn register_sensor(
        &self,
        sensor_id: &str,
        status: SensorStatus,
        position: Option<Position>,
    ) -> RollupResult<SensorRecord> {
        let sensor_id = normalize_sensor_id(sensor_id)?;
        if let Some(position) = &position {
            position.validate()?;
        }

        let record = SensorRecord::new(sensor_id, status).with_position(position);
        let inserted = self
            .store
            .insert(&record)
            .await
            .map_err(RollupError::persistence)?;
        if !inserted {
            return Err(RollupError::invalid(format!(
                "sensor {sensor_id} already exists"
            )));
        }

        tracing::info!(sensor = %sensor_id, status = %status, "sensor registered");
        Ok(record)
    }

    pub async fn sensor(&self, sensor_id: &str) -> RollupResult<SensorRecord> {
        let sensor_id = normalize_sensor_id(sensor_id)?;
        self.store
            .load(sensor_id)
            .await
            .map_err(RollupError::persistence)?
            .ok_or_else(|| RollupError::not_found(sensor_id))
    }

    /// Deletes the record while holding the sensor's lock so an in-flight
    /// ingest either lands before the delete or fails with `NotFound` after it.
    pub async fn remove_sensor(&self, sensor_id: &str) -> RollupResult<()> {
        let sensor_id = normalize_sensor_id(sensor_id)?;
        let removed = {
            let _guard = self.locks.acquire(sensor_id).await;
            self.store
                .remove(sensor_id)
                .await
                .map_err(RollupError::persistence)?
        };
        self.locks.forget(sensor_id).await;

        if !removed {
            return Err(RollupError::not_found(sensor_id));
        }
        tracing::info!(sensor = %sensor_id, "sensor removed");
        Ok(())
    }
}
