use super::calendar::CalendarZone;
use super::series::{record_reading, trailing};
use super::types::{Granularity, Position, RollupSnapshot, SensorRecord};
use super::{normalize_sensor_id, RollupEngine};
use crate::error::{RollupError, RollupResult};
use chrono::{DateTime, Utc};
use std::time::Instant;

/// Folds one reading into every granularity of `record`, hour first, and
/// updates the record's last value, position and timestamp.
///
/// Only the in-memory record is touched; nothing is persisted here.
pub fn apply_reading(
    record: &mut SensorRecord,
    zone: &CalendarZone,
    value: f64,
    observed_at: DateTime<Utc>,
    position: Option<Position>,
) -> RollupResult<RollupSnapshot> {
    if !value.is_finite() {
        return Err(RollupError::invalid(format!("reading {value} is not a finite number")));
    }

    // Resolve and check every slot first so a rejected reading leaves the
    // record untouched.
    let mut slots = Vec::with_capacity(Granularity::ALL.len());
    for granularity in Granularity::ALL {
        let key = zone.key_for(observed_at, granularity);
        let slot_start = zone.slot_start(&key).ok_or_else(|| {
            RollupError::invalid(format!("no {granularity} slot for {observed_at}"))
        })?;
        let running = record
            .buckets(granularity)
            .iter()
            .find(|bucket| *bucket.key() == key)
            .map_or(0.0, |bucket| bucket.sum());
        if !(running + value).is_finite() {
            return Err(RollupError::invalid(format!(
                "reading {value} would overflow the {granularity} sum"
            )));
        }
        slots.push((granularity, key, slot_start));
    }

    let mut summaries = Vec::with_capacity(slots.len());
    for (granularity, key, slot_start) in slots {
        summaries.push(record_reading(
            record.buckets_mut(granularity),
            key,
            slot_start,
            value,
        ));
    }

    record.current_intensity = Some(value);
    if let Some(position) = position {
        record.position = Some(position);
    }
    record.last_updated = Some(observed_at);

    let window = |granularity: Granularity| {
        trailing(record.buckets(granularity), granularity.trailing_window()).to_vec()
    };
    Ok(RollupSnapshot {
        sensor_id: record.sensor_id.clone(),
        current_intensity: value,
        observed_at,
        current_hour: summaries[0],
        current_day: summaries[1],
        current_month: summaries[2],
        current_year: summaries[3],
        hourly: window(Granularity::Hourly),
        daily: window(Granularity::Daily),
        monthly: window(Granularity::Monthly),
        yearly: window(Granularity::Yearly),
    })
}

impl RollupEngine {
    /// Ingests a reading stamped with the engine clock's current time.
    pub async fn ingest(
        &self,
        sensor_id: &str,
        value: f64,
        position: Option<Position>,
    ) -> RollupResult<RollupSnapshot> {
        let observed_at = self.clock.now();
        self.ingest_at(sensor_id, value, observed_at, position).await
    }

    pub async fn ingest_at(
        &self,
        sensor_id: &str,
        value: f64,
        observed_at: DateTime<Utc>,
        position: Option<Position>,
    ) -> RollupResult<RollupSnapshot> {
        let result = self
            .ingest_locked(sensor_id, value, observed_at, position)
            .await;
        if let Err(err) = &result {
            self.stats.record_rejected();
            if matches!(err, RollupError::Persistence(_)) {
                self.stats.record_error(err.to_string());
            }
        }
        result
    }

    async fn ingest_locked(
        &self,
        sensor_id: &str,
        value: f64,
        observed_at: DateTime<Utc>,
        position: Option<Position>,
    ) -> RollupResult<RollupSnapshot> {
        let sensor_id = normalize_sensor_id(sensor_id)?;
        if let Some(position) = &position {
            position.validate()?;
        }

        let guard = self.locks.acquire(sensor_id).await;
        let loaded = self
            .store
            .load(sensor_id)
            .await
            .map_err(RollupError::persistence)?;
        let Some(mut record) = loaded else {
            // Unknown ids must not leave a lock entry behind.
            drop(guard);
            self.locks.forget(sensor_id).await;
            tracing::warn!(sensor = %sensor_id, "reading for unknown sensor");
            return Err(RollupError::not_found(sensor_id));
        };

        let snapshot = apply_reading(&mut record, &self.zone, value, observed_at, position)?;

        let started = Instant::now();
        self.store
            .save(&record)
            .await
            .map_err(RollupError::persistence)?;
        self.stats.record_persist(started.elapsed());

        tracing::debug!(
            sensor = %sensor_id,
            value,
            hour_count = snapshot.current_hour.readings_count,
            day_count = snapshot.current_day.readings_count,
            "reading rolled up"
        );
        Ok(snapshot)
    }
}
