use super::SensorStore;
use crate::error::StoreConflict;
use crate::rollup::{Position, SensorRecord, SensorStatus, TimeBucket};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json as SqlJson;
use sqlx::{FromRow, PgPool};
use std::time::Duration;

/// One row per sensor; the four bucket sequences live in `jsonb` columns so
/// a record is read and written with a single statement.
#[derive(Clone, Debug)]
pub struct PgSensorStore {
    pool: PgPool,
}

#[derive(Debug, FromRow)]
struct SensorRow {
    sensor_id: String,
    status: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    current_intensity: Option<f64>,
    last_updated: Option<DateTime<Utc>>,
    hourly_data: SqlJson<Vec<TimeBucket>>,
    daily_data: SqlJson<Vec<TimeBucket>>,
    monthly_data: SqlJson<Vec<TimeBucket>>,
    yearly_data: SqlJson<Vec<TimeBucket>>,
    revision: i64,
}

impl SensorRow {
    fn into_record(self) -> Result<SensorRecord> {
        let status = self
            .status
            .parse::<SensorStatus>()
            .with_context(|| format!("sensor {} has invalid status", self.sensor_id))?;
        let position = match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(Position::new(latitude, longitude)),
            _ => None,
        };
        Ok(SensorRecord {
            sensor_id: self.sensor_id,
            status,
            position,
            current_intensity: self.current_intensity,
            last_updated: self.last_updated,
            hourly: self.hourly_data.0,
            daily: self.daily_data.0,
            monthly: self.monthly_data.0,
            yearly: self.yearly_data.0,
            revision: self.revision,
        })
    }
}

impl PgSensorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(8))
            .connect(database_url)
            .await
            .context("failed to connect to sensor database")?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS light_sensors (
                sensor_id text primary key,
                status text not null default 'Active',
                latitude double precision null,
                longitude double precision null,
                current_intensity double precision null,
                last_updated timestamptz null,
                hourly_data jsonb not null default '[]'::jsonb,
                daily_data jsonb not null default '[]'::jsonb,
                monthly_data jsonb not null default '[]'::jsonb,
                yearly_data jsonb not null default '[]'::jsonb,
                revision bigint not null default 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create light_sensors table")?;
        Ok(())
    }
}

#[async_trait]
impl SensorStore for PgSensorStore {
    async fn insert(&self, record: &SensorRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO light_sensors (
                sensor_id, status, latitude, longitude, current_intensity, last_updated,
                hourly_data, daily_data, monthly_data, yearly_data, revision
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (sensor_id) DO NOTHING
            "#,
        )
        .bind(&record.sensor_id)
        .bind(record.status.as_str())
        .bind(record.position.map(|p| p.latitude))
        .bind(record.position.map(|p| p.longitude))
        .bind(record.current_intensity)
        .bind(record.last_updated)
        .bind(SqlJson(&record.hourly))
        .bind(SqlJson(&record.daily))
        .bind(SqlJson(&record.monthly))
        .bind(SqlJson(&record.yearly))
        .bind(record.revision)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn load(&self, sensor_id: &str) -> Result<Option<SensorRecord>> {
        let row: Option<SensorRow> = sqlx::query_as(
            r#"
            SELECT
                sensor_id,
                status,
                latitude,
                longitude,
                current_intensity,
                last_updated,
                hourly_data,
                daily_data,
                monthly_data,
                yearly_data,
                revision
            FROM light_sensors
            WHERE sensor_id = $1
            "#,
        )
        .bind(sensor_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SensorRow::into_record).transpose()
    }

    async fn save(&self, record: &SensorRecord) -> Result<i64> {
        let revision: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE light_sensors
            SET
                status = $3,
                latitude = $4,
                longitude = $5,
                current_intensity = $6,
                last_updated = $7,
                hourly_data = $8,
                daily_data = $9,
                monthly_data = $10,
                yearly_data = $11,
                revision = revision + 1
            WHERE sensor_id = $1 AND revision = $2
            RETURNING revision
            "#,
        )
        .bind(&record.sensor_id)
        .bind(record.revision)
        .bind(record.status.as_str())
        .bind(record.position.map(|p| p.latitude))
        .bind(record.position.map(|p| p.longitude))
        .bind(record.current_intensity)
        .bind(record.last_updated)
        .bind(SqlJson(&record.hourly))
        .bind(SqlJson(&record.daily))
        .bind(SqlJson(&record.monthly))
        .bind(SqlJson(&record.yearly))
        .fetch_optional(&self.pool)
        .await?;

        revision.ok_or_else(|| {
            StoreConflict {
                sensor_id: record.sensor_id.clone(),
                expected: record.revision,
            }
            .into()
        })
    }

    async fn remove(&self, sensor_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM light_sensors WHERE sensor_id = $1")
            .bind(sensor_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn sensor_ids(&self) -> Result<Vec<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT sensor_id FROM light_sensors ORDER BY sensor_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollup::{CalendarKey, Granularity};
    use chrono::TimeZone;
    use std::env;

    async fn setup_test_store(database_url: &str, schema: &str) -> Result<PgSensorStore> {
        let admin_pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
            .execute(&admin_pool)
            .await?;
        drop(admin_pool);

        let schema_name = schema.to_string();
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .after_connect(move |conn, _meta| {
                let schema = schema_name.clone();
                Box::pin(async move {
                    sqlx::query(&format!("SET search_path TO {}", schema))
                        .execute(conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(database_url)
            .await?;

        let store = PgSensorStore::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn drop_schema(database_url: &str, schema: &str) -> Result<()> {
        let admin_pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        let _ = sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema))
            .execute(&admin_pool)
            .await;
        Ok(())
    }

    #[tokio::test]
    async fn test_pg_store_round_trips_buckets_and_rejects_stale_saves() -> Result<()> {
        if env::var("LUMEN_INTEGRATION_TEST").ok().as_deref() != Some("1") {
            return Ok(());
        }
        let database_url = match env::var("LUMEN_TEST_DATABASE_URL") {
            Ok(value) => value,
            Err(_) => return Ok(()),
        };
        let schema = format!("lumen_test_{}", std::process::id());
        let store = setup_test_store(&database_url, &schema).await?;

        let record = SensorRecord::new("SL-PG-1", SensorStatus::Maintenance)
            .with_position(Some(Position::new(12.97, 77.59)));
        assert!(store.insert(&record).await?);
        assert!(!store.insert(&record).await?);

        let mut loaded = store.load("SL-PG-1").await?.expect("record");
        assert_eq!(loaded.status, SensorStatus::Maintenance);
        assert_eq!(loaded.position, Some(Position::new(12.97, 77.59)));

        let start = Utc.with_ymd_and_hms(2024, 3, 10, 14, 0, 0).unwrap();
        let mut bucket = TimeBucket::open(CalendarKey::hour(2024, 3, 10, 14), start, 120.0);
        bucket.record(140.0);
        loaded.buckets_mut(Granularity::Hourly).push(bucket.clone());
        let stale = loaded.clone();
        assert_eq!(store.save(&loaded).await?, 1);

        let err = store.save(&stale).await.unwrap_err();
        assert!(err.downcast_ref::<StoreConflict>().is_some());

        let reloaded = store.load("SL-PG-1").await?.expect("record");
        assert_eq!(reloaded.hourly, vec![bucket]);
        assert_eq!(reloaded.revision, 1);
        assert_eq!(store.sensor_ids().await?, vec!["SL-PG-1".to_string()]);

        assert!(store.remove("SL-PG-1").await?);
        assert!(store.load("SL-PG-1").await?.is_none());

        drop_schema(&database_url, &schema).await?;
        Ok(())
    }
}
