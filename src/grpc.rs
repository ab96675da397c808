use crate::error::RollupError;
use crate::rollup::{BucketSummary, Position, RollupEngine, SensorStatus, TimeBucket};
use crate::stats::IngestStats;
use anyhow::Result;
use std::path::Path;
use std::sync::atomic::Ordering;
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::{transport::Server, Request, Response, Status};
use tonic_health::server::health_reporter;

pub mod proto {
    tonic::include_proto!("lumen.rollup");
}

use proto::rollup_server::{Rollup, RollupServer};
use proto::{
    HealthRequest, HealthResponse, IngestRequest, IngestResponse, QueryRequest, QueryResponse,
    RegisterSensorRequest, RegisterSensorResponse,
};

#[derive(Clone)]
pub struct RollupService {
    engine: RollupEngine,
}

impl RollupService {
    pub fn new(engine: RollupEngine) -> Self {
        Self { engine }
    }

    fn to_health(stats: &IngestStats) -> HealthResponse {
        HealthResponse {
            accepted: stats.accepted.load(Ordering::Relaxed),
            rejected: stats.rejected.load(Ordering::Relaxed),
            last_persist_unix_ms: stats.last_persist_unix_ms.load(Ordering::Relaxed),
            average_persist_ms: stats.average_persist_micros.load(Ordering::Relaxed) as f64
                / 1000.0,
            sweeps_run: stats.sweeps_run.load(Ordering::Relaxed),
            buckets_cleared: stats.buckets_cleared.load(Ordering::Relaxed),
            mqtt_connected: stats.mqtt_connected.load(Ordering::Relaxed),
            last_error: stats.last_error().unwrap_or_default(),
            build: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

fn to_status(err: RollupError) -> Status {
    match err {
        RollupError::InvalidInput(message) => Status::invalid_argument(message),
        RollupError::NotFound(sensor_id) => {
            Status::not_found(format!("sensor {sensor_id} not found"))
        }
        RollupError::Persistence(err) => Status::unavailable(format!("persistence failure: {err:#}")),
    }
}

fn map_position(position: Option<proto::Position>) -> Option<Position> {
    position.map(|p| Position::new(p.latitude, p.longitude))
}

fn map_bucket(bucket: &TimeBucket) -> proto::Bucket {
    let key = bucket.key();
    proto::Bucket {
        year: key.year,
        month: key.month,
        day: key.day,
        hour: key.hour,
        values: bucket.values().to_vec(),
        sum: bucket.sum(),
        count: bucket.count(),
        timestamp_ms: bucket.timestamp().timestamp_millis(),
    }
}

fn map_buckets(buckets: &[TimeBucket]) -> Vec<proto::Bucket> {
    buckets.iter().map(map_bucket).collect()
}

fn map_summary(summary: &BucketSummary) -> proto::BucketSummary {
    proto::BucketSummary {
        year: summary.key.year,
        month: summary.key.month,
        day: summary.key.day,
        hour: summary.key.hour,
        readings_count: summary.readings_count,
        current_average: summary.current_average,
    }
}

#[tonic::async_trait]
impl Rollup for RollupService {
    async fn get_health(
        &self,
        _request: Request<HealthRequest>,
    ) -> Result<Response<HealthResponse>, Status> {
        let stats = self.engine.stats();
        Ok(Response::new(Self::to_health(&stats)))
    }

    async fn ingest(
        &self,
        request: Request<IngestRequest>,
    ) -> Result<Response<IngestResponse>, Status> {
        let payload = request.into_inner();
        let value = payload
            .value
            .ok_or_else(|| Status::invalid_argument("reading value is required"))?;
        let snapshot = self
            .engine
            .ingest(&payload.sensor_id, value, map_position(payload.position))
            .await
            .map_err(to_status)?;

        Ok(Response::new(IngestResponse {
            current_intensity: snapshot.current_intensity,
            observed_at_ms: snapshot.observed_at.timestamp_millis(),
            current_hour: Some(map_summary(&snapshot.current_hour)),
            current_day: Some(map_summary(&snapshot.current_day)),
            current_month: Some(map_summary(&snapshot.current_month)),
            current_year: Some(map_summary(&snapshot.current_year)),
            hourly: map_buckets(&snapshot.hourly),
            daily: map_buckets(&snapshot.daily),
            monthly: map_buckets(&snapshot.monthly),
            yearly: map_buckets(&snapshot.yearly),
        }))
    }

    async fn query(
        &self,
        request: Request<QueryRequest>,
    ) -> Result<Response<QueryResponse>, Status> {
        let payload = request.into_inner();
        let query = self
            .engine
            .query_named(&payload.sensor_id, &payload.granularity)
            .await
            .map_err(to_status)?;

        Ok(Response::new(QueryResponse {
            data: map_buckets(&query.data),
            current_date_ms: query.current_date.timestamp_millis(),
        }))
    }

    async fn register_sensor(
        &self,
        request: Request<RegisterSensorRequest>,
    ) -> Result<Response<RegisterSensorResponse>, Status> {
        let payload = request.into_inner();
        let status = payload
            .status
            .parse::<SensorStatus>()
            .map_err(to_status)?;
        let record = self
            .engine
            .register_sensor(&payload.sensor_id, status, map_position(payload.position))
            .await
            .map_err(to_status)?;

        Ok(Response::new(RegisterSensorResponse {
            sensor_id: record.sensor_id,
            status: record.status.to_string(),
        }))
    }
}

pub async fn serve_uds(socket_path: &str, service: RollupService) -> Result<()> {
    if Path::new(socket_path).exists() {
        tokio::fs::remove_file(socket_path).await.ok();
    }

    let uds = UnixListener::bind(socket_path)?;
    let (mut health_reporter, health_service) = health_reporter();
    health_reporter
        .set_serving::<RollupServer<RollupService>>()
        .await;

    let incoming = UnixListenerStream::new(uds);
    tracing::info!(socket = %socket_path, "gRPC listening");

    Server::builder()
        .add_service(health_service)
        .add_service(RollupServer::new(service))
        .serve_with_incoming(incoming)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use tonic::Code;

    fn service() -> RollupService {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 10, 14, 20, 0).unwrap());
        let engine = RollupEngine::new(Arc::new(MemoryStore::new())).with_clock(Arc::new(clock));
        RollupService::new(engine)
    }

    async fn register(service: &RollupService, sensor_id: &str) {
        service
            .register_sensor(Request::new(RegisterSensorRequest {
                sensor_id: sensor_id.to_string(),
                status: String::new(),
                position: Some(proto::Position {
                    latitude: 40.71,
                    longitude: -74.0,
                }),
            }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn ingest_then_query_over_rpc_types() {
        let service = service();
        register(&service, "SL-1").await;

        for value in [120.0, 140.0] {
            service
                .ingest(Request::new(IngestRequest {
                    sensor_id: "SL-1".to_string(),
                    value: Some(value),
                    position: None,
                }))
                .await
                .unwrap();
        }

        let response = service
            .query(Request::new(QueryRequest {
                sensor_id: "SL-1".to_string(),
                granularity: "hourly".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.data.len(), 1);
        let bucket = &response.data[0];
        assert_eq!((bucket.year, bucket.month, bucket.day, bucket.hour), (2024, Some(3), Some(10), Some(14)));
        assert_eq!(bucket.count, 2);
        assert_eq!(bucket.sum, 260.0);
        assert_eq!(
            bucket.timestamp_ms,
            Utc.with_ymd_and_hms(2024, 3, 10, 14, 0, 0).unwrap().timestamp_millis()
        );

        let health = service
            .get_health(Request::new(HealthRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(health.accepted, 2);
        assert_eq!(health.rejected, 0);
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let service = service();
        register(&service, "SL-1").await;

        let missing = service
            .ingest(Request::new(IngestRequest {
                sensor_id: "SL-404".to_string(),
                value: Some(1.0),
                position: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(missing.code(), Code::NotFound);

        let bad_value = service
            .ingest(Request::new(IngestRequest {
                sensor_id: "SL-1".to_string(),
                value: Some(f64::NAN),
                position: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(bad_value.code(), Code::InvalidArgument);

        let missing_value = service
            .ingest(Request::new(IngestRequest {
                sensor_id: "SL-1".to_string(),
                value: None,
                position: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(missing_value.code(), Code::InvalidArgument);
        let record = service.engine.sensor("SL-1").await.unwrap();
        assert!(record.hourly.is_empty());

        let bad_granularity = service
            .query(Request::new(QueryRequest {
                sensor_id: "SL-1".to_string(),
                granularity: "weekly".to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(bad_granularity.code(), Code::InvalidArgument);

        let persistence = to_status(RollupError::Persistence(anyhow::anyhow!("pool timed out")));
        assert_eq!(persistence.code(), Code::Unavailable);
    }
}
