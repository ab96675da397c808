use anyhow::Result;
use futures::future;
use lumen_rollup::config::Config;
use lumen_rollup::grpc::{serve_uds, RollupService};
use lumen_rollup::retention::{RetentionSweeper, SweepPlan, SweepScheduler};
use lumen_rollup::store::{MemoryStore, PgSensorStore, SensorStore};
use lumen_rollup::{mqtt, RollupEngine};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Installs the fmt subscriber, plus an OTLP span exporter when an
/// endpoint is configured.
fn init_tracing(config: &Config) -> Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as OTelTraceConfig, Resource};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,lumen_rollup=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    let traces_endpoint = config.otlp_endpoint.as_deref().and_then(otlp_traces_endpoint);
    let otel_layer = match &traces_endpoint {
        Some(endpoint) => {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(opentelemetry_otlp::new_exporter().http().with_endpoint(endpoint))
                .with_trace_config(OTelTraceConfig::default().with_resource(Resource::new(vec![
                    KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])))
                .install_batch(Tokio)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;

    if let Some(endpoint) = traces_endpoint {
        tracing::info!(endpoint = %endpoint, "exporting spans over OTLP");
    }
    Ok(())
}

/// OTLP/HTTP collector URL with the traces path appended; `None` for a blank
/// setting.
fn otlp_traces_endpoint(raw: &str) -> Option<String> {
    let base = raw.trim().trim_end_matches('/');
    if base.is_empty() {
        return None;
    }
    if base.ends_with("/v1/traces") {
        return Some(base.to_string());
    }
    Some(format!("{base}/v1/traces"))
}

async fn build_store(config: &Config) -> Result<Arc<dyn SensorStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PgSensorStore::connect(url, config.db_pool_size).await?;
            store.ensure_schema().await?;
            tracing::info!(pool_size = config.db_pool_size, "using Postgres sensor store");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("no database configured; aggregates are kept in memory only");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config)?;

    let store = build_store(&config).await?;
    let engine = RollupEngine::new(store).with_zone(config.calendar_zone()?);
    tracing::info!(
        utc_offset_minutes = config.calendar_utc_offset_minutes,
        retention_mode = ?config.retention_mode,
        "rollup engine ready"
    );

    let cancel = CancellationToken::new();
    let scheduler = SweepScheduler::new(
        RetentionSweeper::new(&engine, config.retention_mode),
        engine.clock(),
        engine.zone(),
        SweepPlan::defaults(),
    );
    let scheduler_handle = scheduler.start(config.sweep_poll_interval(), cancel.clone());

    let grpc_service = RollupService::new(engine.clone());
    let grpc_path = config.grpc_socket_path.clone();
    let grpc_handle = tokio::spawn(async move { serve_uds(&grpc_path, grpc_service).await });

    let mqtt_handle = if config.enable_mqtt_listener {
        let config_clone = config.clone();
        let engine_clone = engine.clone();
        Some(tokio::spawn(async move {
            mqtt::run_listener(config_clone, engine_clone).await
        }))
    } else {
        None
    };

    tokio::select! {
        res = grpc_handle => {
            match res {
                Ok(Err(err)) => tracing::error!(error = %format!("{err:#}"), "gRPC server exited"),
                Err(err) => tracing::error!(error = %err, "gRPC task failed"),
                Ok(Ok(())) => {}
            }
        }
        _ = async {
            if let Some(handle) = mqtt_handle {
                if let Err(err) = handle.await { tracing::warn!(error = %err, "MQTT task failed"); }
            } else {
                future::pending::<()>().await;
            }
        } => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    cancel.cancel();
    if let Err(err) = scheduler_handle.await {
        tracing::warn!(error = %err, "retention scheduler task failed");
    }

    Ok(())
}
