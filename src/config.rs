use crate::retention::RetentionMode;
use crate::rollup::CalendarZone;
use anyhow::{Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_SETUP_CONFIG_PATH: &str = "/etc/lumen-rollup/config.json";

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_value(key).and_then(|value| value.parse::<T>().ok())
}

fn setup_config_path() -> PathBuf {
    env_value("LUMEN_SETUP_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETUP_CONFIG_PATH))
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SetupConfigOverrides {
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default)]
    db_pool_size: Option<u32>,
    #[serde(default)]
    mqtt_host: Option<String>,
    #[serde(default)]
    mqtt_port: Option<u16>,
    #[serde(default)]
    mqtt_username: Option<String>,
    #[serde(default)]
    mqtt_password: Option<String>,
    #[serde(default)]
    mqtt_topic_prefix: Option<String>,
    #[serde(default)]
    mqtt_keepalive_secs: Option<u64>,
    #[serde(default)]
    enable_mqtt_listener: Option<bool>,
    #[serde(default)]
    grpc_socket_path: Option<String>,
    #[serde(default)]
    calendar_utc_offset_minutes: Option<i32>,
    #[serde(default)]
    sweep_poll_interval_ms: Option<u64>,
    #[serde(default)]
    retention_mode: Option<String>,
}

fn parse_setup_overrides(bytes: &mut [u8]) -> Result<SetupConfigOverrides> {
    simd_json::serde::from_slice(bytes).context("setup config is not valid JSON")
}

fn load_setup_config_overrides() -> Option<SetupConfigOverrides> {
    let path = setup_config_path();
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to read setup config; using env defaults"
            );
            return None;
        }
    };
    let mut bytes = contents.into_bytes();
    match parse_setup_overrides(&mut bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %format!("{err:#}"),
                "failed to parse setup config; using env defaults"
            );
            None
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Copies setup-file values into `config` for every key the environment
/// left unset.
fn apply_setup_overrides(
    config: &mut Config,
    overrides: &SetupConfigOverrides,
    env_allows: impl Fn(&str) -> bool,
) -> Result<()> {
    if env_allows("LUMEN_DATABASE_URL") && env_allows("DATABASE_URL") {
        if let Some(url) = non_empty(overrides.database_url.as_deref()) {
            config.database_url = Some(normalize_database_url(url));
        }
    }
    if env_allows("LUMEN_DB_POOL_SIZE") {
        if let Some(value) = overrides.db_pool_size.filter(|v| *v != 0) {
            config.db_pool_size = value;
        }
    }
    if env_allows("LUMEN_MQTT_HOST") {
        if let Some(host) = non_empty(overrides.mqtt_host.as_deref()) {
            config.mqtt_host = host;
        }
    }
    if env_allows("LUMEN_MQTT_PORT") {
        if let Some(port) = overrides.mqtt_port.filter(|v| *v != 0) {
            config.mqtt_port = port;
        }
    }
    if env_allows("LUMEN_MQTT_USERNAME") {
        if let Some(username) = overrides.mqtt_username.as_deref() {
            config.mqtt_username = non_empty(Some(username));
        }
    }
    if env_allows("LUMEN_MQTT_PASSWORD") {
        if let Some(password) = overrides.mqtt_password.as_deref() {
            config.mqtt_password = non_empty(Some(password));
        }
    }
    if env_allows("LUMEN_MQTT_TOPIC_PREFIX") {
        if let Some(prefix) = non_empty(overrides.mqtt_topic_prefix.as_deref()) {
            config.mqtt_topic_prefix = prefix;
        }
    }
    if env_allows("LUMEN_MQTT_KEEPALIVE_SECS") {
        if let Some(value) = overrides.mqtt_keepalive_secs.filter(|v| *v != 0) {
            config.mqtt_keepalive_secs = value;
        }
    }
    if env_allows("LUMEN_ENABLE_MQTT") {
        if let Some(value) = overrides.enable_mqtt_listener {
            config.enable_mqtt_listener = value;
        }
    }
    if env_allows("LUMEN_GRPC_SOCKET") {
        if let Some(path) = non_empty(overrides.grpc_socket_path.as_deref()) {
            config.grpc_socket_path = path;
        }
    }
    if env_allows("LUMEN_CALENDAR_UTC_OFFSET_MINUTES") {
        if let Some(value) = overrides.calendar_utc_offset_minutes {
            config.calendar_utc_offset_minutes = value;
        }
    }
    if env_allows("LUMEN_SWEEP_POLL_INTERVAL_MS") {
        if let Some(value) = overrides.sweep_poll_interval_ms.filter(|v| *v != 0) {
            config.sweep_poll_interval_ms = value;
        }
    }
    if env_allows("LUMEN_RETENTION_MODE") {
        if let Some(mode) = non_empty(overrides.retention_mode.as_deref()) {
            config.retention_mode = mode
                .parse()
                .context("invalid retention_mode in setup config")?;
        }
    }
    Ok(())
}

#[derive(Clone, Debug)]
pub struct Config {
    /// `None` runs the engine on the in-memory store.
    pub database_url: Option<String>,
    pub db_pool_size: u32,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_topic_prefix: String,
    pub mqtt_keepalive_secs: u64,
    pub mqtt_client_id: String,
    pub enable_mqtt_listener: bool,
    pub grpc_socket_path: String,
    pub calendar_utc_offset_minutes: i32,
    pub sweep_poll_interval_ms: u64,
    pub retention_mode: RetentionMode,
    pub otlp_endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            db_pool_size: 10,
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_username: None,
            mqtt_password: None,
            mqtt_topic_prefix: "lumen".to_string(),
            mqtt_keepalive_secs: 30,
            mqtt_client_id: format!("lumen-rollup-{}", std::process::id()),
            enable_mqtt_listener: true,
            grpc_socket_path: "/tmp/lumen_rollup.sock".to_string(),
            calendar_utc_offset_minutes: 0,
            sweep_poll_interval_ms: 30_000,
            retention_mode: RetentionMode::ClearSequence,
            otlp_endpoint: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let defaults = Config::default();
        let database_url = env_value("LUMEN_DATABASE_URL")
            .or_else(|| env_value("DATABASE_URL"))
            .map(normalize_database_url);
        let retention_mode = match env_value("LUMEN_RETENTION_MODE") {
            Some(raw) => raw.parse().context("LUMEN_RETENTION_MODE is invalid")?,
            None => defaults.retention_mode,
        };

        let mut config = Self {
            database_url,
            db_pool_size: env_parsed("LUMEN_DB_POOL_SIZE").unwrap_or(defaults.db_pool_size),
            mqtt_host: env_value("LUMEN_MQTT_HOST").unwrap_or(defaults.mqtt_host),
            mqtt_port: env_parsed("LUMEN_MQTT_PORT").unwrap_or(defaults.mqtt_port),
            mqtt_username: env_value("LUMEN_MQTT_USERNAME"),
            mqtt_password: env_value("LUMEN_MQTT_PASSWORD"),
            mqtt_topic_prefix: env_value("LUMEN_MQTT_TOPIC_PREFIX")
                .unwrap_or(defaults.mqtt_topic_prefix),
            mqtt_keepalive_secs: env_parsed("LUMEN_MQTT_KEEPALIVE_SECS")
                .unwrap_or(defaults.mqtt_keepalive_secs),
            mqtt_client_id: env_value("LUMEN_MQTT_CLIENT_ID").unwrap_or(defaults.mqtt_client_id),
            enable_mqtt_listener: env_value("LUMEN_ENABLE_MQTT")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.enable_mqtt_listener),
            grpc_socket_path: env_value("LUMEN_GRPC_SOCKET").unwrap_or(defaults.grpc_socket_path),
            calendar_utc_offset_minutes: env_parsed("LUMEN_CALENDAR_UTC_OFFSET_MINUTES")
                .unwrap_or(defaults.calendar_utc_offset_minutes),
            sweep_poll_interval_ms: env_parsed("LUMEN_SWEEP_POLL_INTERVAL_MS")
                .unwrap_or(defaults.sweep_poll_interval_ms),
            retention_mode,
            otlp_endpoint: env_value("OTEL_EXPORTER_OTLP_ENDPOINT"),
        };

        if let Some(overrides) = load_setup_config_overrides() {
            apply_setup_overrides(&mut config, &overrides, |key| env_value(key).is_none())?;
        }

        // Fail at startup rather than on the first reading.
        config.calendar_zone()?;
        Ok(config)
    }

    pub fn calendar_zone(&self) -> Result<CalendarZone> {
        CalendarZone::from_offset_minutes(self.calendar_utc_offset_minutes).with_context(|| {
            format!(
                "calendar UTC offset {} minutes is out of range",
                self.calendar_utc_offset_minutes
            )
        })
    }

    pub fn mqtt_keepalive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keepalive_secs)
    }

    pub fn sweep_poll_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_poll_interval_ms)
    }
}

fn normalize_database_url(url: String) -> String {
    if let Some(stripped) = url.strip_prefix("postgresql+psycopg://") {
        return format!("postgresql://{stripped}");
    }
    if let Some(stripped) = url.strip_prefix("postgresql+asyncpg://") {
        return format!("postgresql://{stripped}");
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides(json: &str) -> SetupConfigOverrides {
        let mut bytes = json.as_bytes().to_vec();
        parse_setup_overrides(&mut bytes).unwrap()
    }

    #[test]
    fn setup_file_fills_unset_keys() {
        let mut config = Config::default();
        let ov = overrides(
            r#"{
                "database_url": "postgresql+asyncpg://lumen@db/lumen",
                "mqtt_host": " broker.local ",
                "mqtt_port": 8883,
                "mqtt_username": "",
                "calendar_utc_offset_minutes": -300,
                "retention_mode": "prune",
                "unknown_key": 1
            }"#,
        );

        apply_setup_overrides(&mut config, &ov, |_| true).unwrap();
        assert_eq!(config.database_url.as_deref(), Some("postgresql://lumen@db/lumen"));
        assert_eq!(config.mqtt_host, "broker.local");
        assert_eq!(config.mqtt_port, 8883);
        assert_eq!(config.mqtt_username, None);
        assert_eq!(config.retention_mode, RetentionMode::PruneStale);
        assert_eq!(
            config.calendar_zone().unwrap().offset().local_minus_utc(),
            -300 * 60
        );
    }

    #[test]
    fn environment_wins_over_setup_file() {
        let mut config = Config {
            mqtt_port: 1884,
            ..Config::default()
        };
        let ov = overrides(r#"{"mqtt_port": 8883, "mqtt_topic_prefix": "site"}"#);

        apply_setup_overrides(&mut config, &ov, |key| key != "LUMEN_MQTT_PORT").unwrap();
        assert_eq!(config.mqtt_port, 1884);
        assert_eq!(config.mqtt_topic_prefix, "site");
    }

    #[test]
    fn bad_retention_mode_in_setup_file_is_an_error() {
        let mut config = Config::default();
        let ov = overrides(r#"{"retention_mode": "archive"}"#);
        assert!(apply_setup_overrides(&mut config, &ov, |_| true).is_err());
    }

    #[test]
    fn out_of_range_offset_is_rejected() {
        let config = Config {
            calendar_utc_offset_minutes: 24 * 60,
            ..Config::default()
        };
        assert!(config.calendar_zone().is_err());
    }
}
