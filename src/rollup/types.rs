use crate::error::RollupError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Calendar partition a bucket sequence is keyed on. Each level nests inside the next.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hourly,
    Daily,
    Monthly,
    Yearly,
}

impl Granularity {
    /// Ingestion order: hour, day, month, year.
    pub const ALL: [Granularity; 4] = [
        Granularity::Hourly,
        Granularity::Daily,
        Granularity::Monthly,
        Granularity::Yearly,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Hourly => "hourly",
            Granularity::Daily => "daily",
            Granularity::Monthly => "monthly",
            Granularity::Yearly => "yearly",
        }
    }

    /// Number of most recent buckets echoed back after an ingest.
    pub fn trailing_window(self) -> usize {
        match self {
            Granularity::Hourly => 24,
            Granularity::Daily => 31,
            Granularity::Monthly => 12,
            Granularity::Yearly => 5,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = RollupError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hourly" | "hour" => Ok(Granularity::Hourly),
            "daily" | "day" => Ok(Granularity::Daily),
            "monthly" | "month" => Ok(Granularity::Monthly),
            "yearly" | "year" => Ok(Granularity::Yearly),
            other => Err(RollupError::invalid(format!(
                "unrecognized granularity {other:?}; expected hourly, daily, monthly or yearly"
            ))),
        }
    }
}

/// The date fields identifying one bucket slot. Fields finer than the
/// granularity are `None`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CalendarKey {
    pub year: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<u32>,
}

impl CalendarKey {
    pub fn year(year: i32) -> Self {
        Self {
            year,
            month: None,
            day: None,
            hour: None,
        }
    }

    pub fn month(year: i32, month: u32) -> Self {
        Self {
            month: Some(month),
            ..Self::year(year)
        }
    }

    pub fn day(year: i32, month: u32, day: u32) -> Self {
        Self {
            day: Some(day),
            ..Self::month(year, month)
        }
    }

    pub fn hour(year: i32, month: u32, day: u32, hour: u32) -> Self {
        Self {
            hour: Some(hour),
            ..Self::day(year, month, day)
        }
    }

    pub fn granularity(&self) -> Granularity {
        match (self.month, self.day, self.hour) {
            (Some(_), Some(_), Some(_)) => Granularity::Hourly,
            (Some(_), Some(_), None) => Granularity::Daily,
            (Some(_), None, _) => Granularity::Monthly,
            _ => Granularity::Yearly,
        }
    }
}

/// Running aggregate over every reading that fell into one calendar slot.
///
/// The key is fixed at construction and `sum`/`count`/`values` only grow
/// through [`TimeBucket::record`], so `count == values.len()` and
/// `sum == Σ values` hold for every bucket built by the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeBucket {
    #[serde(flatten)]
    key: CalendarKey,
    values: Vec<f64>,
    sum: f64,
    count: u64,
    timestamp: DateTime<Utc>,
}

impl TimeBucket {
    pub fn open(key: CalendarKey, slot_start: DateTime<Utc>, value: f64) -> Self {
        Self {
            key,
            values: vec![value],
            sum: value,
            count: 1,
            timestamp: slot_start,
        }
    }

    pub(crate) fn record(&mut self, value: f64) {
        self.values.push(value);
        self.sum += value;
        self.count += 1;
    }

    pub fn key(&self) -> &CalendarKey {
        &self.key
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Start of the calendar slot, not the time of the last write.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// `sum / count`; undefined for an empty bucket.
    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn min_value(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::min)
    }

    pub fn max_value(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::max)
    }

    pub fn summary(&self) -> Option<BucketSummary> {
        Some(BucketSummary {
            key: self.key,
            readings_count: self.count,
            current_average: self.average()?,
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorStatus {
    #[default]
    Active,
    Inactive,
    Maintenance,
}

impl SensorStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SensorStatus::Active => "Active",
            SensorStatus::Inactive => "Inactive",
            SensorStatus::Maintenance => "Maintenance",
        }
    }
}

impl fmt::Display for SensorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorStatus {
    type Err = RollupError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "active" => Ok(SensorStatus::Active),
            "inactive" => Ok(SensorStatus::Inactive),
            "maintenance" => Ok(SensorStatus::Maintenance),
            other => Err(RollupError::invalid(format!("unknown sensor status {other:?}"))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn validate(&self) -> Result<(), RollupError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(RollupError::invalid(format!(
                "latitude {} out of range",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(RollupError::invalid(format!(
                "longitude {} out of range",
                self.longitude
            )));
        }
        Ok(())
    }
}

/// One physical sensor together with its four bucket sequences.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    pub sensor_id: String,
    #[serde(default)]
    pub status: SensorStatus,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub current_intensity: Option<f64>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub hourly: Vec<TimeBucket>,
    #[serde(default)]
    pub daily: Vec<TimeBucket>,
    #[serde(default)]
    pub monthly: Vec<TimeBucket>,
    #[serde(default)]
    pub yearly: Vec<TimeBucket>,
    /// Bumped by the store on every successful save.
    #[serde(default)]
    pub revision: i64,
}

impl SensorRecord {
    pub fn new(sensor_id: impl Into<String>, status: SensorStatus) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            status,
            position: None,
            current_intensity: None,
            last_updated: None,
            hourly: Vec::new(),
            daily: Vec::new(),
            monthly: Vec::new(),
            yearly: Vec::new(),
            revision: 0,
        }
    }

    pub fn with_position(mut self, position: Option<Position>) -> Self {
        self.position = position;
        self
    }

    pub fn buckets(&self, granularity: Granularity) -> &[TimeBucket] {
        match granularity {
            Granularity::Hourly => &self.hourly,
            Granularity::Daily => &self.daily,
            Granularity::Monthly => &self.monthly,
            Granularity::Yearly => &self.yearly,
        }
    }

    pub(crate) fn buckets_mut(&mut self, granularity: Granularity) -> &mut Vec<TimeBucket> {
        match granularity {
            Granularity::Hourly => &mut self.hourly,
            Granularity::Daily => &mut self.daily,
            Granularity::Monthly => &mut self.monthly,
            Granularity::Yearly => &mut self.yearly,
        }
    }
}

/// Count and average of the bucket a reading just landed in.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketSummary {
    #[serde(flatten)]
    pub key: CalendarKey,
    pub readings_count: u64,
    pub current_average: f64,
}

/// Result of one ingest: the touched bucket per granularity plus the
/// trailing windows of each sequence in insertion order.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupSnapshot {
    pub sensor_id: String,
    pub current_intensity: f64,
    pub observed_at: DateTime<Utc>,
    pub current_hour: BucketSummary,
    pub current_day: BucketSummary,
    pub current_month: BucketSummary,
    pub current_year: BucketSummary,
    pub hourly: Vec<TimeBucket>,
    pub daily: Vec<TimeBucket>,
    pub monthly: Vec<TimeBucket>,
    pub yearly: Vec<TimeBucket>,
}

impl RollupSnapshot {
    pub fn summary(&self, granularity: Granularity) -> &BucketSummary {
        match granularity {
            Granularity::Hourly => &self.current_hour,
            Granularity::Daily => &self.current_day,
            Granularity::Monthly => &self.current_month,
            Granularity::Yearly => &self.current_year,
        }
    }

    pub fn window(&self, granularity: Granularity) -> &[TimeBucket] {
        match granularity {
            Granularity::Hourly => &self.hourly,
            Granularity::Daily => &self.daily,
            Granularity::Monthly => &self.monthly,
            Granularity::Yearly => &self.yearly,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketQuery {
    pub data: Vec<TimeBucket>,
    pub current_date: DateTime<Utc>,
}
