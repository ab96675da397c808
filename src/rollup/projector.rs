use super::calendar::{days_in_month, CalendarZone};
use super::types::{BucketQuery, CalendarKey, Granularity, TimeBucket};
use super::{normalize_sensor_id, RollupEngine};
use crate::error::{RollupError, RollupResult};
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use std::collections::HashMap;

const MONTH_LABELS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SlotStats {
    pub average: f64,
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl SlotStats {
    fn of(bucket: &TimeBucket) -> Option<Self> {
        Some(Self {
            average: bucket.average()?,
            count: bucket.count(),
            min: bucket.min_value(),
            max: bucket.max_value(),
        })
    }
}

/// One cell of the dense grid. `stats` is `None` when no bucket exists for
/// the slot, which callers render as "no data" rather than zero.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GridSlot {
    pub label: String,
    #[serde(flatten)]
    pub key: CalendarKey,
    pub stats: Option<SlotStats>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarGrid {
    pub granularity: Granularity,
    pub current_date: DateTime<Utc>,
    pub slots: Vec<GridSlot>,
}

impl CalendarGrid {
    pub fn filled(&self) -> impl Iterator<Item = &GridSlot> {
        self.slots.iter().filter(|slot| slot.stats.is_some())
    }
}

/// Lays the stored buckets onto the calendar grid around `now`: the 24 hours
/// of today, the days of this month, the 12 months of this year, or every
/// year from the oldest to the newest stored yearly bucket.
pub fn build_calendar_grid(
    zone: &CalendarZone,
    granularity: Granularity,
    buckets: &[TimeBucket],
    now: DateTime<Utc>,
) -> CalendarGrid {
    let local = zone.local(now);
    let (year, month, day) = (local.year(), local.month(), local.day());

    let keys: Vec<(String, CalendarKey)> = match granularity {
        Granularity::Hourly => (0..24)
            .map(|hour| (format!("{hour:02}:00"), CalendarKey::hour(year, month, day, hour)))
            .collect(),
        Granularity::Daily => (1..=days_in_month(year, month))
            .map(|d| (format!("Day {d}"), CalendarKey::day(year, month, d)))
            .collect(),
        Granularity::Monthly => (1..=12u32)
            .map(|m| {
                let label = MONTH_LABELS[(m - 1) as usize].to_string();
                (label, CalendarKey::month(year, m))
            })
            .collect(),
        Granularity::Yearly => {
            let years = buckets.iter().map(|bucket| bucket.key().year);
            match (years.clone().min(), years.max()) {
                (Some(first), Some(last)) => (first..=last)
                    .map(|y| (y.to_string(), CalendarKey::year(y)))
                    .collect(),
                _ => Vec::new(),
            }
        }
    };

    // Later duplicates win, matching a keyed left join over insertion order.
    let by_key: HashMap<CalendarKey, &TimeBucket> =
        buckets.iter().map(|bucket| (*bucket.key(), bucket)).collect();

    let slots = keys
        .into_iter()
        .map(|(label, key)| GridSlot {
            label,
            key,
            stats: by_key.get(&key).and_then(|bucket| SlotStats::of(bucket)),
        })
        .collect();

    CalendarGrid {
        granularity,
        current_date: now,
        slots,
    }
}

impl RollupEngine {
    /// Full stored sequence for one granularity, unfiltered, in insertion
    /// order, plus the engine's notion of now.
    pub async fn query(
        &self,
        sensor_id: &str,
        granularity: Granularity,
    ) -> RollupResult<BucketQuery> {
        let sensor_id = normalize_sensor_id(sensor_id)?;
        let record = self
            .store
            .load(sensor_id)
            .await
            .map_err(RollupError::persistence)?
            .ok_or_else(|| RollupError::not_found(sensor_id))?;

        Ok(BucketQuery {
            data: record.buckets(granularity).to_vec(),
            current_date: self.clock.now(),
        })
    }

    /// [`RollupEngine::query`] with the granularity given by name.
    pub async fn query_named(&self, sensor_id: &str, granularity: &str) -> RollupResult<BucketQuery> {
        let granularity = granularity.parse::<Granularity>()?;
        self.query(sensor_id, granularity).await
    }

    pub async fn calendar_grid(
        &self,
        sensor_id: &str,
        granularity: Granularity,
    ) -> RollupResult<CalendarGrid> {
        let query = self.query(sensor_id, granularity).await?;
        Ok(build_calendar_grid(
            &self.zone,
            granularity,
            &query.data,
            query.current_date,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bucket(key: CalendarKey, values: &[f64]) -> TimeBucket {
        let zone = CalendarZone::utc();
        let start = zone.slot_start(&key).unwrap();
        let mut bucket = TimeBucket::open(key, start, values[0]);
        for value in &values[1..] {
            bucket.record(*value);
        }
        bucket
    }

    #[test]
    fn hourly_grid_has_24_slots_for_today_only() {
        let zone = CalendarZone::utc();
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 18, 0, 0).unwrap();
        let buckets = vec![
            bucket(CalendarKey::hour(2024, 3, 9, 14), &[50.0]),
            bucket(CalendarKey::hour(2024, 3, 10, 14), &[120.0, 140.0]),
        ];

        let grid = build_calendar_grid(&zone, Granularity::Hourly, &buckets, now);
        assert_eq!(grid.slots.len(), 24);
        assert_eq!(grid.slots[14].label, "14:00");

        let filled: Vec<&GridSlot> = grid.filled().collect();
        assert_eq!(filled.len(), 1);
        let stats = filled[0].stats.unwrap();
        assert_eq!(filled[0].key, CalendarKey::hour(2024, 3, 10, 14));
        assert_eq!(stats.average, 130.0);
        assert_eq!(stats.count, 2);
        assert_eq!(stats.min, Some(120.0));
        assert_eq!(stats.max, Some(140.0));
        assert_eq!(grid.slots[13].stats, None);
    }

    #[test]
    fn daily_grid_covers_days_in_current_month() {
        let zone = CalendarZone::utc();
        let now = Utc.with_ymd_and_hms(2024, 2, 10, 0, 0, 0).unwrap();
        let grid = build_calendar_grid(&zone, Granularity::Daily, &[], now);
        assert_eq!(grid.slots.len(), 29);
        assert_eq!(grid.slots[28].label, "Day 29");
        assert_eq!(grid.filled().count(), 0);
    }

    #[test]
    fn monthly_grid_uses_month_names() {
        let zone = CalendarZone::utc();
        let now = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();
        let buckets = vec![bucket(CalendarKey::month(2024, 3), &[10.0, 30.0])];
        let grid = build_calendar_grid(&zone, Granularity::Monthly, &buckets, now);
        assert_eq!(grid.slots.len(), 12);
        assert_eq!(grid.slots[2].label, "Mar");
        assert_eq!(grid.slots[2].stats.map(|s| s.average), Some(20.0));
    }

    #[test]
    fn yearly_grid_spans_min_to_max_stored_year() {
        let zone = CalendarZone::utc();
        let now = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();
        let buckets = vec![
            bucket(CalendarKey::year(2024), &[4.0]),
            bucket(CalendarKey::year(2021), &[2.0]),
        ];
        let grid = build_calendar_grid(&zone, Granularity::Yearly, &buckets, now);
        let labels: Vec<&str> = grid.slots.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["2021", "2022", "2023", "2024"]);
        assert_eq!(grid.filled().count(), 2);

        let empty = build_calendar_grid(&zone, Granularity::Yearly, &[], now);
        assert!(empty.slots.is_empty());
    }
}
