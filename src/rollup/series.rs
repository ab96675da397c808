use super::types::{BucketSummary, CalendarKey, TimeBucket};
use chrono::{DateTime, Utc};

/// Adds `value` to the bucket keyed `key`, appending a new bucket at the
/// end of the sequence when none matches. Lookup is a linear scan; retention
/// keeps sequences to roughly one calendar period.
pub(crate) fn record_reading(
    series: &mut Vec<TimeBucket>,
    key: CalendarKey,
    slot_start: DateTime<Utc>,
    value: f64,
) -> BucketSummary {
    let index = match series.iter().position(|bucket| *bucket.key() == key) {
        Some(index) => {
            series[index].record(value);
            index
        }
        None => {
            series.push(TimeBucket::open(key, slot_start, value));
            series.len() - 1
        }
    };

    let bucket = &series[index];
    BucketSummary {
        key,
        readings_count: bucket.count(),
        current_average: bucket.sum() / bucket.count() as f64,
    }
}

/// Last `len` buckets in insertion order, or the whole sequence when shorter.
pub fn trailing(series: &[TimeBucket], len: usize) -> &[TimeBucket] {
    &series[series.len().saturating_sub(len)..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap()
    }

    #[test]
    fn matching_key_updates_in_place() {
        let mut series = Vec::new();
        let key = CalendarKey::day(2024, 3, 10);

        let first = record_reading(&mut series, key, start(), 120.0);
        assert_eq!(first.readings_count, 1);

        let second = record_reading(&mut series, key, start(), 140.0);
        assert_eq!(series.len(), 1);
        assert_eq!(second.readings_count, 2);
        assert_eq!(second.current_average, 130.0);
        assert_eq!(series[0].values(), &[120.0, 140.0]);
    }

    #[test]
    fn new_keys_append_in_arrival_order() {
        let mut series = Vec::new();
        record_reading(&mut series, CalendarKey::day(2024, 3, 12), start(), 1.0);
        record_reading(&mut series, CalendarKey::day(2024, 3, 10), start(), 2.0);
        record_reading(&mut series, CalendarKey::day(2024, 3, 11), start(), 3.0);

        let days: Vec<Option<u32>> = series.iter().map(|b| b.key().day).collect();
        assert_eq!(days, vec![Some(12), Some(10), Some(11)]);
    }

    #[test]
    fn trailing_takes_positional_suffix() {
        let mut series = Vec::new();
        for day in 1..=5 {
            let slot = start() + Duration::days(day as i64);
            record_reading(&mut series, CalendarKey::day(2024, 3, day), slot, day as f64);
        }

        let tail = trailing(&series, 3);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].key().day, Some(3));
        assert_eq!(trailing(&series, 31).len(), 5);
        assert!(trailing(&[], 24).is_empty());
    }
}
