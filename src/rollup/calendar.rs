use super::types::{CalendarKey, Granularity};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Offset, TimeZone, Timelike, Utc};

/// Fixed UTC offset in which calendar keys, slot starts and retention
/// cutoffs are computed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CalendarZone {
    offset: FixedOffset,
}

impl Default for CalendarZone {
    fn default() -> Self {
        Self::utc()
    }
}

impl CalendarZone {
    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }

    /// `None` when the offset is a day or more away from UTC.
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        let offset = FixedOffset::east_opt(minutes.checked_mul(60)?)?;
        Some(Self { offset })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn local(&self, at: DateTime<Utc>) -> DateTime<FixedOffset> {
        at.with_timezone(&self.offset)
    }

    pub fn key_for(&self, at: DateTime<Utc>, granularity: Granularity) -> CalendarKey {
        let local = self.local(at);
        match granularity {
            Granularity::Hourly => {
                CalendarKey::hour(local.year(), local.month(), local.day(), local.hour())
            }
            Granularity::Daily => CalendarKey::day(local.year(), local.month(), local.day()),
            Granularity::Monthly => CalendarKey::month(local.year(), local.month()),
            Granularity::Yearly => CalendarKey::year(local.year()),
        }
    }

    /// Instant the slot identified by `key` begins.
    pub fn slot_start(&self, key: &CalendarKey) -> Option<DateTime<Utc>> {
        let date = NaiveDate::from_ymd_opt(key.year, key.month.unwrap_or(1), key.day.unwrap_or(1))?;
        self.at_local(date, key.hour.unwrap_or(0), 0)
    }

    pub fn start_of_day(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.at_local(self.local(at).date_naive(), 0, 0)
    }

    pub fn start_of_month(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = self.local(at);
        self.at_local(NaiveDate::from_ymd_opt(local.year(), local.month(), 1)?, 0, 0)
    }

    pub fn start_of_year(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.at_local(NaiveDate::from_ymd_opt(self.local(at).year(), 1, 1)?, 0, 0)
    }

    pub(crate) fn at_local(&self, date: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
        let naive = date.and_hms_opt(hour, minute, 0)?;
        self.offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month >= 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(31)
}

/// First day of the month `months` months away from `date`'s month.
pub(crate) fn first_of_month_offset(date: NaiveDate, months: i32) -> Option<NaiveDate> {
    let index = date.year() * 12 + date.month0() as i32 + months;
    NaiveDate::from_ymd_opt(index.div_euclid(12), index.rem_euclid(12) as u32 + 1, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_carry_only_fields_for_their_granularity() {
        let zone = CalendarZone::utc();
        let at = Utc.with_ymd_and_hms(2024, 3, 10, 14, 20, 0).unwrap();

        assert_eq!(zone.key_for(at, Granularity::Hourly), CalendarKey::hour(2024, 3, 10, 14));
        assert_eq!(zone.key_for(at, Granularity::Daily), CalendarKey::day(2024, 3, 10));
        assert_eq!(zone.key_for(at, Granularity::Monthly), CalendarKey::month(2024, 3));
        assert_eq!(zone.key_for(at, Granularity::Yearly), CalendarKey::year(2024));
    }

    #[test]
    fn slot_start_is_derived_from_key() {
        let zone = CalendarZone::utc();
        assert_eq!(
            zone.slot_start(&CalendarKey::hour(2024, 3, 10, 14)),
            Some(Utc.with_ymd_and_hms(2024, 3, 10, 14, 0, 0).unwrap())
        );
        assert_eq!(
            zone.slot_start(&CalendarKey::month(2024, 3)),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            zone.slot_start(&CalendarKey::year(2024)),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(zone.slot_start(&CalendarKey::day(2023, 2, 30)), None);
    }

    #[test]
    fn offset_zone_shifts_keys_and_slot_starts() {
        let zone = CalendarZone::from_offset_minutes(330).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 10, 20, 0, 0).unwrap();

        let key = zone.key_for(at, Granularity::Hourly);
        assert_eq!(key, CalendarKey::hour(2024, 3, 11, 1));
        assert_eq!(
            zone.slot_start(&key),
            Some(Utc.with_ymd_and_hms(2024, 3, 10, 19, 30, 0).unwrap())
        );
        assert_eq!(
            zone.start_of_day(at),
            Some(Utc.with_ymd_and_hms(2024, 3, 10, 18, 30, 0).unwrap())
        );
    }

    #[test]
    fn rejects_offsets_of_a_day_or_more() {
        assert!(CalendarZone::from_offset_minutes(24 * 60).is_none());
        assert!(CalendarZone::from_offset_minutes(-(23 * 60)).is_some());
    }

    #[test]
    fn days_in_month_handles_leap_years_and_december() {
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2023, 2), 28);
        assert_eq!(days_in_month(2024, 12), 31);
        assert_eq!(days_in_month(2024, 4), 30);
    }

    #[test]
    fn first_of_month_offset_wraps_year() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(
            first_of_month_offset(date, -1),
            NaiveDate::from_ymd_opt(2023, 12, 1)
        );
        assert_eq!(
            first_of_month_offset(date, 0),
            NaiveDate::from_ymd_opt(2024, 1, 1)
        );
        assert_eq!(
            first_of_month_offset(date, -13),
            NaiveDate::from_ymd_opt(2022, 12, 1)
        );
        assert_eq!(
            first_of_month_offset(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(), 1),
            NaiveDate::from_ymd_opt(2025, 1, 1)
        );
    }
}
