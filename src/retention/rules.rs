use crate::rollup::{first_of_month_offset, CalendarZone, Granularity};
use chrono::{DateTime, Datelike, NaiveDate, Utc};

/// When a sweep fires and how old a bucket must be to count as stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CutoffRule {
    /// Fires at every local midnight; stale means before the start of yesterday.
    StartOfYesterday,
    /// Fires at 00:01 on the first of every month; stale means before the
    /// start of last month.
    StartOfLastMonth,
    /// Fires at 00:02 on January 1st; stale means before the start of last year.
    StartOfLastYear,
}

impl CutoffRule {
    fn firing_minute(self) -> u32 {
        match self {
            CutoffRule::StartOfYesterday => 0,
            CutoffRule::StartOfLastMonth => 1,
            CutoffRule::StartOfLastYear => 2,
        }
    }

    pub fn cutoff(self, zone: &CalendarZone, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = zone.local(now).date_naive();
        let date = match self {
            CutoffRule::StartOfYesterday => today.pred_opt()?,
            CutoffRule::StartOfLastMonth => first_of_month_offset(today, -1)?,
            CutoffRule::StartOfLastYear => NaiveDate::from_ymd_opt(today.year() - 1, 1, 1)?,
        };
        zone.at_local(date, 0, 0)
    }

    /// First firing instant strictly after `after`.
    pub fn next_firing(self, zone: &CalendarZone, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = zone.local(after).date_naive();
        let (current, following) = match self {
            CutoffRule::StartOfYesterday => (today, today.succ_opt()?),
            CutoffRule::StartOfLastMonth => (
                first_of_month_offset(today, 0)?,
                first_of_month_offset(today, 1)?,
            ),
            CutoffRule::StartOfLastYear => (
                NaiveDate::from_ymd_opt(today.year(), 1, 1)?,
                NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)?,
            ),
        };

        let minute = self.firing_minute();
        let candidate = zone.at_local(current, 0, minute)?;
        if candidate > after {
            return Some(candidate);
        }
        zone.at_local(following, 0, minute)
    }
}

/// A cutoff rule paired with the sequence it sweeps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SweepPlan {
    pub rule: CutoffRule,
    pub granularity: Granularity,
}

impl SweepPlan {
    pub fn new(rule: CutoffRule, granularity: Granularity) -> Self {
        Self { rule, granularity }
    }

    /// Hourly history each midnight, daily history each month start, yearly
    /// history each new year. Monthly history is never swept.
    pub fn defaults() -> Vec<SweepPlan> {
        vec![
            SweepPlan::new(CutoffRule::StartOfYesterday, Granularity::Hourly),
            SweepPlan::new(CutoffRule::StartOfLastMonth, Granularity::Daily),
            SweepPlan::new(CutoffRule::StartOfLastYear, Granularity::Yearly),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn cutoffs_for_each_rule() {
        let zone = CalendarZone::utc();
        let now = at(2024, 3, 10, 0, 0);
        assert_eq!(
            CutoffRule::StartOfYesterday.cutoff(&zone, now),
            Some(at(2024, 3, 9, 0, 0))
        );
        assert_eq!(
            CutoffRule::StartOfLastMonth.cutoff(&zone, now),
            Some(at(2024, 2, 1, 0, 0))
        );
        assert_eq!(
            CutoffRule::StartOfLastYear.cutoff(&zone, now),
            Some(at(2023, 1, 1, 0, 0))
        );
    }

    #[test]
    fn last_month_cutoff_wraps_into_previous_year() {
        let zone = CalendarZone::utc();
        assert_eq!(
            CutoffRule::StartOfLastMonth.cutoff(&zone, at(2024, 1, 1, 0, 1)),
            Some(at(2023, 12, 1, 0, 0))
        );
    }

    #[test]
    fn next_firing_is_strictly_after() {
        let zone = CalendarZone::utc();

        let rule = CutoffRule::StartOfYesterday;
        assert_eq!(rule.next_firing(&zone, at(2024, 3, 10, 15, 0)), Some(at(2024, 3, 11, 0, 0)));
        assert_eq!(rule.next_firing(&zone, at(2024, 3, 11, 0, 0)), Some(at(2024, 3, 12, 0, 0)));

        let rule = CutoffRule::StartOfLastMonth;
        assert_eq!(rule.next_firing(&zone, at(2024, 3, 1, 0, 0)), Some(at(2024, 3, 1, 0, 1)));
        assert_eq!(rule.next_firing(&zone, at(2024, 12, 15, 9, 0)), Some(at(2025, 1, 1, 0, 1)));

        let rule = CutoffRule::StartOfLastYear;
        assert_eq!(rule.next_firing(&zone, at(2024, 6, 1, 0, 0)), Some(at(2025, 1, 1, 0, 2)));
        assert_eq!(rule.next_firing(&zone, at(2025, 1, 1, 0, 1)), Some(at(2025, 1, 1, 0, 2)));
    }

    #[test]
    fn firing_follows_calendar_zone() {
        let zone = CalendarZone::from_offset_minutes(-300).unwrap();
        // 03:00 UTC is 22:00 the previous day at UTC-5; next local midnight is 05:00 UTC.
        assert_eq!(
            CutoffRule::StartOfYesterday.next_firing(&zone, at(2024, 3, 10, 3, 0)),
            Some(at(2024, 3, 10, 5, 0))
        );
    }

    #[test]
    fn default_plans_skip_monthly_history() {
        let plans = SweepPlan::defaults();
        assert_eq!(plans.len(), 3);
        assert!(plans.iter().all(|plan| plan.granularity != Granularity::Monthly));
    }
}
