//! Repeating weekly intervals and the overlap arithmetic the schedule
//! reconciler and deploy-lifetime metrics are built on.

use chrono::{DateTime, Datelike, Duration, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A clock-time-of-day, `{hour, minute}`, as used by `RepeatingInterval`
/// start/end bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClockTime {
    pub hour: u32,
    pub minute: u32,
}

impl ClockTime {
    pub fn new(hour: u32, minute: u32) -> Self {
        Self { hour, minute }
    }

    fn to_naive(self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or_else(|| {
            NaiveTime::from_hms_opt(0, 0, 0).expect("midnight is always valid")
        })
    }
}

/// `days: set<Weekday>, start: ClockTime, end: ClockTime`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepeatingInterval {
    pub days: BTreeSet<Weekday>,
    pub start: ClockTime,
    pub end: ClockTime,
}

impl RepeatingInterval {
    /// True iff `moment`'s weekday is in `days` and its time-of-day lies
    /// in `[start, end]`, both bounds inclusive.
    pub fn includes(&self, moment: DateTime<Utc>) -> bool {
        if !self.days.contains(&moment.weekday()) {
            return false;
        }
        let t = NaiveTime::from_hms_opt(moment.hour(), moment.minute(), 0)
            .expect("hour/minute from a valid DateTime are always valid");
        t >= self.start.to_naive() && t <= self.end.to_naive()
    }
}

/// Duration of the intersection of the half-open range `[s, e)` with the
/// union of all weekly occurrences of `intervals`.
///
/// Algorithm: for each calendar day in `[s, e]`, merge the day's
/// applicable intervals into non-overlapping ranges, clip against the
/// day's own bounds (`s` on the first day, `e` on the last), and sum.
pub fn total_overlap(s: DateTime<Utc>, e: DateTime<Utc>, intervals: &[RepeatingInterval]) -> Duration {
    if e <= s {
        return Duration::zero();
    }

    let mut total = Duration::zero();
    let mut day = s.date_naive();
    let last_day = e.date_naive();

    while day <= last_day {
        let day_start = day.and_hms_opt(0, 0, 0).expect("midnight valid").and_utc();
        let day_end = day_start + Duration::days(1);

        let clip_start = if day == s.date_naive() { s } else { day_start };
        let clip_end = if day == last_day { e } else { day_end };

        for (range_start, range_end) in merged_ranges_for_weekday(day.weekday(), intervals) {
            let interval_start = day_start + duration_since_midnight(range_start);
            let interval_end = day_start + duration_since_midnight(range_end);

            let overlap_start = clip_start.max(interval_start);
            let overlap_end = clip_end.min(interval_end);
            if overlap_end > overlap_start {
                total = total + (overlap_end - overlap_start);
            }
        }

        day = day.succ_opt().expect("not iterating past chrono's date range");
    }

    total
}

fn duration_since_midnight(t: NaiveTime) -> Duration {
    Duration::seconds(i64::from(t.num_seconds_from_midnight()))
}

/// Merge the intervals active on `weekday` into non-overlapping
/// `[start, end]` ranges, inclusive end bumped to the boundary minute.
fn merged_ranges_for_weekday(weekday: Weekday, intervals: &[RepeatingInterval]) -> Vec<(NaiveTime, NaiveTime)> {
    let mut ranges: Vec<(NaiveTime, NaiveTime)> = intervals
        .iter()
        .filter(|i| i.days.contains(&weekday))
        .map(|i| (i.start.to_naive(), i.end.to_naive()))
        .collect();

    // The original sorts by descending start before merging; ascending is
    // equivalent for a standard sweep-merge and simpler to reason about.
    ranges.sort_by_key(|&(start, _)| start);

    let mut merged: Vec<(NaiveTime, NaiveTime)> = Vec::new();
    for (start, end) in ranges {
        match merged.last_mut() {
            Some((_, last_end)) if start <= *last_end => {
                if end > *last_end {
                    *last_end = end;
                }
            }
            _ => merged.push((start, end)),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn weekdays(days: &[Weekday]) -> BTreeSet<Weekday> {
        days.iter().copied().collect()
    }

    fn weekday_hours() -> RepeatingInterval {
        RepeatingInterval {
            days: weekdays(&[
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ]),
            start: ClockTime::new(9, 0),
            end: ClockTime::new(17, 0),
        }
    }

    #[test]
    fn includes_boundary_minutes() {
        let interval = weekday_hours();
        let start = Utc.with_ymd_and_hms(2026, 8, 3, 9, 0, 0).unwrap(); // Monday
        let end = Utc.with_ymd_and_hms(2026, 8, 3, 17, 0, 0).unwrap();
        assert!(interval.includes(start));
        assert!(interval.includes(end));
    }

    #[test]
    fn includes_excludes_weekend() {
        let interval = weekday_hours();
        let saturday = Utc.with_ymd_and_hms(2026, 8, 8, 12, 0, 0).unwrap();
        assert!(!interval.includes(saturday));
    }

    #[test]
    fn total_overlap_same_day_regular_and_after_hours() {
        let intervals = vec![weekday_hours()];
        let created = Utc.with_ymd_and_hms(2026, 8, 3, 8, 0, 0).unwrap(); // Monday 08:00
        let deployed = Utc.with_ymd_and_hms(2026, 8, 3, 18, 0, 0).unwrap(); // Monday 18:00

        let regular = total_overlap(created, deployed, &intervals);
        assert_eq!(regular, Duration::hours(8));

        let total = deployed - created;
        let after_hours = total - regular;
        assert_eq!(after_hours, Duration::hours(2));
    }

    #[test]
    fn total_overlap_end_before_start_is_zero() {
        let intervals = vec![weekday_hours()];
        let s = Utc.with_ymd_and_hms(2026, 8, 3, 12, 0, 0).unwrap();
        let e = Utc.with_ymd_and_hms(2026, 8, 3, 9, 0, 0).unwrap();
        assert_eq!(total_overlap(s, e, &intervals), Duration::zero());
    }

    #[test]
    fn total_overlap_spans_multiple_days() {
        let intervals = vec![weekday_hours()];
        // Monday 09:00 through Wednesday 09:00: Mon full window (8h) + Tue
        // full window (8h) + Wed clipped to 09:00-09:00 (0h).
        let s = Utc.with_ymd_and_hms(2026, 8, 3, 9, 0, 0).unwrap();
        let e = Utc.with_ymd_and_hms(2026, 8, 5, 9, 0, 0).unwrap();
        assert_eq!(total_overlap(s, e, &intervals), Duration::hours(16));
    }
}
