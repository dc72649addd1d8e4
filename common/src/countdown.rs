use std::time::Duration;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};

use crate::config::TargetDate;

/// Small overshoot past midnight so a fractionally-early wake still lands on
/// the new calendar day.
pub const MIDNIGHT_OVERSHOOT: Duration = Duration::from_secs(1);

/// Resolves the year of the nearest non-past occurrence of `target`: this
/// year unless the month/day has already gone by, in which case next year.
/// The target day itself counts as non-past.
pub fn resolve_target_year(today: NaiveDate, target: TargetDate) -> i32 {
    let passed = today.month() > target.month
        || (today.month() == target.month && today.day() > target.day);

    if passed {
        today.year() + 1
    } else {
        today.year()
    }
}

/// Builds the concrete target calendar date. A Feb 29 target resolved
/// against a non-leap year clamps to Feb 28.
pub fn resolve_target_date(today: NaiveDate, target: TargetDate) -> NaiveDate {
    let year = resolve_target_year(today, target);

    NaiveDate::from_ymd_opt(year, target.month, target.day)
        .or_else(|| NaiveDate::from_ymd_opt(year, target.month, target.day.saturating_sub(1)))
        .unwrap_or(today)
}

/// Whole days from `today` (midnight-normalized) to the resolved target.
/// Zero on the target day itself, never negative.
pub fn days_remaining(today: NaiveDate, target: TargetDate) -> u32 {
    let resolved = resolve_target_date(today, target);
    (resolved - today).num_days().max(0) as u32
}

/// How long to sleep so the next wake lands just past the next local
/// midnight.
pub fn next_wake_delay(now: NaiveDateTime) -> Duration {
    let Some(tomorrow) = now.date().succ_opt() else {
        return Duration::from_secs(24 * 60 * 60) + MIDNIGHT_OVERSHOOT;
    };

    let midnight = tomorrow.and_time(NaiveTime::MIN);
    let until = (midnight - now)
        .to_std()
        .unwrap_or(Duration::from_secs(1));

    until + MIDNIGHT_OVERSHOOT
}

/// One recomputed countdown value, produced only when the display needs a
/// refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownFrame {
    pub days_remaining: u32,
    pub target: NaiveDate,
}

/// Tracks the last rendered value so a steady-state day produces at most one
/// display update no matter how many times the loop wakes.
#[derive(Debug, Clone)]
pub struct CountdownEngine {
    target: TargetDate,
    last_rendered: Option<u32>,
}

impl CountdownEngine {
    pub fn new(target: TargetDate) -> Self {
        Self {
            target,
            last_rendered: None,
        }
    }

    /// Recomputes against `now` (time-of-day is stripped) and returns a
    /// frame only when the value differs from the last rendered one.
    pub fn refresh(&mut self, now: NaiveDateTime) -> Option<CountdownFrame> {
        let today = now.date();
        let days = days_remaining(today, self.target);

        if self.last_rendered == Some(days) {
            return None;
        }

        self.last_rendered = Some(days);
        Some(CountdownFrame {
            days_remaining: days,
            target: resolve_target_date(today, self.target),
        })
    }

    pub fn last_rendered(&self) -> Option<u32> {
        self.last_rendered
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        date(year, month, day).and_hms_opt(hour, minute, 0).unwrap()
    }

    const DEC_24: TargetDate = TargetDate { month: 12, day: 24 };

    #[test]
    fn zero_exactly_on_target_day() {
        assert_eq!(days_remaining(date(2026, 12, 24), DEC_24), 0);
        assert_eq!(days_remaining(date(2026, 12, 23), DEC_24), 1);
    }

    #[test]
    fn rolls_over_to_next_year_once_passed() {
        let today = date(2026, 12, 25);
        assert_eq!(resolve_target_year(today, DEC_24), 2027);
        assert_eq!(
            days_remaining(today, DEC_24),
            (date(2027, 12, 24) - today).num_days() as u32
        );
    }

    #[test]
    fn same_month_later_day_stays_in_current_year() {
        let today = date(2026, 12, 1);
        assert_eq!(resolve_target_year(today, DEC_24), 2026);
        assert_eq!(days_remaining(today, DEC_24), 23);
    }

    #[test]
    fn never_negative_across_a_full_year() {
        let target = TargetDate { month: 6, day: 15 };
        let mut today = date(2026, 1, 1);
        while today < date(2027, 1, 1) {
            let days = days_remaining(today, target);
            if today.month() == 6 && today.day() == 15 {
                assert_eq!(days, 0);
            }
            today = today.succ_opt().unwrap();
        }
    }

    #[test]
    fn leap_day_target_clamps_in_non_leap_year() {
        let target = TargetDate { month: 2, day: 29 };

        // 2026 is not a leap year: the target resolves to Feb 28.
        let today = date(2026, 1, 15);
        assert_eq!(resolve_target_date(today, target), date(2026, 2, 28));

        // 2028 is a leap year: the real Feb 29 is used.
        let today = date(2028, 1, 15);
        assert_eq!(resolve_target_date(today, target), date(2028, 2, 29));
    }

    #[test]
    fn leap_day_target_hits_zero_on_clamped_day() {
        let target = TargetDate { month: 2, day: 29 };
        assert_eq!(days_remaining(date(2026, 2, 28), target), 0);
    }

    #[test]
    fn refresh_is_idempotent_for_the_same_day() {
        let mut engine = CountdownEngine::new(DEC_24);

        let first = engine.refresh(at(2026, 12, 20, 0, 0));
        assert_eq!(
            first,
            Some(CountdownFrame {
                days_remaining: 4,
                target: date(2026, 12, 24),
            })
        );

        // A second wake on the same day computes the same value and is
        // suppressed by the memo.
        assert_eq!(engine.refresh(at(2026, 12, 20, 13, 45)), None);
        assert_eq!(engine.last_rendered(), Some(4));
    }

    #[test]
    fn refresh_fires_again_when_the_day_changes() {
        let mut engine = CountdownEngine::new(DEC_24);

        assert!(engine.refresh(at(2026, 12, 20, 23, 59)).is_some());
        let next = engine.refresh(at(2026, 12, 21, 0, 0)).unwrap();
        assert_eq!(next.days_remaining, 3);
    }

    #[test]
    fn refresh_rolls_to_next_year_after_target_passes() {
        let mut engine = CountdownEngine::new(DEC_24);

        let on_day = engine.refresh(at(2026, 12, 24, 0, 30)).unwrap();
        assert_eq!(on_day.days_remaining, 0);

        let after = engine.refresh(at(2026, 12, 25, 0, 0)).unwrap();
        assert_eq!(after.target, date(2027, 12, 24));
        assert_eq!(after.days_remaining, 364);
    }

    #[test]
    fn wake_delay_lands_past_midnight() {
        let delay = next_wake_delay(at(2026, 3, 9, 23, 59));
        assert_eq!(delay, Duration::from_secs(60) + MIDNIGHT_OVERSHOOT);

        let delay = next_wake_delay(at(2026, 3, 9, 0, 0));
        assert_eq!(
            delay,
            Duration::from_secs(24 * 60 * 60) + MIDNIGHT_OVERSHOOT
        );
    }
}
