use chrono::{DateTime, Datelike, Duration, TimeZone};

use qce_core::schedule::TimeRangeType;
use qce_core::TimeWindow;

use crate::error::{Result, SchedulerError};

/// Resolve a relative range to a concrete window at fire time.
///
/// Calendar-based ranges (`yesterday`, `last-week`, `last-month`) snap to
/// local midnights in `now`'s zone; the rolling ranges count back from `now`
/// itself. Offsets (for `custom`) are seconds relative to now and may be
/// negative.
pub fn compute_window<Tz: TimeZone>(
    range: TimeRangeType,
    offsets: Option<(i64, i64)>,
    now: DateTime<Tz>,
) -> Result<TimeWindow> {
    let day_start = |t: &DateTime<Tz>| -> Result<DateTime<Tz>> {
        t.timezone()
            .with_ymd_and_hms(t.year(), t.month(), t.day(), 0, 0, 0)
            .single()
            .ok_or_else(|| SchedulerError::InvalidSchedule("ambiguous local midnight".into()))
    };

    let window = match range {
        TimeRangeType::Yesterday => {
            let today = day_start(&now)?;
            let start = today.clone() - Duration::days(1);
            TimeWindow::new(start.timestamp_millis(), today.timestamp_millis())?
        }
        TimeRangeType::LastWeek => {
            let today = day_start(&now)?;
            let start = today.clone() - Duration::days(7);
            TimeWindow::new(start.timestamp_millis(), today.timestamp_millis())?
        }
        TimeRangeType::LastMonth => {
            let (prev_year, prev_month) = if now.month() == 1 {
                (now.year() - 1, 12)
            } else {
                (now.year(), now.month() - 1)
            };
            let start = now
                .timezone()
                .with_ymd_and_hms(prev_year, prev_month, 1, 0, 0, 0)
                .single()
                .ok_or_else(|| {
                    SchedulerError::InvalidSchedule("ambiguous month boundary".into())
                })?;
            let end = now
                .timezone()
                .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
                .single()
                .ok_or_else(|| {
                    SchedulerError::InvalidSchedule("ambiguous month boundary".into())
                })?;
            TimeWindow::new(start.timestamp_millis(), end.timestamp_millis())?
        }
        TimeRangeType::Last7Days => rolling(&now, 7)?,
        TimeRangeType::Last30Days => rolling(&now, 30)?,
        TimeRangeType::Custom => {
            let (start_offset, end_offset) = offsets.ok_or_else(|| {
                SchedulerError::InvalidSchedule("custom range requires offsets".into())
            })?;
            TimeWindow::new(
                now.timestamp_millis() + start_offset * 1000,
                now.timestamp_millis() + end_offset * 1000,
            )?
        }
    };
    Ok(window)
}

fn rolling<Tz: TimeZone>(now: &DateTime<Tz>, days: i64) -> Result<TimeWindow> {
    let start = now.clone() - Duration::days(days);
    Ok(TimeWindow::new(
        start.timestamp_millis(),
        now.timestamp_millis(),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    /// UTC+8, the zone the service usually runs in. The math itself is
    /// offset-neutral.
    fn tz() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    fn at(y: i32, mo: u32, d: u32, h: u32) -> DateTime<FixedOffset> {
        tz().with_ymd_and_hms(y, mo, d, h, 30, 0).unwrap()
    }

    #[test]
    fn yesterday_is_the_full_prior_local_day() {
        let now = at(2024, 3, 15, 3);
        let w = compute_window(TimeRangeType::Yesterday, None, now).unwrap();
        let start = tz().with_ymd_and_hms(2024, 3, 14, 0, 0, 0).unwrap();
        let end = tz().with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap();
        assert_eq!(w.start_ms, start.timestamp_millis());
        assert_eq!(w.end_ms, end.timestamp_millis());
    }

    #[test]
    fn last_week_ends_at_prior_midnight() {
        let now = at(2024, 3, 15, 12);
        let w = compute_window(TimeRangeType::LastWeek, None, now).unwrap();
        let end = tz().with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap();
        assert_eq!(w.end_ms, end.timestamp_millis());
        assert_eq!(w.end_ms - w.start_ms, 7 * 86_400_000);
    }

    #[test]
    fn last_month_spans_the_prior_calendar_month() {
        let now = at(2024, 3, 15, 12);
        let w = compute_window(TimeRangeType::LastMonth, None, now).unwrap();
        let start = tz().with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let end = tz().with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(w.start_ms, start.timestamp_millis());
        assert_eq!(w.end_ms, end.timestamp_millis());
    }

    #[test]
    fn last_month_wraps_january() {
        let now = at(2024, 1, 10, 12);
        let w = compute_window(TimeRangeType::LastMonth, None, now).unwrap();
        let start = tz().with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap();
        assert_eq!(w.start_ms, start.timestamp_millis());
    }

    #[test]
    fn rolling_ranges_count_back_from_now() {
        let now = at(2024, 3, 15, 12);
        let w = compute_window(TimeRangeType::Last7Days, None, now.clone()).unwrap();
        assert_eq!(w.end_ms, now.timestamp_millis());
        assert_eq!(w.end_ms - w.start_ms, 7 * 86_400_000);
    }

    #[test]
    fn custom_offsets_may_be_negative() {
        let now = at(2024, 3, 15, 12);
        let w = compute_window(
            TimeRangeType::Custom,
            Some((-3600, 0)),
            now.clone(),
        )
        .unwrap();
        assert_eq!(w.start_ms, now.timestamp_millis() - 3_600_000);
        assert_eq!(w.end_ms, now.timestamp_millis());
    }

    #[test]
    fn custom_without_offsets_is_invalid() {
        assert!(compute_window(TimeRangeType::Custom, None, at(2024, 3, 15, 12)).is_err());
    }
}
