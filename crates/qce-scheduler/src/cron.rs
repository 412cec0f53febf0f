use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike};

use crate::error::{Result, SchedulerError};

/// A parsed 5-field cron expression: minute hour day-of-month month
/// day-of-week.
///
/// Supported atoms per field: `*`, plain numbers, `a-b` ranges, comma lists
/// and `*/N` steps. Day-of-week accepts 0-7 with both 0 and 7 meaning
/// Sunday. Matching is field-wise: every field must accept its component.
#[derive(Debug, Clone)]
pub struct CronExpr {
    minute: u64,
    hour: u64,
    dom: u64,
    month: u64,
    dow: u64,
}

fn parse_field(spec: &str, min: u32, max: u32, field: &str) -> Result<u64> {
    let mut mask: u64 = 0;
    for atom in spec.split(',') {
        if atom.is_empty() {
            return Err(SchedulerError::InvalidCron(format!(
                "empty atom in {field} field"
            )));
        }
        let (range, step) = match atom.split_once('/') {
            Some((r, s)) => {
                let step: u32 = s.parse().map_err(|_| {
                    SchedulerError::InvalidCron(format!("bad step '{s}' in {field} field"))
                })?;
                if step == 0 {
                    return Err(SchedulerError::InvalidCron(format!(
                        "zero step in {field} field"
                    )));
                }
                (r, step)
            }
            None => (atom, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            let lo = parse_value(a, field)?;
            let hi = parse_value(b, field)?;
            (lo, hi)
        } else {
            let v = parse_value(range, field)?;
            (v, v)
        };

        let (lo, hi) = (normalize(lo, field), normalize(hi, field));
        if lo < min || hi > max || lo > hi {
            return Err(SchedulerError::InvalidCron(format!(
                "value out of range in {field} field: {atom}"
            )));
        }
        let mut v = lo;
        while v <= hi {
            mask |= 1 << v;
            v += step;
        }
    }
    Ok(mask)
}

fn parse_value(s: &str, field: &str) -> Result<u32> {
    s.parse()
        .map_err(|_| SchedulerError::InvalidCron(format!("bad value '{s}' in {field} field")))
}

/// Day-of-week 7 is Sunday, same as 0.
fn normalize(v: u32, field: &str) -> u32 {
    if field == "day-of-week" && v == 7 {
        0
    } else {
        v
    }
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(SchedulerError::InvalidCron(format!(
                "expected 5 fields, got {}",
                fields.len()
            )));
        }
        Ok(Self {
            minute: parse_field(fields[0], 0, 59, "minute")?,
            hour: parse_field(fields[1], 0, 23, "hour")?,
            dom: parse_field(fields[2], 1, 31, "day-of-month")?,
            month: parse_field(fields[3], 1, 12, "month")?,
            dow: parse_field(fields[4], 0, 6, "day-of-week")?,
        })
    }

    pub fn matches<Tz: TimeZone>(&self, t: &DateTime<Tz>) -> bool {
        let dow = t.weekday().num_days_from_sunday();
        self.minute & (1 << t.minute()) != 0
            && self.hour & (1 << t.hour()) != 0
            && self.dom & (1 << t.day()) != 0
            && self.month & (1 << t.month()) != 0
            && self.dow & (1 << dow) != 0
    }

    /// First matching minute strictly after `after`, within the next two
    /// years. Minute-stepping over bitmasks is plenty fast at this scale.
    pub fn next_match<Tz: TimeZone>(&self, after: DateTime<Tz>) -> Option<DateTime<Tz>> {
        let mut t = after
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))?
            + Duration::minutes(1);
        for _ in 0..(2 * 366 * 24 * 60) {
            if self.matches(&t) {
                return Some(t);
            }
            t += Duration::minutes(1);
        }
        None
    }
}
