//! Lightweight cron expression matcher.
//! Supports: "MIN HOUR DOM MON DOW" (5-field, no seconds)
//! Field syntax: *, */N, N, ranges "1-5", stepped ranges "0-30/10",
//! and comma lists of any of those: "0,15,30,45", "1-5,0"
//! Day-of-week: 0 = Sunday (7 is accepted as Sunday too).
//! Example: "0 8 * * 1" = Mondays at 8:00 UTC

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

/// A parsed 5-field expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days: Vec<u32>,
    months: Vec<u32>,
    weekdays: Vec<u32>,
}

impl CronSchedule {
    /// Parse an expression. `None` if any field is malformed or out of range.
    pub fn parse(expression: &str) -> Option<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            tracing::warn!(
                "Invalid cron expression: '{}' (need 5 fields: MIN HOUR DOM MON DOW)",
                expression
            );
            return None;
        }
        let mut weekdays = parse_field(parts[4], 0, 7)?;
        for d in weekdays.iter_mut() {
            if *d == 7 {
                *d = 0;
            }
        }
        Some(Self {
            minutes: parse_field(parts[0], 0, 59)?,
            hours: parse_field(parts[1], 0, 23)?,
            days: parse_field(parts[2], 1, 31)?,
            months: parse_field(parts[3], 1, 12)?,
            weekdays,
        })
    }

    /// Whether the minute containing `at` matches every field.
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minutes.contains(&at.minute())
            && self.hours.contains(&at.hour())
            && self.days.contains(&at.day())
            && self.months.contains(&at.month())
            && self.weekdays.contains(&at.weekday().num_days_from_sunday())
    }

    /// First matching minute strictly after `after`, searching one year ahead.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = after + Duration::minutes(1);
        candidate = candidate.with_second(0).unwrap_or(candidate);
        candidate = candidate.with_nanosecond(0).unwrap_or(candidate);

        for _ in 0..(366 * 24 * 60) {
            if self.matches(candidate) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

/// Shorthand for one-off checks.
pub fn matches(expression: &str, at: DateTime<Utc>) -> bool {
    CronSchedule::parse(expression).is_some_and(|c| c.matches(at))
}

/// Minute slot index of `at`; a cron job fires at most once per slot.
pub fn minute_slot(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(60)
}

/// Parse a cron field into a sorted list of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    let mut values = Vec::new();
    for part in field.split(',') {
        values.extend(parse_part(part.trim(), min, max)?);
    }
    values.sort_unstable();
    values.dedup();
    Some(values)
}

/// One list element: `*` or `A-B`, either with an optional `/STEP`, or a bare `N`.
fn parse_part(part: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    let (base, step) = match part.split_once('/') {
        Some((base, step)) => (base, step.parse::<u32>().ok()?),
        None => (part, 1),
    };
    if step == 0 {
        return None;
    }

    let (start, end) = if base == "*" {
        (min, max)
    } else if let Some((a, b)) = base.split_once('-') {
        (a.parse().ok()?, b.parse().ok()?)
    } else {
        if part.contains('/') {
            return None;
        }
        let n: u32 = base.parse().ok()?;
        (n, n)
    };
    if start < min || end > max || start > end {
        return None;
    }
    Some((start..=end).step_by(step as usize).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_every_hour() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 30, 0).unwrap();
        let next = CronSchedule::parse("0 * * * *").unwrap().next_after(after).unwrap();
        assert_eq!(next.hour(), 11);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_every_15_minutes() {
        let cron = CronSchedule::parse("*/15 * * * *").unwrap();
        assert!(cron.matches(Utc.with_ymd_and_hms(2026, 2, 22, 10, 45, 59).unwrap()));
        assert!(!cron.matches(Utc.with_ymd_and_hms(2026, 2, 22, 10, 2, 0).unwrap()));
    }

    #[test]
    fn test_all_fields_checked() {
        // 2026-02-22 is a Sunday.
        let sunday = Utc.with_ymd_and_hms(2026, 2, 22, 8, 0, 0).unwrap();
        assert!(matches("0 8 * * 0", sunday));
        assert!(matches("0 8 * * 7", sunday));
        assert!(!matches("0 8 * * 1", sunday));
        assert!(matches("0 8 22 2 *", sunday));
        assert!(!matches("0 8 23 2 *", sunday));
        assert!(!matches("0 8 * 3 *", sunday));
        assert!(matches("0,30 8 * * *", sunday));
    }

    #[test]
    fn test_ranges_and_stepped_ranges() {
        // 2026-03-02 is a Monday.
        let monday = Utc.with_ymd_and_hms(2026, 3, 2, 9, 20, 0).unwrap();
        assert!(matches("* 9-17 * * 1-5", monday));
        assert!(!matches("* 10-17 * * *", monday));
        assert!(!matches("* * * * 2-6", monday));
        assert!(matches("0-30/10 * * * *", monday));
        assert!(!matches("0-30/10 * * * *", monday + Duration::minutes(5)));
        assert!(matches("45,1-5 * * * 0,1", monday - Duration::minutes(17)));

        let cron = CronSchedule::parse("0 9 * * 1-5").unwrap();
        let friday_night = Utc.with_ymd_and_hms(2026, 3, 6, 18, 0, 0).unwrap();
        let next = cron.next_after(friday_night).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 9, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_invalid_expression() {
        assert!(CronSchedule::parse("bad").is_none());
        assert!(CronSchedule::parse("60 * * * *").is_none());
        assert!(CronSchedule::parse("*/0 * * * *").is_none());
        assert!(CronSchedule::parse("0,99 * * * *").is_none());
        assert!(CronSchedule::parse("* * 0 * *").is_none());
        assert!(CronSchedule::parse("5-1 * * * *").is_none());
        assert!(CronSchedule::parse("0-60 * * * *").is_none());
        assert!(CronSchedule::parse("1-5/0 * * * *").is_none());
        assert!(CronSchedule::parse("5/15 * * * *").is_none());
        assert!(CronSchedule::parse("1- * * * *").is_none());
        assert!(!matches("bad", Utc::now()));
    }

    #[test]
    fn test_minute_slot() {
        let a = Utc.with_ymd_and_hms(2026, 2, 22, 8, 0, 1).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 2, 22, 8, 0, 59).unwrap();
        let c = Utc.with_ymd_and_hms(2026, 2, 22, 8, 1, 0).unwrap();
        assert_eq!(minute_slot(a), minute_slot(b));
        assert_ne!(minute_slot(b), minute_slot(c));
    }
}
