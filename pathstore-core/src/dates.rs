//! Lenient date parsing and calendar unit ranges used by the query DSL.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Timelike, Utc};
use regex::Regex;

static PARTIAL_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{4})(?:-(\d{1,2})(?:-(\d{1,2})(?:[T ](\d{1,2})(?::(\d{1,2})(?::(\d{1,2})(?:\.(\d{1,3})\d*)?)?)?)?)?)?Z?$",
    )
    .expect("valid date pattern")
});

/// Calendar granularity of a date-component filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateUnit {
    Year,
    Month,
    Date,
    Hour,
    Minute,
    Second,
}

impl DateUnit {
    pub fn from_operator(op: &str) -> Option<Self> {
        match op {
            "year" => Some(DateUnit::Year),
            "month" => Some(DateUnit::Month),
            "date" => Some(DateUnit::Date),
            "hour" => Some(DateUnit::Hour),
            "minute" => Some(DateUnit::Minute),
            "second" => Some(DateUnit::Second),
            _ => None,
        }
    }
}

/// Parses RFC 3339 timestamps as well as truncated forms such as `1990`,
/// `1990-03`, `1990-03-15` or `1990-03-15T10:30`. Missing components default to
/// the start of the enclosing unit; naive values are read as UTC.
pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    let captures = PARTIAL_DATE.captures(raw.trim())?;
    let part = |index: usize, default: u32| -> Option<u32> {
        match captures.get(index) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(default),
        }
    };

    let year = captures.get(1)?.as_str().parse::<i32>().ok()?;
    let millis = match captures.get(7) {
        Some(m) => format!("{:0<3}", m.as_str()).parse::<u32>().ok()?,
        None => 0,
    };

    let date = NaiveDate::from_ymd_opt(year, part(2, 1)?, part(3, 1)?)?;
    let time = date.and_hms_milli_opt(part(4, 0)?, part(5, 0)?, part(6, 0)?, millis)?;

    Some(Utc.from_utc_datetime(&time))
}

/// Returns the inclusive `[start, end]` range of the `unit` containing `at`.
///
/// Every component below `unit` is reset, so `{month}` on `1990-03-15` covers
/// all of March 1990.
pub fn unit_range(at: DateTime<Utc>, unit: DateUnit) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let naive = at.naive_utc();
    let date = naive.date();

    let start_naive = match unit {
        DateUnit::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1)?.and_hms_opt(0, 0, 0)?,
        DateUnit::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?.and_hms_opt(0, 0, 0)?,
        DateUnit::Date => date.and_hms_opt(0, 0, 0)?,
        DateUnit::Hour => date.and_hms_opt(naive.hour(), 0, 0)?,
        DateUnit::Minute => date.and_hms_opt(naive.hour(), naive.minute(), 0)?,
        DateUnit::Second => date.and_hms_opt(naive.hour(), naive.minute(), naive.second())?,
    };
    let start = Utc.from_utc_datetime(&start_naive);

    let next = match unit {
        DateUnit::Year => start.checked_add_months(Months::new(12))?,
        DateUnit::Month => start.checked_add_months(Months::new(1))?,
        DateUnit::Date => start + Duration::days(1),
        DateUnit::Hour => start + Duration::hours(1),
        DateUnit::Minute => start + Duration::minutes(1),
        DateUnit::Second => start + Duration::seconds(1),
    };

    Some((start, next - Duration::milliseconds(1)))
}
