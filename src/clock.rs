//! Conversions between chrono calendar types and wall-clock `Ms`.
//!
//! All instants in the engine are naive local times of the business, so a
//! day always has exactly 24 hours and slot arithmetic is plain addition.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};

use crate::model::{DAY_MS, HOUR_MS, Ms};

pub fn to_ms(dt: NaiveDateTime) -> Ms {
    dt.and_utc().timestamp_millis()
}

pub fn from_ms(ms: Ms) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(ms).map(|d| d.naive_utc())
}

/// Midnight of `date`.
pub fn day_start(date: NaiveDate) -> Ms {
    to_ms(date.and_time(NaiveTime::MIN))
}

/// `date@hour:00`. Hour 24 is the following midnight.
pub fn at_hour(date: NaiveDate, hour: u32) -> Ms {
    day_start(date) + hour as Ms * HOUR_MS
}

pub fn date_of(ms: Ms) -> Option<NaiveDate> {
    from_ms(ms).map(|d| d.date())
}

/// `[midnight, next midnight)` of `date` as raw bounds.
pub fn day_bounds(date: NaiveDate) -> (Ms, Ms) {
    let start = day_start(date);
    (start, start + DAY_MS)
}

/// Convert an instant in any zone to the wall clock of `tz`.
pub fn wall_clock_in<Tz: TimeZone, Src: TimeZone>(instant: &DateTime<Src>, tz: &Tz) -> Ms {
    to_ms(instant.with_timezone(tz).naive_local())
}

/// Current wall-clock time of the host.
pub fn now_ms() -> Ms {
    to_ms(Local::now().naive_local())
}

/// `DD/MM/YYYY`
pub fn format_date(ms: Ms) -> String {
    from_ms(ms)
        .map(|d| d.format("%d/%m/%Y").to_string())
        .unwrap_or_default()
}

/// `HH:MM`
pub fn format_time(ms: Ms) -> String {
    from_ms(ms)
        .map(|d| d.format("%H:%M").to_string())
        .unwrap_or_default()
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// Accepts `YYYY-MM-DD HH:MM`, `YYYY-MM-DDTHH:MM` and the same with seconds.
pub fn parse_datetime(s: &str) -> Option<Ms> {
    let s = s.trim();
    ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(to_ms)
}
