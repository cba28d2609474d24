//! Timestamp parsing for CSV exports.
//!
//! Offsets written in the file are kept as-is. Naive timestamps are placed in
//! the caller's timezone; ambiguous local times resolve to the earlier instant
//! and times inside a DST gap are rejected.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M%:z",
    "%Y-%m-%dT%H:%M%:z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

pub fn parse_timestamp(text: &str, zone: Tz) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt);
    }
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }

    if let Some(utc_text) = text.strip_suffix(['Z', 'z']) {
        return parse_naive(utc_text).map(|naive| Utc.from_utc_datetime(&naive).fixed_offset());
    }

    let naive = parse_naive(text)?;
    zone.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.fixed_offset())
}

fn parse_naive(text: &str) -> Option<NaiveDateTime> {
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive);
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// Start of the wall-clock hour containing `dt`, in the same offset.
pub fn truncate_to_hour(dt: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    dt.with_nanosecond(0)
        .and_then(|dt| dt.with_second(0))
        .and_then(|dt| dt.with_minute(0))
        .unwrap_or(dt)
}
