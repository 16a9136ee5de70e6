//! crates/snore_core/src/dates.rs
//!
//! Parsing of client-supplied timestamps and calendar dates.

use crate::ports::{PortError, PortResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Parses an RFC 3339 timestamp, or a naive ISO-8601 one which is taken as UTC.
pub fn parse_timestamp(raw: &str) -> PortResult<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| PortError::InvalidFormat(format!("invalid timestamp '{}'", raw)))
}

/// Parses a `YYYY-MM-DD` date; a full timestamp is accepted and reduced to its date.
pub fn parse_date(raw: &str) -> PortResult<NaiveDate> {
    let trimmed = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(date);
    }
    parse_timestamp(trimmed)
        .map(|ts| ts.date_naive())
        .map_err(|_| PortError::InvalidFormat(format!("invalid date format (YYYY-MM-DD): '{}'", raw)))
}
