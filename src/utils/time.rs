//! Time and timestamp utilities

use chrono::{DateTime, Utc};

/// Wire format for `Date` property values (UTC, no zone suffix)
pub const WIRE_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Current wall-clock instant
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Unix timestamp in seconds for a given instant
pub fn unix_seconds(at: &DateTime<Utc>) -> i64 {
    at.timestamp()
}

/// Unix timestamp in milliseconds for a given instant
pub fn unix_millis(at: &DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Format a date the way the backend expects it
pub fn format_wire_date(at: &DateTime<Utc>) -> String {
    at.format(WIRE_DATE_FORMAT).to_string()
}
