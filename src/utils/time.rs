//! Wall-clock helpers for status messages.

use chrono::{DateTime, Local, Utc};

/// Current Unix time in seconds, clamped to the protocol's `i32` field.
pub fn unix_timestamp_i32() -> i32 {
    i32::try_from(Utc::now().timestamp()).unwrap_or(i32::MAX)
}

/// Human-readable local time used in offline reasons.
pub fn format_last_seen(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
