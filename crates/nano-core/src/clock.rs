//! Wall-clock helpers for wire timestamps.

use chrono::{DateTime, TimeZone, Utc};

/// Current time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert a millisecond Unix timestamp into a `DateTime`.
///
/// Returns `None` for values outside chrono's representable range.
#[must_use]
pub fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}
