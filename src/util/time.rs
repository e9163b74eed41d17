//! Timestamp helpers for evtresolve.
//!
//! Converts between native `FILETIME` values and `chrono` timestamps, and
//! renders timestamps the way the native event renderer does.

use chrono::{DateTime, Utc};

/// Offset between the FILETIME epoch (1601-01-01) and the Unix epoch, in
/// 100-nanosecond ticks.
const FILETIME_UNIX_DIFF: i64 = 116_444_736_000_000_000;

/// Convert a FILETIME (100ns ticks since 1601) to a UTC timestamp.
///
/// Returns `None` for zero or out-of-range values.
pub fn filetime_to_datetime(filetime: u64) -> Option<DateTime<Utc>> {
    if filetime == 0 {
        return None;
    }
    let ticks = i64::try_from(filetime).ok()?;
    let unix_ticks = ticks - FILETIME_UNIX_DIFF;
    let secs = unix_ticks.div_euclid(10_000_000);
    let nanos = (unix_ticks.rem_euclid(10_000_000) * 100) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos)
}

/// Convert a UTC timestamp back to FILETIME ticks.
pub fn datetime_to_filetime(ts: &DateTime<Utc>) -> u64 {
    let ticks = ts.timestamp() * 10_000_000 + i64::from(ts.timestamp_subsec_nanos() / 100);
    (ticks + FILETIME_UNIX_DIFF).max(0) as u64
}

/// Render a timestamp as `EvtRender` does inside `SystemTime` attributes:
/// ISO 8601 with seven fractional digits, e.g. `2024-01-15T10:23:45.1234567Z`.
pub fn format_system_time(ts: &DateTime<Utc>) -> String {
    format!(
        "{}.{:07}Z",
        ts.format("%Y-%m-%dT%H:%M:%S"),
        ts.timestamp_subsec_nanos() / 100
    )
}

/// Format a `std::time::Duration` into a human-readable string.
///
/// Used by the CLI when reporting how long a database operation took.
/// Examples: `0.3s`, `1.2s`, `45.6s`.
pub fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 0.01 {
        format!("{:.1}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{secs:.1}s")
    } else {
        let mins = secs / 60.0;
        format!("{mins:.1}m")
    }
}
