//! Conversions between `chrono` datetimes and epoch-seconds scores.
//!
//! Timestamps travel through the store as `f64` seconds since the Unix
//! epoch (UTC), both in the record encoding and as sorted-set scores.
//! Sub-second precision is kept to the microsecond, matching what a float
//! score can represent without surprises.

use chrono::{DateTime, Utc};

/// Convert a UTC datetime to float epoch seconds.
pub fn to_epoch_secs(dt: DateTime<Utc>) -> f64 {
    dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_micros()) / 1e6
}

/// Convert float epoch seconds back to a UTC datetime.
///
/// Out-of-range values clamp to the Unix epoch rather than panic.
pub fn from_epoch_secs(secs: f64) -> DateTime<Utc> {
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round() as u32;
    DateTime::from_timestamp(whole as i64, nanos.min(999_999_999)).unwrap_or(DateTime::UNIX_EPOCH)
}
