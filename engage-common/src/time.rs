//! Timestamp utilities

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert seconds to duration
pub fn secs_to_duration(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

/// Returns true when `timestamp` lies further than `threshold` in the past
/// relative to `reference`.
///
/// Timestamps in the future (clock skew) are never considered older.
pub fn is_older_than(timestamp: DateTime<Utc>, threshold: Duration, reference: DateTime<Utc>) -> bool {
    match (reference - timestamp).to_std() {
        Ok(age) => age > threshold,
        Err(_) => false,
    }
}
