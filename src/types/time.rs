//! Timestamps
//!
//! Delegation expirations are nanoseconds since the Unix epoch so they can be
//! hashed and signed as a fixed-width integer. Exchange records use
//! `chrono::DateTime<Utc>` because they travel as JSON.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

/// Nanoseconds since the Unix epoch
pub type Timestamp = u64;

/// Current time in nanoseconds since the Unix epoch.
pub fn now_nanos() -> Timestamp {
    to_nanos(Utc::now())
}

/// Convert a chrono timestamp to nanoseconds, clamping pre-epoch values to zero.
pub fn to_nanos(at: DateTime<Utc>) -> Timestamp {
    at.timestamp_nanos_opt()
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or(0)
}

/// Convert nanoseconds back into a chrono timestamp.
pub fn from_nanos(nanos: Timestamp) -> DateTime<Utc> {
    let clamped = i64::try_from(nanos).unwrap_or(i64::MAX);
    Utc.timestamp_nanos(clamped)
}

/// `now + ttl`, saturating instead of overflowing.
pub fn nanos_after(now: Timestamp, ttl: Duration) -> Timestamp {
    let ttl_nanos = u64::try_from(ttl.as_nanos()).unwrap_or(u64::MAX);
    now.saturating_add(ttl_nanos)
}
