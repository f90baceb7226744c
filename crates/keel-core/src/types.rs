//! Core types for Keel
//!
//! Small shared aliases: timestamps and their storage encoding.

use chrono::{DateTime, Utc};

/// Timestamp type alias
pub type Timestamp = DateTime<Utc>;

/// Create a timestamp for the current moment
pub fn now() -> Timestamp {
    Utc::now()
}

/// Microseconds since the Unix epoch, the storage encoding of timestamps
pub fn to_micros(ts: &Timestamp) -> i64 {
    ts.timestamp_micros()
}

/// Inverse of [`to_micros`]; `None` outside chrono's representable range
pub fn from_micros(us: i64) -> Option<Timestamp> {
    DateTime::<Utc>::from_timestamp_micros(us)
}
