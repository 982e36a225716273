//! Wall-clock timestamps in the Order Store's format.
//!
//! The store records naive UTC datetimes with microsecond precision
//! (`2024-01-01T12:00:00.123456`), so everything here works in
//! [`NaiveDateTime`] truncated to microseconds.

use chrono::{DurationRound, NaiveDateTime, TimeDelta, Utc};

/// Current UTC time, truncated to microseconds.
pub fn utc_now() -> NaiveDateTime {
    let now = Utc::now().naive_utc();
    now.duration_trunc(TimeDelta::microseconds(1)).unwrap_or(now)
}
