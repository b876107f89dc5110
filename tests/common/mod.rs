#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};

/// Fixed base instant plus `secs` seconds, so tests never read the clock.
pub fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}
