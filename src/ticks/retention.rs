// src/ticks/retention.rs

//! Tick retention (`purge_after_days`), per instigator kind and per outcome.
//! `-1` keeps ticks forever.

use chrono::{DateTime, TimeDelta, Utc};

use crate::ticks::tick::{Tick, TickStatus};
use crate::types::InstigatorKind;

/// Largest accepted `purge_after_days` (roughly a century).
pub const MAX_PURGE_AFTER_DAYS: i64 = 36_500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeAfterDays {
    pub skipped: i64,
    pub success: i64,
    pub failure: i64,
}

impl Default for PurgeAfterDays {
    fn default() -> Self {
        Self {
            skipped: 7,
            success: -1,
            failure: -1,
        }
    }
}

impl PurgeAfterDays {
    /// Same value for every outcome.
    pub fn uniform(days: i64) -> Self {
        Self {
            skipped: days,
            success: days,
            failure: days,
        }
    }

    pub fn for_status(&self, status: TickStatus) -> i64 {
        match status {
            TickStatus::Skipped => self.skipped,
            TickStatus::Success => self.success,
            TickStatus::Failure => self.failure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetentionPolicy {
    pub schedule: PurgeAfterDays,
    pub sensor: PurgeAfterDays,
}

impl RetentionPolicy {
    pub fn for_kind(&self, kind: InstigatorKind) -> &PurgeAfterDays {
        match kind {
            InstigatorKind::Schedule => &self.schedule,
            InstigatorKind::Sensor => &self.sensor,
        }
    }

    /// Whether `tick` is past its retention window at `now`.
    ///
    /// A window reaching before the earliest representable time never expires.
    pub fn is_expired(&self, tick: &Tick, now: DateTime<Utc>) -> bool {
        let days = self.for_kind(tick.kind).for_status(tick.status);
        if days < 0 {
            return false;
        }
        TimeDelta::try_days(days)
            .and_then(|window| now.checked_sub_signed(window))
            .is_some_and(|cutoff| tick.timestamp < cutoff)
    }
}
