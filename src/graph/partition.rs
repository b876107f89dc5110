// src/graph/partition.rs

//! Partition definitions and the mapping rules used between partitioned assets.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};

/// Granularity of a time-window partition set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Hourly,
    Daily,
}

impl Cadence {
    /// Format string used for partition keys of this cadence.
    pub fn key_format(self) -> &'static str {
        match self {
            Cadence::Hourly => "%Y-%m-%d-%H:%M",
            Cadence::Daily => "%Y-%m-%d",
        }
    }

    fn step(self) -> Duration {
        match self {
            Cadence::Hourly => Duration::hours(1),
            Cadence::Daily => Duration::days(1),
        }
    }
}

/// Contiguous, fixed-width time windows starting at `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindowPartitions {
    pub cadence: Cadence,
    pub start: NaiveDateTime,
}

impl TimeWindowPartitions {
    fn parse_key(&self, key: &str) -> Option<NaiveDateTime> {
        match self.cadence {
            Cadence::Daily => NaiveDate::parse_from_str(key, Cadence::Daily.key_format())
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0)),
            Cadence::Hourly => {
                NaiveDateTime::parse_from_str(key, Cadence::Hourly.key_format()).ok()
            }
        }
    }

    /// Start and end of the window named by `key`, if the key is valid.
    pub fn time_window_for(&self, key: &str) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let start = self.parse_key(key)?;
        if start < self.start || start.minute() != 0 {
            return None;
        }
        let offset = start - self.start;
        if offset.num_seconds() % self.cadence.step().num_seconds() != 0 {
            return None;
        }
        Some((start, start + self.cadence.step()))
    }
}

/// The set of valid partition identifiers of an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionsDefinition {
    Static(Vec<String>),
    TimeWindow(TimeWindowPartitions),
}

impl PartitionsDefinition {
    pub fn static_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PartitionsDefinition::Static(keys.into_iter().map(Into::into).collect())
    }

    pub fn daily(start: NaiveDate) -> Self {
        PartitionsDefinition::TimeWindow(TimeWindowPartitions {
            cadence: Cadence::Daily,
            start: start.and_time(chrono::NaiveTime::MIN),
        })
    }

    /// Hourly windows; `start` is truncated to the hour.
    pub fn hourly(start: NaiveDateTime) -> Self {
        let start = start
            .with_minute(0)
            .and_then(|s| s.with_second(0))
            .and_then(|s| s.with_nanosecond(0))
            .unwrap_or(start);
        PartitionsDefinition::TimeWindow(TimeWindowPartitions {
            cadence: Cadence::Hourly,
            start,
        })
    }

    /// Whether `key` names a partition of this definition.
    ///
    /// Time windows are open-ended: any aligned window after `start` is valid,
    /// including windows that have not completed yet.
    pub fn contains(&self, key: &str) -> bool {
        match self {
            PartitionsDefinition::Static(keys) => keys.iter().any(|k| k == key),
            PartitionsDefinition::TimeWindow(tw) => tw.time_window_for(key).is_some(),
        }
    }

    /// Enumerate partition keys as of `now`.
    ///
    /// For time windows only completed windows are returned.
    pub fn partition_keys(&self, now: DateTime<Utc>) -> Vec<String> {
        match self {
            PartitionsDefinition::Static(keys) => keys.clone(),
            PartitionsDefinition::TimeWindow(tw) => {
                let now = now.naive_utc();
                let step = tw.cadence.step();
                let mut keys = Vec::new();
                let mut cursor = tw.start;
                while cursor + step <= now {
                    keys.push(cursor.format(tw.cadence.key_format()).to_string());
                    cursor += step;
                }
                keys
            }
        }
    }
}

/// How partitions of an upstream asset line up with a downstream asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionMapping {
    /// Upstream is unpartitioned: its single latest materialization feeds every
    /// downstream partition (and the unpartitioned downstream).
    AllUpstream,
    /// Both sides share one partition definition: partition `p` maps to `p`.
    Identity,
    /// Partition dimensions differ and cannot be aligned 1:1.
    Unaligned,
}

pub fn mapping_between(
    upstream: Option<&PartitionsDefinition>,
    downstream: Option<&PartitionsDefinition>,
) -> PartitionMapping {
    match (upstream, downstream) {
        (None, _) => PartitionMapping::AllUpstream,
        (Some(up), Some(down)) if up == down => PartitionMapping::Identity,
        _ => PartitionMapping::Unaligned,
    }
}
