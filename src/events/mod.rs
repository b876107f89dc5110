// src/events/mod.rs

//! Event-log boundary.
//!
//! The event log is append-only and is the only source of truth for "is X
//! newer than Y". It also receives every run once the run is terminal, which
//! is what run-status sensors read. Storage backends implement [`EventLog`];
//! the crate ships an in-memory implementation in [`memory`].

pub mod memory;

use std::collections::BTreeMap;
use std::fmt::Debug;

use chrono::{DateTime, Utc};

use crate::coordinator::{Run, RunId, RunStatus};
use crate::errors::Result;
use crate::graph::AssetKey;

pub use memory::InMemoryEventLog;

/// One recorded materialization of an asset (or of one partition of it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializationEvent {
    pub key: AssetKey,
    pub partition: Option<String>,
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
}

impl MaterializationEvent {
    pub fn new(key: AssetKey, run_id: RunId, timestamp: DateTime<Utc>) -> Self {
        Self {
            key,
            partition: None,
            run_id,
            timestamp,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_partition(mut self, partition: Option<String>) -> Self {
        self.partition = partition;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// A run that reached a terminal status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStatusEvent {
    /// Position in the log, assigned on append; starts at 1.
    pub seq: u64,
    pub run_id: RunId,
    pub job: Option<String>,
    pub status: RunStatus,
    pub timestamp: DateTime<Utc>,
    pub failure_reason: Option<String>,
}

impl RunStatusEvent {
    pub fn from_run(run: &Run, timestamp: DateTime<Utc>) -> Self {
        Self {
            seq: 0,
            run_id: run.id,
            job: run.job.clone(),
            status: run.status,
            timestamp,
            failure_reason: run.failure_reason.clone(),
        }
    }
}

/// Append/query interface to the external event store.
///
/// Implementations must be safe to share between the daemon core and sensor
/// evaluations running on worker threads.
pub trait EventLog: Send + Sync + Debug {
    /// Append one event. Events are never rewritten or removed.
    fn append(&self, event: MaterializationEvent) -> Result<()>;

    /// Timestamp of the latest materialization of `(key, partition)`.
    ///
    /// `partition = None` asks about the unpartitioned asset.
    fn latest(&self, key: &AssetKey, partition: Option<&str>) -> Result<Option<DateTime<Utc>>>;

    /// Latest materialization of `key` across every partition.
    fn latest_any_partition(&self, key: &AssetKey) -> Result<Option<MaterializationEvent>>;

    /// Every event for `key`, oldest first.
    fn events_for(&self, key: &AssetKey) -> Result<Vec<MaterializationEvent>>;

    /// Append a terminal run status; returns the sequence number it got.
    fn record_run_status(&self, event: RunStatusEvent) -> Result<u64>;

    /// Run status events with `seq > after`, oldest first.
    fn run_status_events_after(&self, after: u64) -> Result<Vec<RunStatusEvent>>;
}
