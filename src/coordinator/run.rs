// src/coordinator/run.rs

//! Run records and run requests.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::graph::{AssetKey, AssetSelection};

/// Tag carrying the run key a run was created for.
pub const RUN_KEY_TAG: &str = "matdag/run_key";
/// Tag carrying the partition a run targets.
pub const PARTITION_TAG: &str = "matdag/partition";
/// Name of the schedule that requested the run.
pub const SCHEDULE_NAME_TAG: &str = "matdag/schedule_name";
/// Name of the sensor that requested the run.
pub const SENSOR_NAME_TAG: &str = "matdag/sensor_name";
/// Cron time a schedule run was requested for (RFC 3339).
pub const SCHEDULED_EXECUTION_TIME_TAG: &str = "matdag/scheduled_execution_time";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        RunId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStatus {
    Created,
    Queued,
    Started,
    Success,
    Failure,
    Canceled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failure | RunStatus::Canceled
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Created => "CREATED",
            RunStatus::Queued => "QUEUED",
            RunStatus::Started => "STARTED",
            RunStatus::Success => "SUCCESS",
            RunStatus::Failure => "FAILURE",
            RunStatus::Canceled => "CANCELED",
        };
        write!(f, "{s}")
    }
}

/// What a request asks to materialize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTarget {
    Job(String),
    Selection(AssetSelection),
}

/// A request to create a run, as produced by instigators or manual launches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Idempotency key: a second request with the same key is skipped.
    pub run_key: Option<String>,
    pub target: RunTarget,
    pub tags: BTreeMap<String, String>,
    pub partition: Option<String>,
}

impl RunRequest {
    pub fn for_job(job: &str) -> Self {
        Self {
            run_key: None,
            target: RunTarget::Job(job.to_string()),
            tags: BTreeMap::new(),
            partition: None,
        }
    }

    pub fn for_selection(selection: AssetSelection) -> Self {
        Self {
            run_key: None,
            target: RunTarget::Selection(selection),
            tags: BTreeMap::new(),
            partition: None,
        }
    }

    pub fn with_run_key(mut self, run_key: impl Into<String>) -> Self {
        self.run_key = Some(run_key.into());
        self
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }
}

/// One execution attempt, owned by the coordinator until it is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub id: RunId,
    /// Job the run was created from, if any.
    pub job: Option<String>,
    pub asset_keys: BTreeSet<AssetKey>,
    pub tags: BTreeMap<String, String>,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub launched_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub run_key: Option<String>,
    pub partition: Option<String>,
    /// Submission order; breaks ties between equal creation timestamps.
    pub seq: u64,
    /// The launcher confirmed the launch.
    pub launch_acknowledged: bool,
    pub cancel_requested: bool,
    /// Set when a cancellation could not be confirmed by the launcher.
    pub termination_unconfirmed: bool,
    pub failure_reason: Option<String>,
}

impl Run {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
