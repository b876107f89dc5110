// src/coordinator/mod.rs

//! Run coordination.
//!
//! - [`run`] defines run ids, statuses, run records and run requests.
//! - [`limits`] holds the global and per-tag concurrency limits.
//! - [`queue`] is the creation-ordered queue used by the queued policy.
//! - [`coordinator`] is the admission state machine itself.

pub mod coordinator;
pub mod limits;
pub mod queue;
pub mod run;

pub use coordinator::{
    CancelOutcome, CoordinatorSettings, LaunchOutcome, RunCoordinator, SubmitOutcome,
    TerminationOutcome,
};
pub use limits::{ConcurrencyLimits, TagConcurrencyLimit, TagValue};
pub use queue::RunQueue;
pub use run::{
    Run, RunId, RunRequest, RunStatus, RunTarget, PARTITION_TAG, RUN_KEY_TAG,
    SCHEDULED_EXECUTION_TIME_TAG, SCHEDULE_NAME_TAG, SENSOR_NAME_TAG,
};
