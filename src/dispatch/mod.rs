// src/dispatch/mod.rs

//! Launcher boundary.
//!
//! The daemon talks to a [`Dispatcher`] instead of spawning anything itself,
//! which lets tests swap in a fake launcher.
//!
//! - `launch` returns once the launcher has accepted the run (a launch ack),
//!   not when the run has finished. Completion is reported later as a
//!   [`DaemonEvent::RunFinished`](crate::daemon::DaemonEvent::RunFinished)
//!   on the channel the dispatcher was built with.
//! - `terminate` returns once the launcher confirmed the run is stopped.
//!
//! [`process::ProcessDispatcher`] is the production implementation.

pub mod process;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::coordinator::{Run, RunId};
use crate::graph::AssetKey;

pub use process::ProcessDispatcher;

/// What the launcher needs to know about a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub run_id: RunId,
    pub job: Option<String>,
    pub asset_keys: Vec<AssetKey>,
    pub partition: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl From<&Run> for LaunchRequest {
    fn from(run: &Run) -> Self {
        Self {
            run_id: run.id,
            job: run.job.clone(),
            asset_keys: run.asset_keys.iter().cloned().collect(),
            partition: run.partition.clone(),
            tags: run.tags.clone(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("launcher rejected run {run_id}: {reason}")]
    Rejected { run_id: RunId, reason: String },

    #[error("run {0} is not known to the launcher")]
    UnknownRun(RunId),

    #[error("termination of run {run_id} failed: {reason}")]
    TerminationFailed { run_id: RunId, reason: String },

    #[error("launcher unavailable: {0}")]
    Unavailable(String),
}

pub type DispatchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + 'a>>;

pub trait Dispatcher: Send + Sync {
    fn launch(&self, request: LaunchRequest) -> DispatchFuture<'_>;

    fn terminate(&self, run_id: RunId) -> DispatchFuture<'_>;
}
