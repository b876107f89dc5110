// src/daemon/mod.rs

//! The long-lived coordination process.
//!
//! The pure state machine lives in [`core`] (with per-event logic in
//! [`handlers`]); the async/IO shell that owns channels, timers, the
//! dispatcher and the evaluation pool is implemented in [`runtime`].
//!
//! Every mutation of run and tick state happens inside
//! [`CoreDaemon::step`], one event at a time.

use crate::coordinator::{RunId, RunRequest, TerminationOutcome};
use crate::ticks::{TickEvaluation, TickEvaluationError};

/// Options shared by the core and the shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct DaemonOptions {
    /// Evaluate every instigator once, drain all runs, then exit (`--once`).
    pub once: bool,
}

/// Events flowing into the daemon from the dispatcher, the evaluation pool,
/// timers and callers.
#[derive(Debug, Clone)]
pub enum DaemonEvent {
    /// Manual or external run request.
    RunRequested(RunRequest),
    /// Cancel a queued or started run.
    CancelRequested(RunId),
    /// The launcher acknowledged (or refused) a launch.
    LaunchCompleted {
        run_id: RunId,
        result: Result<(), String>,
    },
    /// A launched run reached its end.
    RunFinished {
        run_id: RunId,
        success: bool,
        message: Option<String>,
    },
    /// Answer to a termination request.
    TerminationCompleted {
        run_id: RunId,
        outcome: TerminationOutcome,
    },
    /// A schedule or sensor evaluation finished.
    TickEvaluated {
        instigator: String,
        result: Result<TickEvaluation, TickEvaluationError>,
    },
    /// Periodic admission pass.
    AdmissionTimer,
    /// Periodic check for due instigators.
    TickTimer,
    /// Periodic tick retention purge.
    PurgeTimer,
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod core;
pub mod handlers;
pub mod runtime;

pub use core::CoreDaemon;
pub use handlers::{CoreCommand, CoreStep};
pub use runtime::Runtime;
