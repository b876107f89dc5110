// src/daemon/handlers.rs

//! Event handling logic for the core daemon.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::coordinator::{
    CancelOutcome, Run, RunCoordinator, RunId, RunRequest, RunStatus, SubmitOutcome,
    TerminationOutcome,
};
use crate::dispatch::LaunchRequest;
use crate::events::{EventLog, MaterializationEvent, RunStatusEvent};
use crate::staleness::StalenessTracker;
use crate::ticks::{EvaluationContext, TickEvaluation, TickEvaluationError, TickScheduler};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreCommand {
    /// Hand a STARTED run to the dispatcher.
    Launch(LaunchRequest),
    /// Ask the dispatcher to stop a run.
    Terminate(RunId),
    /// Evaluate an instigator on the worker pool.
    Evaluate(EvaluationContext),
    /// Request that the process exits (used for `--once` when idle).
    RequestExit,
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// Whether the outer loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    pub fn run(commands: Vec<CoreCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }
}

/// Submit a request; returns the created run id, if any.
///
/// Under the immediate policy the run is launched straight away; under the
/// queued policy it waits for the admission pass that follows.
pub fn handle_run_request(
    coordinator: &mut RunCoordinator,
    request: RunRequest,
    now: DateTime<Utc>,
    commands: &mut Vec<CoreCommand>,
) -> Option<RunId> {
    match coordinator.submit(request, now) {
        SubmitOutcome::Launch(run) => {
            commands.push(CoreCommand::Launch(LaunchRequest::from(&run)));
            Some(run.id)
        }
        SubmitOutcome::Queued(id) => Some(id),
        SubmitOutcome::Skipped { run_key, existing } => {
            info!(run_key = %run_key, existing = %existing, "duplicate run key; request skipped");
            None
        }
        SubmitOutcome::Rejected { reason } => {
            warn!(%reason, "run request rejected");
            None
        }
    }
}

/// Run one admission pass and turn admitted runs into launch commands.
pub fn admit(coordinator: &mut RunCoordinator, now: DateTime<Utc>, commands: &mut Vec<CoreCommand>) {
    for run in coordinator.admission_pass(now) {
        commands.push(CoreCommand::Launch(LaunchRequest::from(&run)));
    }
}

/// Record a finished evaluation and submit the runs it requested.
pub fn handle_tick_evaluated(
    scheduler: &mut TickScheduler,
    coordinator: &mut RunCoordinator,
    instigator: &str,
    result: Result<TickEvaluation, TickEvaluationError>,
    now: DateTime<Utc>,
    commands: &mut Vec<CoreCommand>,
) {
    let Some(completed) = scheduler.complete(instigator, result, now) else {
        return;
    };

    for request in completed.run_requests {
        if let Some(run_id) = handle_run_request(coordinator, request, now, commands) {
            scheduler.attach_run(completed.tick_id, run_id);
        }
    }
}

/// React to a run that became terminal.
///
/// Every terminal run is appended to the run status feed. A successful run
/// also records one materialization per targeted asset, then reports the
/// downstream assets that became stale.
pub fn handle_terminal_run(run: &Run, event_log: &dyn EventLog, staleness: &StalenessTracker, now: DateTime<Utc>) {
    let recorded_at = run.finished_at.unwrap_or(now);
    if let Err(e) = event_log.record_run_status(RunStatusEvent::from_run(run, recorded_at)) {
        error!(run_id = %run.id, error = %e, "failed to record run status");
    }

    match run.status {
        RunStatus::Success => {}
        RunStatus::Failure => {
            warn!(
                run_id = %run.id,
                reason = ?run.failure_reason,
                termination_unconfirmed = run.termination_unconfirmed,
                "run failed"
            );
            return;
        }
        status => {
            info!(run_id = %run.id, %status, "run ended");
            return;
        }
    }

    for key in &run.asset_keys {
        let event = MaterializationEvent::new(key.clone(), run.id, now)
            .with_partition(run.partition.clone());
        if let Err(e) = event_log.append(event) {
            error!(run_id = %run.id, asset = %key, error = %e, "failed to record materialization");
        }
    }
    debug!(run_id = %run.id, assets = run.asset_keys.len(), "materializations recorded");

    let keys: BTreeSet<_> = run.asset_keys.iter().cloned().collect();
    match staleness.stale_downstream_of(&keys, run.partition.as_deref()) {
        Ok(stale) if stale.is_empty() => {}
        Ok(stale) => {
            let names: Vec<String> = stale
                .iter()
                .map(|(k, p)| match p {
                    Some(p) => format!("{k}[{p}]"),
                    None => k.to_string(),
                })
                .collect();
            info!(run_id = %run.id, stale = ?names, "downstream assets are now stale");
        }
        Err(e) => warn!(run_id = %run.id, error = %e, "staleness check failed"),
    }
}

/// Returns the run when it was canceled straight out of the queue.
pub fn handle_cancel(
    coordinator: &mut RunCoordinator,
    run_id: RunId,
    now: DateTime<Utc>,
    commands: &mut Vec<CoreCommand>,
) -> Option<Run> {
    match coordinator.cancel(run_id, now) {
        Ok(CancelOutcome::Canceled(run)) => return Some(run),
        Ok(CancelOutcome::TerminationRequested(id)) => commands.push(CoreCommand::Terminate(id)),
        Ok(CancelOutcome::TerminationDeferred(id)) => {
            debug!(run_id = %id, "termination waits for the launch acknowledgement")
        }
        Ok(CancelOutcome::AlreadyTerminal(status)) => {
            debug!(run_id = %run_id, %status, "cancel ignored; run already terminal")
        }
        Err(e) => warn!(run_id = %run_id, error = %e, "cancel failed"),
    }
    None
}

pub fn handle_termination(
    coordinator: &mut RunCoordinator,
    run_id: RunId,
    outcome: TerminationOutcome,
    now: DateTime<Utc>,
) -> Option<Run> {
    coordinator.on_termination(run_id, outcome, now)
}
