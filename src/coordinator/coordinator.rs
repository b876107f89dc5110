// src/coordinator/coordinator.rs

//! Run admission and run lifecycle bookkeeping.
//!
//! The coordinator is a plain state machine: it never performs IO. The
//! daemon feeds it requests and launcher outcomes and turns its answers into
//! commands. Every method takes `&mut self`, so counting STARTED runs and
//! moving a run to STARTED always happen in one step.
//!
//! Only CREATED, QUEUED and STARTED runs are owned here. A run that becomes
//! terminal is handed back to the caller and kept in a bounded history.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::coordinator::limits::ConcurrencyLimits;
use crate::coordinator::queue::RunQueue;
use crate::coordinator::run::{
    Run, RunId, RunRequest, RunStatus, PARTITION_TAG, RUN_KEY_TAG,
};
use crate::errors::{MatdagError, Result};
use crate::registry::Registry;
use crate::types::CoordinatorPolicy;

/// Coordinator behaviour, usually built from the `[coordinator]` config table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub policy: CoordinatorPolicy,
    pub limits: ConcurrencyLimits,
    /// How often the daemon runs an admission pass on its own.
    pub dequeue_interval: Duration,
    pub launch_timeout: Duration,
    pub termination_timeout: Duration,
    /// Terminal runs kept for inspection; older ones are dropped.
    pub retained_runs: usize,
    /// Run keys remembered for deduplication; older keys are forgotten.
    pub retained_run_keys: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            policy: CoordinatorPolicy::Queued,
            limits: ConcurrencyLimits::new(Some(10), Vec::new()),
            dequeue_interval: Duration::from_secs(5),
            launch_timeout: Duration::from_secs(60),
            termination_timeout: Duration::from_secs(30),
            retained_runs: 1_000,
            retained_run_keys: 100_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Immediate policy: the run is STARTED and must be handed to the launcher.
    Launch(Run),
    /// Queued policy: the run waits for the next admission pass.
    Queued(RunId),
    /// A run with the same run key already exists.
    Skipped { run_key: String, existing: RunId },
    /// The request is invalid; no run was created.
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The run was still queued and is now CANCELED.
    Canceled(Run),
    /// The run is STARTED; the launcher has to terminate it.
    TerminationRequested(RunId),
    /// The run is STARTED but its launch is not acknowledged yet; termination
    /// is requested once it is.
    TerminationDeferred(RunId),
    /// Nothing to do.
    AlreadyTerminal(RunStatus),
}

/// What the daemon must do after a launcher answered a launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    Running,
    /// A cancel arrived before the acknowledgement; terminate the run now.
    Terminate(RunId),
    /// The run became terminal.
    Finished(Run),
    /// Unknown run, or one that is no longer STARTED.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationOutcome {
    Confirmed,
    Failed(String),
    TimedOut,
}

pub struct RunCoordinator {
    registry: Arc<Registry>,
    settings: CoordinatorSettings,
    /// Non-terminal runs.
    active: HashMap<RunId, Run>,
    started: BTreeSet<RunId>,
    queue: RunQueue,
    /// Terminal runs, oldest first.
    history: VecDeque<Run>,
    finished: HashMap<RunStatus, usize>,
    run_keys: HashMap<String, RunId>,
    run_key_order: VecDeque<String>,
    next_seq: u64,
}

impl RunCoordinator {
    pub fn new(registry: Arc<Registry>, settings: CoordinatorSettings) -> Self {
        info!(
            policy = ?settings.policy,
            max_concurrent_runs = ?settings.limits.max_concurrent_runs,
            tag_limits = settings.limits.tag_limits.len(),
            "run coordinator initialised"
        );
        Self {
            registry,
            settings,
            active: HashMap::new(),
            started: BTreeSet::new(),
            queue: RunQueue::new(),
            history: VecDeque::new(),
            finished: HashMap::new(),
            run_keys: HashMap::new(),
            run_key_order: VecDeque::new(),
            next_seq: 0,
        }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// A live run, or a terminal one still in the history.
    pub fn run(&self, id: RunId) -> Option<&Run> {
        self.active
            .get(&id)
            .or_else(|| self.history.iter().rev().find(|r| r.id == id))
    }

    /// Live and retained terminal runs, oldest first.
    pub fn runs(&self) -> Vec<&Run> {
        let mut runs: Vec<&Run> = self.active.values().chain(self.history.iter()).collect();
        runs.sort_by_key(|r| (r.created_at, r.seq));
        runs
    }

    /// Live runs with `status`; for terminal statuses, every run that ever
    /// ended that way.
    pub fn count_with_status(&self, status: RunStatus) -> usize {
        if status.is_terminal() {
            return self.finished.get(&status).copied().unwrap_or(0);
        }
        match status {
            RunStatus::Started => self.started.len(),
            _ => self.active.values().filter(|r| r.status == status).count(),
        }
    }

    /// Number of runs not yet terminal.
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn queued_ids(&self) -> Vec<RunId> {
        self.queue.ids()
    }

    /// No queued and no started runs.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.started.is_empty()
    }

    fn started_runs(&self) -> impl Iterator<Item = &Run> + Clone {
        self.started.iter().filter_map(|id| self.active.get(id))
    }

    /// Move a run that just became terminal out of the live set.
    fn retire(&mut self, id: RunId) -> Option<Run> {
        self.started.remove(&id);
        let run = self.active.remove(&id)?;
        *self.finished.entry(run.status).or_default() += 1;

        self.history.push_back(run.clone());
        while self.history.len() > self.settings.retained_runs {
            self.history.pop_front();
        }
        Some(run)
    }

    fn remember_run_key(&mut self, run_key: &str, id: RunId) {
        self.run_keys.insert(run_key.to_string(), id);
        self.run_key_order.push_back(run_key.to_string());
        while self.run_key_order.len() > self.settings.retained_run_keys {
            if let Some(oldest) = self.run_key_order.pop_front() {
                self.run_keys.remove(&oldest);
            }
        }
    }

    /// Validate a request and create a run for it.
    pub fn submit(&mut self, request: RunRequest, now: DateTime<Utc>) -> SubmitOutcome {
        if let Some(run_key) = &request.run_key {
            if let Some(existing) = self.run_keys.get(run_key) {
                debug!(run_key = %run_key, existing = %existing, "run key already used; skipping");
                return SubmitOutcome::Skipped {
                    run_key: run_key.clone(),
                    existing: *existing,
                };
            }
        }

        let run = match self.create_run(request, now) {
            Ok(run) => run,
            Err(e) => {
                warn!(error = %e, "run request rejected");
                return SubmitOutcome::Rejected {
                    reason: e.to_string(),
                };
            }
        };
        let id = run.id;

        if let Some(run_key) = run.run_key.clone() {
            self.remember_run_key(&run_key, id);
        }

        match self.settings.policy {
            CoordinatorPolicy::Immediate => {
                let mut run = run;
                run.status = RunStatus::Started;
                run.launched_at = Some(now);
                info!(run_id = %id, assets = run.asset_keys.len(), "run started (immediate policy)");
                self.started.insert(id);
                self.active.insert(id, run.clone());
                SubmitOutcome::Launch(run)
            }
            CoordinatorPolicy::Queued => {
                let mut run = run;
                run.status = RunStatus::Queued;
                self.queue.push(id, run.created_at, run.seq);
                info!(run_id = %id, queued = self.queue.len(), "run queued");
                self.active.insert(id, run);
                SubmitOutcome::Queued(id)
            }
        }
    }

    fn create_run(&mut self, request: RunRequest, now: DateTime<Utc>) -> Result<Run> {
        let resolved = self.registry.resolve_target(&request.target)?;
        if resolved.asset_keys.is_empty() {
            return Err(MatdagError::InvalidSelection(
                "selection resolves to no materializable assets".to_string(),
            ));
        }

        let graph = self.registry.graph();
        for key in &resolved.asset_keys {
            let Some(node) = graph.node(key) else {
                return Err(MatdagError::UnknownAsset(key.clone()));
            };
            match (&node.partitions, request.partition.as_deref()) {
                (None, None) => {}
                (Some(def), Some(p)) if def.contains(p) => {}
                (def, partition) => {
                    let reason = match (def, partition) {
                        (None, Some(_)) => "asset is not partitioned",
                        (Some(_), None) => "asset is partitioned; a partition is required",
                        _ => "unknown partition",
                    };
                    return Err(MatdagError::InvalidPartition {
                        key: key.clone(),
                        partition: partition.unwrap_or_default().to_string(),
                        reason: reason.to_string(),
                    });
                }
            }
        }

        let mut tags: BTreeMap<String, String> = resolved.tags;
        tags.extend(request.tags);
        if let Some(run_key) = &request.run_key {
            tags.insert(RUN_KEY_TAG.to_string(), run_key.clone());
        }
        if let Some(partition) = &request.partition {
            tags.insert(PARTITION_TAG.to_string(), partition.clone());
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        Ok(Run {
            id: RunId::new(),
            job: resolved.job,
            asset_keys: resolved.asset_keys,
            tags,
            status: RunStatus::Created,
            created_at: now,
            launched_at: None,
            finished_at: None,
            run_key: request.run_key,
            partition: request.partition,
            seq,
            launch_acknowledged: false,
            cancel_requested: false,
            termination_unconfirmed: false,
            failure_reason: None,
        })
    }

    /// Scan the queue head to tail and start every run whose limits allow it.
    ///
    /// A blocked run stays queued and later runs that do not compete for the
    /// saturated limit may start ahead of it. Returned runs are STARTED and
    /// must be handed to the launcher.
    pub fn admission_pass(&mut self, now: DateTime<Utc>) -> Vec<Run> {
        if self.settings.policy == CoordinatorPolicy::Immediate {
            return Vec::new();
        }

        let mut admitted = Vec::new();
        for id in self.queue.ids() {
            let verdict = {
                let Some(candidate) = self.active.get(&id) else {
                    continue;
                };
                self.settings.limits.check(candidate, self.started_runs())
            };

            match verdict {
                Ok(()) => {
                    self.queue.remove(id);
                    if let Some(run) = self.active.get_mut(&id) {
                        self.started.insert(id);
                        run.status = RunStatus::Started;
                        run.launched_at = Some(now);
                        info!(run_id = %id, "run admitted");
                        admitted.push(run.clone());
                    }
                }
                Err(reason) => {
                    debug!(run_id = %id, %reason, "run stays queued");
                }
            }
        }

        admitted
    }

    /// Record the launcher's answer for a STARTED run.
    ///
    /// A cancel that arrived before the acknowledgement turns into a
    /// termination request here, so the launched process is never orphaned.
    pub fn on_launch_result(
        &mut self,
        id: RunId,
        result: std::result::Result<(), String>,
        now: DateTime<Utc>,
    ) -> LaunchOutcome {
        let Some(run) = self.active.get_mut(&id) else {
            debug!(run_id = %id, "launch result for unknown or finished run ignored");
            return LaunchOutcome::Ignored;
        };
        if run.status != RunStatus::Started {
            return LaunchOutcome::Ignored;
        }

        match result {
            Ok(()) => {
                run.launch_acknowledged = true;
                if run.cancel_requested {
                    info!(run_id = %id, "launch acknowledged after cancel; terminating");
                    return LaunchOutcome::Terminate(id);
                }
                debug!(run_id = %id, "launch acknowledged");
                LaunchOutcome::Running
            }
            Err(reason) => {
                if run.cancel_requested {
                    info!(run_id = %id, %reason, "canceled run never launched");
                    run.status = RunStatus::Canceled;
                } else {
                    warn!(run_id = %id, %reason, "launch failed");
                    run.status = RunStatus::Failure;
                    run.failure_reason = Some(format!("launch failed: {reason}"));
                }
                run.finished_at = Some(now);
                self.retire(id).map_or(LaunchOutcome::Ignored, LaunchOutcome::Finished)
            }
        }
    }

    /// Record the end of a STARTED run.
    ///
    /// A run that was asked to cancel ends as CANCELED whatever its exit.
    pub fn on_run_finished(
        &mut self,
        id: RunId,
        success: bool,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> Option<Run> {
        let Some(run) = self.active.get_mut(&id) else {
            debug!(run_id = %id, "finish for unknown or terminal run ignored");
            return None;
        };
        if run.status != RunStatus::Started {
            debug!(run_id = %id, status = %run.status, "finish for non-started run ignored");
            return None;
        }

        run.status = if run.cancel_requested {
            RunStatus::Canceled
        } else if success {
            RunStatus::Success
        } else {
            RunStatus::Failure
        };
        if run.status == RunStatus::Failure {
            run.failure_reason = message;
        }
        run.finished_at = Some(now);
        info!(run_id = %id, status = %run.status, "run finished");
        self.retire(id)
    }

    pub fn cancel(&mut self, id: RunId, now: DateTime<Utc>) -> Result<CancelOutcome> {
        let Some(run) = self.active.get_mut(&id) else {
            return match self.history.iter().rev().find(|r| r.id == id) {
                Some(run) => Ok(CancelOutcome::AlreadyTerminal(run.status)),
                None => Err(MatdagError::RunNotFound(id)),
            };
        };

        match run.status {
            RunStatus::Created | RunStatus::Queued => {
                run.status = RunStatus::Canceled;
                run.cancel_requested = true;
                run.finished_at = Some(now);
                info!(run_id = %id, "queued run canceled");
                self.queue.remove(id);
                let run = self.retire(id).ok_or(MatdagError::RunNotFound(id))?;
                Ok(CancelOutcome::Canceled(run))
            }
            RunStatus::Started if run.cancel_requested => {
                debug!(run_id = %id, "cancel already requested");
                Ok(CancelOutcome::TerminationDeferred(id))
            }
            RunStatus::Started if !run.launch_acknowledged => {
                run.cancel_requested = true;
                info!(run_id = %id, "cancel recorded; waiting for launch acknowledgement");
                Ok(CancelOutcome::TerminationDeferred(id))
            }
            RunStatus::Started => {
                run.cancel_requested = true;
                info!(run_id = %id, "termination requested");
                Ok(CancelOutcome::TerminationRequested(id))
            }
            status => Ok(CancelOutcome::AlreadyTerminal(status)),
        }
    }

    /// Record the launcher's answer to a termination request.
    pub fn on_termination(
        &mut self,
        id: RunId,
        outcome: TerminationOutcome,
        now: DateTime<Utc>,
    ) -> Option<Run> {
        let run = self.active.get_mut(&id)?;
        if run.status != RunStatus::Started {
            return None;
        }

        match outcome {
            TerminationOutcome::Confirmed => {
                run.status = RunStatus::Canceled;
                info!(run_id = %id, "termination confirmed");
            }
            TerminationOutcome::Failed(reason) => {
                run.status = RunStatus::Failure;
                run.termination_unconfirmed = true;
                run.failure_reason = Some(format!("termination failed: {reason}"));
                warn!(run_id = %id, %reason, "termination not confirmed");
            }
            TerminationOutcome::TimedOut => {
                run.status = RunStatus::Failure;
                run.termination_unconfirmed = true;
                run.failure_reason = Some("termination timed out".to_string());
                warn!(run_id = %id, "termination timed out");
            }
        }
        run.finished_at = Some(now);
        self.retire(id)
    }
}
