// src/ticks/scheduler.rs

//! Tick bookkeeping for every registered schedule and sensor.
//!
//! The scheduler decides *when* an instigator is due and records the outcome
//! of each evaluation; it never evaluates anything itself. Evaluations run on
//! the [`EvaluationPool`](crate::ticks::EvaluationPool).
//!
//! An instigator handed out by [`TickScheduler::due`] is marked in flight and
//! is not handed out again until [`TickScheduler::complete`] is called for it,
//! so evaluations of one instigator never overlap.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::coordinator::{RunId, RunRequest};
use crate::ticks::instigator::{EvaluationContext, Instigator, TickEvaluation, TickEvaluationError};
use crate::ticks::retention::RetentionPolicy;
use crate::ticks::tick::{Tick, TickStatus};

struct InstigatorState {
    instigator: Arc<dyn Instigator>,
    cursor: Option<String>,
    registered_at: DateTime<Utc>,
    last_evaluation: Option<DateTime<Utc>>,
    next_due: DateTime<Utc>,
    in_flight: bool,
}

impl InstigatorState {
    fn context(&self, now: DateTime<Utc>) -> EvaluationContext {
        EvaluationContext {
            instigator: self.instigator.name().to_string(),
            cursor: self.cursor.clone(),
            now,
            registered_at: self.registered_at,
            last_evaluation: self.last_evaluation,
        }
    }
}

/// Result of recording one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTick {
    pub tick_id: u64,
    pub status: TickStatus,
    /// Requests to hand to the coordinator.
    pub run_requests: Vec<RunRequest>,
}

pub struct TickScheduler {
    states: BTreeMap<String, InstigatorState>,
    ticks: Vec<Tick>,
    retention: RetentionPolicy,
    next_tick_id: u64,
}

impl TickScheduler {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            states: BTreeMap::new(),
            ticks: Vec::new(),
            retention,
            next_tick_id: 0,
        }
    }

    /// Start tracking `instigator`. Re-registering a name replaces it and
    /// keeps its cursor.
    pub fn register(&mut self, instigator: Arc<dyn Instigator>, now: DateTime<Utc>) {
        let name = instigator.name().to_string();
        let next_due = instigator.first_evaluation_at(now);
        let cursor = self.states.remove(&name).and_then(|s| s.cursor);
        info!(instigator = %name, kind = %instigator.kind(), %next_due, "instigator registered");
        self.states.insert(
            name,
            InstigatorState {
                instigator,
                cursor,
                registered_at: now,
                last_evaluation: None,
                next_due,
                in_flight: false,
            },
        );
    }

    pub fn instigator(&self, name: &str) -> Option<&Arc<dyn Instigator>> {
        self.states.get(name).map(|s| &s.instigator)
    }

    pub fn cursor(&self, name: &str) -> Option<&str> {
        self.states.get(name).and_then(|s| s.cursor.as_deref())
    }

    pub fn is_in_flight(&self, name: &str) -> bool {
        self.states.get(name).is_some_and(|s| s.in_flight)
    }

    pub fn any_in_flight(&self) -> bool {
        self.states.values().any(|s| s.in_flight)
    }

    /// Earliest due time among instigators that are not in flight.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.states
            .values()
            .filter(|s| !s.in_flight)
            .map(|s| s.next_due)
            .min()
    }

    /// Contexts for every instigator due at `now`; each is marked in flight.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<EvaluationContext> {
        self.take(now, |s| s.next_due <= now)
    }

    /// Contexts for every instigator not in flight, due or not.
    pub fn due_all(&mut self, now: DateTime<Utc>) -> Vec<EvaluationContext> {
        self.take(now, |_| true)
    }

    fn take(
        &mut self,
        now: DateTime<Utc>,
        pick: impl Fn(&InstigatorState) -> bool,
    ) -> Vec<EvaluationContext> {
        let mut out = Vec::new();
        for (name, state) in self.states.iter_mut() {
            if state.in_flight || !pick(&*state) {
                continue;
            }
            state.in_flight = true;
            debug!(instigator = %name, cursor = ?state.cursor, "evaluation dispatched");
            out.push(state.context(now));
        }
        out
    }

    /// Record the outcome of an evaluation handed out by [`Self::due`].
    ///
    /// A failed evaluation produces a FAILURE tick and leaves the cursor
    /// untouched, so the next evaluation retries from the same cursor.
    pub fn complete(
        &mut self,
        name: &str,
        result: Result<TickEvaluation, TickEvaluationError>,
        now: DateTime<Utc>,
    ) -> Option<CompletedTick> {
        let Some(state) = self.states.get_mut(name) else {
            warn!(instigator = %name, "evaluation finished for unknown instigator");
            return None;
        };
        state.in_flight = false;
        state.last_evaluation = Some(now);
        state.next_due = state.instigator.next_evaluation_after(now);

        let id = self.next_tick_id;
        self.next_tick_id += 1;
        let kind = state.instigator.kind();

        let (tick, run_requests) = match result {
            Ok(evaluation) => {
                if let Some(cursor) = evaluation.cursor {
                    state.cursor = Some(cursor);
                }
                let status = if evaluation.run_requests.is_empty() {
                    TickStatus::Skipped
                } else {
                    TickStatus::Success
                };
                debug!(
                    instigator = %name,
                    %status,
                    requests = evaluation.run_requests.len(),
                    skip_reason = ?evaluation.skip_reason,
                    "tick recorded"
                );
                (
                    Tick {
                        id,
                        instigator: name.to_string(),
                        kind,
                        timestamp: now,
                        status,
                        requested: evaluation.run_requests.len(),
                        run_ids: Vec::new(),
                        cursor: state.cursor.clone(),
                        skip_reason: evaluation.skip_reason,
                        error: None,
                    },
                    evaluation.run_requests,
                )
            }
            Err(err) => {
                warn!(instigator = %name, error = %err, "evaluation failed; cursor unchanged");
                (
                    Tick {
                        id,
                        instigator: name.to_string(),
                        kind,
                        timestamp: now,
                        status: TickStatus::Failure,
                        requested: 0,
                        run_ids: Vec::new(),
                        cursor: state.cursor.clone(),
                        skip_reason: None,
                        error: Some(err.to_string()),
                    },
                    Vec::new(),
                )
            }
        };

        let status = tick.status;
        self.ticks.push(tick);
        Some(CompletedTick {
            tick_id: id,
            status,
            run_requests,
        })
    }

    /// Attach a created run to the tick that requested it.
    pub fn attach_run(&mut self, tick_id: u64, run_id: RunId) {
        if let Some(tick) = self.ticks.iter_mut().find(|t| t.id == tick_id) {
            tick.run_ids.push(run_id);
        }
    }

    /// Ticks of one instigator, oldest first.
    pub fn ticks_for(&self, name: &str) -> Vec<&Tick> {
        self.ticks.iter().filter(|t| t.instigator == name).collect()
    }

    pub fn latest_tick(&self, name: &str) -> Option<&Tick> {
        self.ticks.iter().rev().find(|t| t.instigator == name)
    }

    pub fn tick_count(&self) -> usize {
        self.ticks.len()
    }

    /// Drop ticks past their retention window; returns how many were removed.
    pub fn purge(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.ticks.len();
        let retention = self.retention;
        self.ticks.retain(|t| !retention.is_expired(t, now));
        let purged = before - self.ticks.len();
        if purged > 0 {
            info!(purged, remaining = self.ticks.len(), "purged expired ticks");
        }
        purged
    }
}
