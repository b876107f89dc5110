// src/daemon/core.rs

//! Pure core daemon state machine.
//!
//! [`CoreDaemon`] consumes [`DaemonEvent`]s together with the current time
//! and produces an updated state plus the [`CoreCommand`]s the IO shell
//! should execute. It owns no channels, timers or processes, so it can be
//! driven step by step in tests.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::coordinator::{CoordinatorSettings, LaunchOutcome, RunCoordinator, RunRequest};
use crate::daemon::handlers::{
    admit, handle_cancel, handle_run_request, handle_terminal_run, handle_termination,
    handle_tick_evaluated, CoreCommand, CoreStep,
};
use crate::daemon::{DaemonEvent, DaemonOptions};
use crate::events::EventLog;
use crate::registry::Registry;
use crate::staleness::StalenessTracker;
use crate::ticks::{Instigator, RetentionPolicy, TickScheduler};

pub struct CoreDaemon {
    coordinator: RunCoordinator,
    scheduler: TickScheduler,
    staleness: StalenessTracker,
    event_log: Arc<dyn EventLog>,
    options: DaemonOptions,
    started: bool,
}

impl std::fmt::Debug for CoreDaemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreDaemon")
            .field("registry", self.coordinator.registry())
            .field("options", &self.options)
            .field("ticks", &self.scheduler.tick_count())
            .finish_non_exhaustive()
    }
}

impl CoreDaemon {
    /// Build the core and register every instigator of `registry` at `now`.
    pub fn new(
        registry: Arc<Registry>,
        settings: CoordinatorSettings,
        retention: RetentionPolicy,
        event_log: Arc<dyn EventLog>,
        options: DaemonOptions,
        now: DateTime<Utc>,
    ) -> Self {
        let staleness = StalenessTracker::new(Arc::clone(registry.graph()), Arc::clone(&event_log));
        let mut scheduler = TickScheduler::new(retention);
        for instigator in registry.instigators() {
            scheduler.register(Arc::clone(instigator), now);
        }
        Self {
            coordinator: RunCoordinator::new(registry, settings),
            scheduler,
            staleness,
            event_log,
            options,
            started: false,
        }
    }

    pub fn coordinator(&self) -> &RunCoordinator {
        &self.coordinator
    }

    pub fn scheduler(&self) -> &TickScheduler {
        &self.scheduler
    }

    pub fn staleness(&self) -> &StalenessTracker {
        &self.staleness
    }

    pub fn event_log(&self) -> &Arc<dyn EventLog> {
        &self.event_log
    }

    pub fn options(&self) -> DaemonOptions {
        self.options
    }

    pub fn instigator(&self, name: &str) -> Option<Arc<dyn Instigator>> {
        self.scheduler.instigator(name).cloned()
    }

    /// First step: submit `initial` requests and dispatch due evaluations.
    ///
    /// In `once` mode every instigator is evaluated now, due or not.
    pub fn start(&mut self, initial: Vec<RunRequest>, now: DateTime<Utc>) -> CoreStep {
        self.started = true;
        let mut commands = Vec::new();

        for request in initial {
            handle_run_request(&mut self.coordinator, request, now, &mut commands);
        }
        admit(&mut self.coordinator, now, &mut commands);

        let contexts = if self.options.once {
            self.scheduler.due_all(now)
        } else {
            self.scheduler.due(now)
        };
        info!(evaluations = contexts.len(), once = self.options.once, "daemon started");
        commands.extend(contexts.into_iter().map(CoreCommand::Evaluate));

        self.finish(commands)
    }

    /// Handle a single event, updating core state and returning the commands
    /// for the IO shell.
    pub fn step(&mut self, event: DaemonEvent, now: DateTime<Utc>) -> CoreStep {
        let mut commands = Vec::new();

        match event {
            DaemonEvent::RunRequested(request) => {
                handle_run_request(&mut self.coordinator, request, now, &mut commands);
                admit(&mut self.coordinator, now, &mut commands);
            }
            DaemonEvent::CancelRequested(run_id) => {
                if let Some(run) = handle_cancel(&mut self.coordinator, run_id, now, &mut commands) {
                    handle_terminal_run(&run, self.event_log.as_ref(), &self.staleness, now);
                }
                admit(&mut self.coordinator, now, &mut commands);
            }
            DaemonEvent::LaunchCompleted { run_id, result } => {
                match self.coordinator.on_launch_result(run_id, result, now) {
                    LaunchOutcome::Finished(run) => {
                        handle_terminal_run(&run, self.event_log.as_ref(), &self.staleness, now);
                    }
                    LaunchOutcome::Terminate(id) => commands.push(CoreCommand::Terminate(id)),
                    LaunchOutcome::Running | LaunchOutcome::Ignored => {}
                }
                admit(&mut self.coordinator, now, &mut commands);
            }
            DaemonEvent::RunFinished {
                run_id,
                success,
                message,
            } => {
                if let Some(run) = self
                    .coordinator
                    .on_run_finished(run_id, success, message, now)
                {
                    handle_terminal_run(&run, self.event_log.as_ref(), &self.staleness, now);
                }
                admit(&mut self.coordinator, now, &mut commands);
            }
            DaemonEvent::TerminationCompleted { run_id, outcome } => {
                if let Some(run) = handle_termination(&mut self.coordinator, run_id, outcome, now) {
                    handle_terminal_run(&run, self.event_log.as_ref(), &self.staleness, now);
                }
                admit(&mut self.coordinator, now, &mut commands);
            }
            DaemonEvent::TickEvaluated { instigator, result } => {
                handle_tick_evaluated(
                    &mut self.scheduler,
                    &mut self.coordinator,
                    &instigator,
                    result,
                    now,
                    &mut commands,
                );
                admit(&mut self.coordinator, now, &mut commands);
            }
            DaemonEvent::AdmissionTimer => {
                admit(&mut self.coordinator, now, &mut commands);
            }
            DaemonEvent::TickTimer => {
                if !self.options.once {
                    commands.extend(
                        self.scheduler
                            .due(now)
                            .into_iter()
                            .map(CoreCommand::Evaluate),
                    );
                }
            }
            DaemonEvent::PurgeTimer => {
                self.scheduler.purge(now);
            }
            DaemonEvent::ShutdownRequested => {
                info!("shutdown requested");
                return CoreStep {
                    commands,
                    keep_running: false,
                };
            }
        }

        self.finish(commands)
    }

    /// Nothing queued, started or being evaluated.
    pub fn is_idle(&self) -> bool {
        self.coordinator.is_idle() && !self.scheduler.any_in_flight()
    }

    fn finish(&self, mut commands: Vec<CoreCommand>) -> CoreStep {
        let pending_work = commands
            .iter()
            .any(|c| !matches!(c, CoreCommand::RequestExit));
        if self.options.once && self.started && !pending_work && self.is_idle() {
            debug!("once mode: all evaluations and runs drained");
            commands.push(CoreCommand::RequestExit);
            return CoreStep {
                commands,
                keep_running: false,
            };
        }
        CoreStep::run(commands)
    }
}
