// src/daemon/runtime.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::coordinator::{RunRequest, TerminationOutcome};
use crate::dispatch::{Dispatcher, LaunchRequest};
use crate::errors::Result;
use crate::ticks::{EvaluationContext, EvaluationPool, TickEvaluationError};

use super::core::CoreDaemon;
use super::{CoreCommand, DaemonEvent};

/// How often due instigators are checked for.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);
/// How often expired ticks are purged.
pub const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Drives the [`CoreDaemon`] from channel events and timers, and delegates
/// launches to a [`Dispatcher`] and evaluations to an [`EvaluationPool`].
///
/// Launch and termination calls are spawned, never awaited inline, so the
/// loop keeps handling events while the launcher works; their outcomes come
/// back as events.
pub struct Runtime<D: Dispatcher + 'static> {
    core: CoreDaemon,
    event_rx: mpsc::Receiver<DaemonEvent>,
    event_tx: mpsc::Sender<DaemonEvent>,
    dispatcher: Arc<D>,
    pool: EvaluationPool,
}

impl<D: Dispatcher + 'static> fmt::Debug for Runtime<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("workers", &self.pool.workers())
            .finish_non_exhaustive()
    }
}

impl<D: Dispatcher + 'static> Runtime<D> {
    pub fn new(
        core: CoreDaemon,
        event_tx: mpsc::Sender<DaemonEvent>,
        event_rx: mpsc::Receiver<DaemonEvent>,
        dispatcher: D,
        pool: EvaluationPool,
    ) -> Self {
        Self {
            core,
            event_rx,
            event_tx,
            dispatcher: Arc::new(dispatcher),
            pool,
        }
    }

    /// Main event loop. Returns the core once it asks to stop, so callers can
    /// inspect the final state.
    pub async fn run(mut self, initial: Vec<RunRequest>) -> Result<CoreDaemon> {
        info!("matdag daemon started");

        let step = self.core.start(initial, Utc::now());
        let mut keep_running = step.keep_running;
        for command in step.commands {
            self.execute_command(command);
        }

        let settings = self.core.coordinator().settings().clone();
        let mut admission = interval(settings.dequeue_interval.max(Duration::from_millis(10)));
        let mut ticks = interval(TICK_INTERVAL);
        let mut purge = interval(PURGE_INTERVAL);
        for timer in [&mut admission, &mut ticks, &mut purge] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        while keep_running {
            let event = tokio::select! {
                maybe = self.event_rx.recv() => match maybe {
                    Some(event) => event,
                    None => {
                        info!("daemon event channel closed; exiting");
                        break;
                    }
                },
                _ = admission.tick() => DaemonEvent::AdmissionTimer,
                _ = ticks.tick() => DaemonEvent::TickTimer,
                _ = purge.tick() => DaemonEvent::PurgeTimer,
            };

            debug!(?event, "daemon received event");

            let step = self.core.step(event, Utc::now());
            for command in step.commands {
                self.execute_command(command);
            }
            keep_running = step.keep_running;
        }

        info!("daemon exiting");
        Ok(self.core)
    }

    fn execute_command(&mut self, command: CoreCommand) {
        match command {
            CoreCommand::Launch(request) => self.spawn_launch(request),
            CoreCommand::Terminate(run_id) => self.spawn_terminate(run_id),
            CoreCommand::Evaluate(ctx) => self.submit_evaluation(ctx),
            CoreCommand::RequestExit => info!("core issued RequestExit command"),
        }
    }

    fn spawn_launch(&self, request: LaunchRequest) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let tx = self.event_tx.clone();
        let timeout = self.core.coordinator().settings().launch_timeout;
        let run_id = request.run_id;

        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, dispatcher.launch(request)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("no launch acknowledgement within {timeout:?}")),
            };
            if tx
                .send(DaemonEvent::LaunchCompleted { run_id, result })
                .await
                .is_err()
            {
                debug!(run_id = %run_id, "daemon gone before launch result");
            }
        });
    }

    fn spawn_terminate(&self, run_id: crate::coordinator::RunId) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let tx = self.event_tx.clone();
        let timeout = self.core.coordinator().settings().termination_timeout;

        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, dispatcher.terminate(run_id)).await {
                Ok(Ok(())) => TerminationOutcome::Confirmed,
                Ok(Err(e)) => TerminationOutcome::Failed(e.to_string()),
                Err(_) => TerminationOutcome::TimedOut,
            };
            if tx
                .send(DaemonEvent::TerminationCompleted { run_id, outcome })
                .await
                .is_err()
            {
                debug!(run_id = %run_id, "daemon gone before termination result");
            }
        });
    }

    fn submit_evaluation(&self, ctx: EvaluationContext) {
        match self.core.instigator(&ctx.instigator) {
            Some(instigator) => {
                self.pool.submit(instigator, ctx, self.event_tx.clone());
            }
            None => {
                warn!(instigator = %ctx.instigator, "evaluation requested for unknown instigator");
                let tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let instigator = ctx.instigator;
                    if tx
                        .send(DaemonEvent::TickEvaluated {
                            instigator: instigator.clone(),
                            result: Err(TickEvaluationError::failed("unknown instigator")),
                        })
                        .await
                        .is_err()
                    {
                        warn!(instigator = %instigator, "daemon gone; dropping evaluation result");
                    }
                });
            }
        }
    }
}
