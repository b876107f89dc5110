// src/ticks/pool.rs

//! Bounded worker pool for tick evaluations.
//!
//! Each evaluation runs on a blocking thread once a permit is free. With
//! `use_threads = false` the pool has a single permit, so evaluations run one
//! at a time.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::daemon::DaemonEvent;
use crate::ticks::instigator::{EvaluationContext, Instigator, TickEvaluation, TickEvaluationError};

/// Upper bound on `num_workers`.
pub const MAX_WORKERS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorEvaluationSettings {
    pub use_threads: bool,
    pub num_workers: usize,
}

impl Default for SensorEvaluationSettings {
    fn default() -> Self {
        Self {
            use_threads: false,
            num_workers: 1,
        }
    }
}

impl SensorEvaluationSettings {
    /// Number of evaluations allowed to run at once.
    pub fn effective_workers(&self) -> usize {
        if self.use_threads {
            self.num_workers.clamp(1, MAX_WORKERS)
        } else {
            1
        }
    }
}

/// Run one evaluation, turning a panic into a failed evaluation.
pub fn evaluate_guarded(
    instigator: &dyn Instigator,
    ctx: &EvaluationContext,
) -> Result<TickEvaluation, TickEvaluationError> {
    match catch_unwind(AssertUnwindSafe(|| instigator.evaluate(ctx))) {
        Ok(result) => result,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(TickEvaluationError::Panicked(msg))
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvaluationPool {
    permits: Arc<Semaphore>,
    workers: usize,
}

impl EvaluationPool {
    pub fn new(settings: SensorEvaluationSettings) -> Self {
        let workers = settings.effective_workers();
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Queue an evaluation; the outcome is sent back as
    /// [`DaemonEvent::TickEvaluated`].
    pub fn submit(
        &self,
        instigator: Arc<dyn Instigator>,
        ctx: EvaluationContext,
        events_tx: mpsc::Sender<DaemonEvent>,
    ) -> JoinHandle<()> {
        let permits = Arc::clone(&self.permits);

        tokio::spawn(async move {
            let name = ctx.instigator.clone();
            let result = match permits.acquire_owned().await {
                Ok(permit) => {
                    debug!(instigator = %name, "evaluation started");
                    let joined = tokio::task::spawn_blocking(move || {
                        let result = evaluate_guarded(instigator.as_ref(), &ctx);
                        drop(permit);
                        result
                    })
                    .await;
                    joined.unwrap_or_else(|e| Err(TickEvaluationError::Panicked(e.to_string())))
                }
                Err(e) => Err(TickEvaluationError::failed(format!(
                    "evaluation pool closed: {e}"
                ))),
            };

            if events_tx
                .send(DaemonEvent::TickEvaluated {
                    instigator: name.clone(),
                    result,
                })
                .await
                .is_err()
            {
                warn!(instigator = %name, "daemon gone; dropping evaluation result");
            }
        })
    }
}
