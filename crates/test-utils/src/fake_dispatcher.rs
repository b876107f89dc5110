use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use matdag::coordinator::RunId;
use matdag::daemon::DaemonEvent;
use matdag::dispatch::{DispatchError, DispatchFuture, Dispatcher, LaunchRequest};

/// What happens to a run after the fake launcher accepted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Report `RunFinished { success: true }` right away.
    Succeed,
    /// Report `RunFinished { success: false }` right away.
    Fail,
    /// Never report; the test sends `RunFinished` itself.
    Manual,
}

/// How the fake launcher answers `terminate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Confirm,
    Fail,
    /// Never answer, so the daemon's termination timeout fires.
    Hang,
}

/// Shared view of what the fake launcher was asked to do.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    launched: Arc<Mutex<Vec<LaunchRequest>>>,
    terminated: Arc<Mutex<Vec<RunId>>>,
}

impl Recorder {
    pub fn launched(&self) -> Vec<LaunchRequest> {
        self.launched.lock().unwrap().clone()
    }

    pub fn terminated(&self) -> Vec<RunId> {
        self.terminated.lock().unwrap().clone()
    }
}

/// A fake dispatcher that:
/// - records every launch and termination request
/// - acknowledges (or rejects) launches
/// - optionally reports run completion on the daemon channel.
pub struct FakeDispatcher {
    events_tx: mpsc::Sender<DaemonEvent>,
    recorder: Recorder,
    completion: Completion,
    termination: Termination,
    reject_launches: bool,
}

impl FakeDispatcher {
    pub fn new(events_tx: mpsc::Sender<DaemonEvent>) -> Self {
        Self {
            events_tx,
            recorder: Recorder::default(),
            completion: Completion::Succeed,
            termination: Termination::Confirm,
            reject_launches: false,
        }
    }

    pub fn completion(mut self, completion: Completion) -> Self {
        self.completion = completion;
        self
    }

    pub fn termination(mut self, termination: Termination) -> Self {
        self.termination = termination;
        self
    }

    pub fn rejecting_launches(mut self) -> Self {
        self.reject_launches = true;
        self
    }

    pub fn recorder(&self) -> Recorder {
        self.recorder.clone()
    }
}

impl Dispatcher for FakeDispatcher {
    fn launch(&self, request: LaunchRequest) -> DispatchFuture<'_> {
        Box::pin(async move {
            let run_id = request.run_id;
            self.recorder.launched.lock().unwrap().push(request);

            if self.reject_launches {
                return Err(DispatchError::Rejected {
                    run_id,
                    reason: "fake launcher rejects everything".to_string(),
                });
            }

            let success = match self.completion {
                Completion::Succeed => true,
                Completion::Fail => false,
                Completion::Manual => return Ok(()),
            };
            let tx = self.events_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let finished = DaemonEvent::RunFinished {
                    run_id,
                    success,
                    message: (!success).then(|| "fake failure".to_string()),
                };
                if tx.send(finished).await.is_err() {
                    tracing::debug!(run_id = %run_id, "daemon gone; fake completion dropped");
                }
            });
            Ok(())
        })
    }

    fn terminate(&self, run_id: RunId) -> DispatchFuture<'_> {
        Box::pin(async move {
            self.recorder.terminated.lock().unwrap().push(run_id);
            match self.termination {
                Termination::Confirm => Ok(()),
                Termination::Fail => Err(DispatchError::TerminationFailed {
                    run_id,
                    reason: "fake launcher cannot stop runs".to_string(),
                }),
                Termination::Hang => {
                    std::future::pending::<()>().await;
                    Ok(())
                }
            }
        })
    }
}
