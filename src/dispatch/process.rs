// src/dispatch/process.rs

//! Launch runs as shell commands.
//!
//! Every run executes the configured launcher command through `sh -c` with
//! the run described in environment variables:
//!
//! - `MATDAG_RUN_ID`
//! - `MATDAG_ASSET_KEYS` (comma-separated, `/`-joined keys)
//! - `MATDAG_JOB` and `MATDAG_PARTITION` when set
//!
//! Exit status 0 means success.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use crate::coordinator::RunId;
use crate::daemon::DaemonEvent;
use crate::dispatch::{DispatchError, DispatchFuture, Dispatcher, LaunchRequest};

/// Sent to a running process to stop it; the reply says whether the kill
/// succeeded.
type KillRequest = oneshot::Sender<std::result::Result<(), String>>;

#[derive(Debug)]
pub struct ProcessDispatcher {
    cmd: String,
    events_tx: mpsc::Sender<DaemonEvent>,
    active: Arc<Mutex<HashMap<RunId, oneshot::Sender<KillRequest>>>>,
}

impl ProcessDispatcher {
    pub fn new(cmd: &str, events_tx: mpsc::Sender<DaemonEvent>) -> Self {
        Self {
            cmd: cmd.to_string(),
            events_tx,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn build_command(&self, request: &LaunchRequest) -> Command {
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&self.cmd);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&self.cmd);
            c
        };

        let keys: Vec<String> = request.asset_keys.iter().map(|k| k.to_string()).collect();
        cmd.env("MATDAG_RUN_ID", request.run_id.to_string())
            .env("MATDAG_ASSET_KEYS", keys.join(","));
        if let Some(job) = &request.job {
            cmd.env("MATDAG_JOB", job);
        }
        if let Some(partition) = &request.partition {
            cmd.env("MATDAG_PARTITION", partition);
        }

        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Dispatcher for ProcessDispatcher {
    fn launch(&self, request: LaunchRequest) -> DispatchFuture<'_> {
        Box::pin(async move {
            let run_id = request.run_id;
            info!(run_id = %run_id, cmd = %self.cmd, assets = request.asset_keys.len(), "launching run process");

            let child = self
                .build_command(&request)
                .spawn()
                .with_context(|| format!("spawning process for run {run_id}"))
                .map_err(|e| DispatchError::Rejected {
                    run_id,
                    reason: format!("{e:#}"),
                })?;

            let (kill_tx, kill_rx) = oneshot::channel::<KillRequest>();
            self.active.lock().await.insert(run_id, kill_tx);

            let events_tx = self.events_tx.clone();
            let active = Arc::clone(&self.active);
            tokio::spawn(async move {
                supervise(run_id, child, kill_rx, events_tx).await;
                active.lock().await.remove(&run_id);
            });

            Ok(())
        })
    }

    fn terminate(&self, run_id: RunId) -> DispatchFuture<'_> {
        Box::pin(async move {
            let kill_tx = self
                .active
                .lock()
                .await
                .remove(&run_id)
                .ok_or(DispatchError::UnknownRun(run_id))?;

            let (ack_tx, ack_rx) = oneshot::channel();
            if kill_tx.send(ack_tx).is_err() {
                return Err(DispatchError::TerminationFailed {
                    run_id,
                    reason: "process already exited".to_string(),
                });
            }

            match ack_rx.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(reason)) => Err(DispatchError::TerminationFailed { run_id, reason }),
                Err(_) => Err(DispatchError::TerminationFailed {
                    run_id,
                    reason: "process supervisor went away".to_string(),
                }),
            }
        })
    }
}

/// Wait for the process to exit or for a kill request, whichever comes first.
///
/// A killed run reports no `RunFinished`; the termination reply covers it.
async fn supervise(
    run_id: RunId,
    mut child: Child,
    kill_rx: oneshot::Receiver<KillRequest>,
    events_tx: mpsc::Sender<DaemonEvent>,
) {
    for stream in [
        child.stdout.take().map(|s| Box::new(s) as Box<dyn tokio::io::AsyncRead + Send + Unpin>),
        child.stderr.take().map(|s| Box::new(s) as Box<dyn tokio::io::AsyncRead + Send + Unpin>),
    ]
    .into_iter()
    .flatten()
    {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(run_id = %run_id, "output: {}", line);
            }
        });
    }

    tokio::select! {
        status = child.wait() => {
            let (success, message) = match status {
                Ok(status) => {
                    let code = status.code().unwrap_or(-1);
                    info!(run_id = %run_id, exit_code = code, success = status.success(), "run process exited");
                    (status.success(), (!status.success()).then(|| format!("exit code {code}")))
                }
                Err(e) => {
                    error!(run_id = %run_id, error = %e, "waiting for run process failed");
                    (false, Some(e.to_string()))
                }
            };
            let event = DaemonEvent::RunFinished { run_id, success, message };
            if events_tx.send(event).await.is_err() {
                warn!(run_id = %run_id, "daemon gone; dropping run completion");
            }
        }

        request = kill_rx => {
            match request {
                Ok(ack) => {
                    info!(run_id = %run_id, "termination requested; killing run process");
                    let result = child.kill().await.map_err(|e| e.to_string());
                    if let Err(e) = &result {
                        warn!(run_id = %run_id, error = %e, "failed to kill run process");
                    }
                    if ack.send(result).is_err() {
                        debug!(run_id = %run_id, "terminate caller gone before kill acknowledgement");
                    }
                }
                Err(_) => {
                    debug!(run_id = %run_id, "kill channel dropped; process killed on drop");
                }
            }
        }
    }
}
