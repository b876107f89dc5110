// tests/integration/process_dispatch.rs

#![cfg(unix)]

use std::collections::BTreeMap;
use std::time::Duration;

use matdag::coordinator::RunId;
use matdag::daemon::DaemonEvent;
use matdag::dispatch::{DispatchError, Dispatcher, LaunchRequest, ProcessDispatcher};
use matdag::graph::AssetKey;
use matdag_test_utils::with_timeout;
use tokio::sync::mpsc;

fn request(job: Option<&str>, partition: Option<&str>) -> LaunchRequest {
    LaunchRequest {
        run_id: RunId::new(),
        job: job.map(str::to_string),
        asset_keys: vec![AssetKey::parse("users"), AssetKey::parse("warehouse/orders")],
        partition: partition.map(str::to_string),
        tags: BTreeMap::new(),
    }
}

async fn finished(rx: &mut mpsc::Receiver<DaemonEvent>) -> (RunId, bool, Option<String>) {
    match with_timeout(rx.recv()).await {
        Some(DaemonEvent::RunFinished {
            run_id,
            success,
            message,
        }) => (run_id, success, message),
        other => panic!("expected RunFinished, got {other:?}"),
    }
}

#[tokio::test]
async fn run_environment_is_passed_to_the_command() {
    let (tx, mut rx) = mpsc::channel(4);
    let dispatcher = ProcessDispatcher::new(
        r#"test "$MATDAG_JOB" = users_job && test "$MATDAG_PARTITION" = 2024-01-01 && test "$MATDAG_ASSET_KEYS" = users,warehouse/orders && test -n "$MATDAG_RUN_ID""#,
        tx,
    );

    let req = request(Some("users_job"), Some("2024-01-01"));
    let id = req.run_id;
    dispatcher.launch(req).await.unwrap();

    let (run_id, success, message) = finished(&mut rx).await;
    assert_eq!(run_id, id);
    assert!(success, "{message:?}");
}

#[tokio::test]
async fn nonzero_exit_is_a_failed_run() {
    let (tx, mut rx) = mpsc::channel(4);
    let dispatcher = ProcessDispatcher::new("exit 3", tx);

    dispatcher.launch(request(None, None)).await.unwrap();

    let (_, success, message) = finished(&mut rx).await;
    assert!(!success);
    assert_eq!(message.as_deref(), Some("exit code 3"));
}

#[tokio::test]
async fn terminate_kills_a_running_process() {
    let (tx, mut rx) = mpsc::channel(4);
    let dispatcher = ProcessDispatcher::new("sleep 30", tx);

    let req = request(None, None);
    let id = req.run_id;
    dispatcher.launch(req).await.unwrap();
    with_timeout(dispatcher.terminate(id)).await.unwrap();

    // A killed run reports no completion.
    let quiet = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(quiet.is_err());

    assert_eq!(
        dispatcher.terminate(id).await,
        Err(DispatchError::UnknownRun(id))
    );
}
