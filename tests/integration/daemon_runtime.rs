// tests/integration/daemon_runtime.rs

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use matdag::coordinator::{CoordinatorSettings, RunId, RunRequest, RunStatus};
use matdag::daemon::{CoreDaemon, DaemonEvent, DaemonOptions, Runtime};
use matdag::events::{EventLog, InMemoryEventLog};
use matdag::graph::AssetKey;
use matdag::registry::Registry;
use matdag::ticks::{EvaluationPool, FnSensor, RetentionPolicy, SensorEvaluationSettings, TickEvaluation};
use matdag_test_utils::builders::{request_for, scenario_a_registry};
use matdag_test_utils::fake_dispatcher::{Completion, FakeDispatcher, Recorder, Termination};
use matdag_test_utils::{init_tracing, with_timeout};
use tokio::sync::mpsc;

struct Harness {
    runtime: Runtime<FakeDispatcher>,
    tx: mpsc::Sender<DaemonEvent>,
    recorder: Recorder,
    log: Arc<InMemoryEventLog>,
}

fn harness(
    registry: Registry,
    settings: CoordinatorSettings,
    once: bool,
    configure: impl FnOnce(FakeDispatcher) -> FakeDispatcher,
) -> Harness {
    init_tracing();
    let (tx, rx) = mpsc::channel(64);
    let dispatcher = configure(FakeDispatcher::new(tx.clone()));
    let recorder = dispatcher.recorder();
    let log = Arc::new(InMemoryEventLog::new());

    let core = CoreDaemon::new(
        Arc::new(registry),
        settings,
        RetentionPolicy::default(),
        log.clone(),
        DaemonOptions { once },
        Utc::now(),
    );
    let pool = EvaluationPool::new(SensorEvaluationSettings::default());
    Harness {
        runtime: Runtime::new(core, tx.clone(), rx, dispatcher, pool),
        tx,
        recorder,
        log,
    }
}

async fn first_launch(recorder: &Recorder) -> RunId {
    loop {
        if let Some(request) = recorder.launched().first() {
            return request.run_id;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn once_mode_runs_job_to_completion_and_exits() {
    let h = harness(scenario_a_registry(), CoordinatorSettings::default(), true, |d| d);

    let core = with_timeout(h.runtime.run(vec![RunRequest::for_job("users_job")]))
        .await
        .unwrap();

    assert_eq!(core.coordinator().count_with_status(RunStatus::Success), 1);
    assert_eq!(h.recorder.launched().len(), 1);
    let launched = &h.recorder.launched()[0];
    assert_eq!(launched.job.as_deref(), Some("users_job"));

    for key in ["users", "user_recommender_model"] {
        assert!(h.log.latest(&AssetKey::parse(key), None).unwrap().is_some(), "{key}");
    }
}

#[tokio::test]
async fn rejected_launch_fails_the_run() {
    let h = harness(
        scenario_a_registry(),
        CoordinatorSettings::default(),
        true,
        FakeDispatcher::rejecting_launches,
    );

    let core = with_timeout(h.runtime.run(vec![request_for("users")])).await.unwrap();

    let runs = core.coordinator().runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failure);
    assert!(runs[0].failure_reason.as_deref().unwrap().contains("launch failed"));
    assert!(h.log.is_empty().unwrap());
}

#[tokio::test]
async fn failed_run_is_reported() {
    let h = harness(scenario_a_registry(), CoordinatorSettings::default(), true, |d| {
        d.completion(Completion::Fail)
    });

    let core = with_timeout(h.runtime.run(vec![request_for("users")])).await.unwrap();
    assert_eq!(core.coordinator().count_with_status(RunStatus::Failure), 1);
}

#[tokio::test]
async fn cancel_of_started_run_is_confirmed_by_launcher() {
    let h = harness(scenario_a_registry(), CoordinatorSettings::default(), true, |d| {
        d.completion(Completion::Manual)
    });
    let tx = h.tx.clone();
    let recorder = h.recorder.clone();

    let (core, ()) = with_timeout(async {
        tokio::join!(h.runtime.run(vec![request_for("users")]), async {
            let run_id = first_launch(&recorder).await;
            tx.send(DaemonEvent::CancelRequested(run_id)).await.unwrap();
        })
    })
    .await;
    let core = core.unwrap();

    let run_id = h.recorder.launched()[0].run_id;
    assert_eq!(h.recorder.terminated(), vec![run_id]);
    let run = core.coordinator().run(run_id).unwrap();
    assert_eq!(run.status, RunStatus::Canceled);
    assert!(!run.termination_unconfirmed);
}

#[tokio::test]
async fn hung_termination_times_out_as_failure() {
    let settings = CoordinatorSettings {
        termination_timeout: Duration::from_millis(50),
        ..CoordinatorSettings::default()
    };
    let h = harness(scenario_a_registry(), settings, true, |d| {
        d.completion(Completion::Manual).termination(Termination::Hang)
    });
    let tx = h.tx.clone();
    let recorder = h.recorder.clone();

    let (core, ()) = with_timeout(async {
        tokio::join!(h.runtime.run(vec![request_for("users")]), async {
            let run_id = first_launch(&recorder).await;
            tx.send(DaemonEvent::CancelRequested(run_id)).await.unwrap();
        })
    })
    .await;
    let core = core.unwrap();

    let run = &core.coordinator().runs()[0];
    assert_eq!(run.status, RunStatus::Failure);
    assert!(run.termination_unconfirmed);
    assert_eq!(run.failure_reason.as_deref(), Some("termination timed out"));
}

#[tokio::test]
async fn sensor_requests_flow_through_the_pool_to_the_launcher() {
    let sensor = FnSensor::new("kick", Duration::from_secs(3600), |ctx| {
        if ctx.cursor.is_some() {
            return Ok(TickEvaluation::skip("already kicked"));
        }
        Ok(TickEvaluation::requests(vec![RunRequest::for_job("users_job").with_run_key("kick:1")])
            .with_cursor("done"))
    });
    let registry = scenario_a_registry().with_instigator(Arc::new(sensor)).unwrap();
    let h = harness(registry, CoordinatorSettings::default(), true, |d| d);

    let core = with_timeout(h.runtime.run(Vec::new())).await.unwrap();

    assert_eq!(core.coordinator().count_with_status(RunStatus::Success), 1);
    assert_eq!(core.scheduler().cursor("kick"), Some("done"));
    let tick = core.scheduler().latest_tick("kick").unwrap();
    assert_eq!(tick.run_ids.len(), 1);
    assert_eq!(h.recorder.launched()[0].run_id, tick.run_ids[0]);
}

#[tokio::test]
async fn shutdown_event_stops_a_long_running_daemon() {
    let h = harness(scenario_a_registry(), CoordinatorSettings::default(), false, |d| d);
    let tx = h.tx.clone();

    let (core, ()) = with_timeout(async {
        tokio::join!(h.runtime.run(Vec::new()), async {
            tx.send(DaemonEvent::RunRequested(request_for("users")))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.send(DaemonEvent::ShutdownRequested).await.unwrap();
        })
    })
    .await;
    let core = core.unwrap();

    assert_eq!(core.coordinator().count_with_status(RunStatus::Success), 1);
}
