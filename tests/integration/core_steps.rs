// tests/integration/core_steps.rs
//
// Drives the pure daemon core one event at a time, without channels or timers.

use std::sync::Arc;
use std::time::Duration;

use matdag::coordinator::{
    ConcurrencyLimits, CoordinatorSettings, RunRequest, RunStatus, TerminationOutcome,
};
use matdag::daemon::{CoreCommand, CoreDaemon, DaemonEvent, DaemonOptions};
use matdag::events::{EventLog, InMemoryEventLog};
use matdag::graph::AssetKey;
use matdag::registry::Registry;
use matdag::ticks::{FnSensor, RetentionPolicy, TickEvaluation, TickEvaluationError, TickStatus};
use matdag::types::CoordinatorPolicy;
use matdag_test_utils::builders::{request_for, scenario_a_registry};
use matdag_test_utils::init_tracing;

use crate::common::t;

fn core_with(registry: Registry, settings: CoordinatorSettings, once: bool) -> (CoreDaemon, Arc<InMemoryEventLog>) {
    init_tracing();
    let log = Arc::new(InMemoryEventLog::new());
    let core = CoreDaemon::new(
        Arc::new(registry),
        settings,
        RetentionPolicy::default(),
        log.clone(),
        DaemonOptions { once },
        t(0),
    );
    (core, log)
}

fn launches(commands: &[CoreCommand]) -> Vec<matdag::dispatch::LaunchRequest> {
    commands
        .iter()
        .filter_map(|c| match c {
            CoreCommand::Launch(req) => Some(req.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn successful_run_records_materializations_and_staleness() {
    let (mut core, log) = core_with(scenario_a_registry(), CoordinatorSettings::default(), false);

    let step = core.start(vec![request_for("users")], t(1));
    assert!(step.keep_running);
    let launched = launches(&step.commands);
    assert_eq!(launched.len(), 1);
    assert_eq!(launched[0].asset_keys, vec![AssetKey::parse("users")]);
    let run_id = launched[0].run_id;

    core.step(
        DaemonEvent::LaunchCompleted {
            run_id,
            result: Ok(()),
        },
        t(2),
    );
    core.step(
        DaemonEvent::RunFinished {
            run_id,
            success: true,
            message: None,
        },
        t(3),
    );

    assert_eq!(core.coordinator().run(run_id).unwrap().status, RunStatus::Success);
    let users = AssetKey::parse("users");
    assert_eq!(log.latest(&users, None).unwrap(), Some(t(3)));
    assert_eq!(log.events_for(&users).unwrap()[0].run_id, run_id);

    let model = AssetKey::parse("user_recommender_model");
    assert!(core.staleness().is_stale(&model, None).unwrap());
    assert!(core.is_idle());
}

#[test]
fn cancel_before_launch_ack_defers_termination() {
    let (mut core, _log) = core_with(scenario_a_registry(), CoordinatorSettings::default(), false);
    let step = core.start(vec![request_for("users")], t(1));
    let run_id = launches(&step.commands)[0].run_id;

    let step = core.step(DaemonEvent::CancelRequested(run_id), t(2));
    assert!(!step.commands.iter().any(|c| matches!(c, CoreCommand::Terminate(_))));

    let step = core.step(
        DaemonEvent::LaunchCompleted {
            run_id,
            result: Ok(()),
        },
        t(3),
    );
    assert!(step.commands.contains(&CoreCommand::Terminate(run_id)));

    core.step(
        DaemonEvent::TerminationCompleted {
            run_id,
            outcome: TerminationOutcome::Confirmed,
        },
        t(4),
    );
    assert_eq!(core.coordinator().run(run_id).unwrap().status, RunStatus::Canceled);
    assert!(core.is_idle());
}

#[test]
fn failed_and_canceled_runs_only_reach_the_run_status_feed() {
    let (mut core, log) = core_with(scenario_a_registry(), CoordinatorSettings::default(), false);

    let step = core.start(vec![request_for("users"), RunRequest::for_job("users_job")], t(1));
    let launched = launches(&step.commands);
    assert_eq!(launched.len(), 2);

    core.step(
        DaemonEvent::RunFinished {
            run_id: launched[0].run_id,
            success: false,
            message: Some("exit code 1".into()),
        },
        t(2),
    );

    core.step(
        DaemonEvent::LaunchCompleted {
            run_id: launched[1].run_id,
            result: Ok(()),
        },
        t(2),
    );
    let step = core.step(DaemonEvent::CancelRequested(launched[1].run_id), t(3));
    assert_eq!(step.commands, vec![CoreCommand::Terminate(launched[1].run_id)]);
    core.step(
        DaemonEvent::TerminationCompleted {
            run_id: launched[1].run_id,
            outcome: TerminationOutcome::Confirmed,
        },
        t(4),
    );

    let failed = core.coordinator().run(launched[0].run_id).unwrap();
    assert_eq!(failed.status, RunStatus::Failure);
    assert_eq!(failed.failure_reason.as_deref(), Some("exit code 1"));
    assert_eq!(
        core.coordinator().run(launched[1].run_id).unwrap().status,
        RunStatus::Canceled
    );
    assert!(log.is_empty().unwrap());

    let feed = log.run_status_events_after(0).unwrap();
    let statuses: Vec<(RunStatus, u64)> = feed.iter().map(|e| (e.status, e.seq)).collect();
    assert_eq!(statuses, vec![(RunStatus::Failure, 1), (RunStatus::Canceled, 2)]);
    assert_eq!(feed[0].run_id, launched[0].run_id);
    assert_eq!(feed[0].failure_reason.as_deref(), Some("exit code 1"));
    assert_eq!(feed[0].job, None);
    assert_eq!(feed[1].job.as_deref(), Some("users_job"));
}

#[test]
fn finishing_a_run_admits_the_next_queued_one() {
    let settings = CoordinatorSettings {
        limits: ConcurrencyLimits::new(Some(1), vec![]),
        ..CoordinatorSettings::default()
    };
    let (mut core, _log) = core_with(scenario_a_registry(), settings, false);

    let step = core.start(vec![request_for("users"), request_for("user_recommender_model")], t(1));
    let first = launches(&step.commands);
    assert_eq!(first.len(), 1);
    assert_eq!(core.coordinator().queued_ids().len(), 1);

    let step = core.step(
        DaemonEvent::RunFinished {
            run_id: first[0].run_id,
            success: true,
            message: None,
        },
        t(2),
    );
    let second = launches(&step.commands);
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].asset_keys, vec![AssetKey::parse("user_recommender_model")]);
}

#[test]
fn immediate_policy_launches_on_request() {
    let settings = CoordinatorSettings {
        policy: CoordinatorPolicy::Immediate,
        ..CoordinatorSettings::default()
    };
    let (mut core, _log) = core_with(scenario_a_registry(), settings, false);
    core.start(Vec::new(), t(0));

    let step = core.step(DaemonEvent::RunRequested(RunRequest::for_job("users_job")), t(1));
    let launched = launches(&step.commands);
    assert_eq!(launched.len(), 1);
    assert_eq!(launched[0].job.as_deref(), Some("users_job"));
    assert_eq!(launched[0].asset_keys.len(), 2);
}

#[test]
fn tick_results_become_runs_attached_to_the_tick() {
    let sensor = FnSensor::new("watcher", Duration::from_secs(30), |_| Ok(TickEvaluation::default()));
    let registry = scenario_a_registry().with_instigator(Arc::new(sensor)).unwrap();
    let (mut core, _log) = core_with(registry, CoordinatorSettings::default(), false);

    let step = core.start(Vec::new(), t(0));
    assert!(matches!(&step.commands[..], [CoreCommand::Evaluate(ctx)] if ctx.instigator == "watcher"));
    assert!(core.scheduler().is_in_flight("watcher"));

    let request = RunRequest::for_job("users_job").with_run_key("watcher:1");
    let step = core.step(
        DaemonEvent::TickEvaluated {
            instigator: "watcher".to_string(),
            result: Ok(TickEvaluation::requests(vec![request.clone()]).with_cursor("1")),
        },
        t(1),
    );
    let launched = launches(&step.commands);
    assert_eq!(launched.len(), 1);

    let tick = core.scheduler().latest_tick("watcher").unwrap();
    assert_eq!(tick.status, TickStatus::Success);
    assert_eq!(tick.run_ids, vec![launched[0].run_id]);
    assert_eq!(core.scheduler().cursor("watcher"), Some("1"));

    // Not due again until the minimum interval has passed.
    assert!(core.step(DaemonEvent::TickTimer, t(10)).commands.is_empty());
    let step = core.step(DaemonEvent::TickTimer, t(31));
    assert_eq!(step.commands.len(), 1);

    // Same run key again: the tick succeeds but no second run is created.
    let step = core.step(
        DaemonEvent::TickEvaluated {
            instigator: "watcher".to_string(),
            result: Ok(TickEvaluation::requests(vec![request])),
        },
        t(32),
    );
    assert!(launches(&step.commands).is_empty());
    assert!(core.scheduler().latest_tick("watcher").unwrap().run_ids.is_empty());
    assert_eq!(core.coordinator().runs().len(), 1);
}

#[test]
fn failed_evaluation_is_recorded_and_the_daemon_keeps_going() {
    let sensor = FnSensor::new("flaky", Duration::from_secs(1), |_| Ok(TickEvaluation::default()));
    let registry = scenario_a_registry().with_instigator(Arc::new(sensor)).unwrap();
    let (mut core, _log) = core_with(registry, CoordinatorSettings::default(), false);
    core.start(Vec::new(), t(0));

    let step = core.step(
        DaemonEvent::TickEvaluated {
            instigator: "flaky".to_string(),
            result: Err(TickEvaluationError::Panicked("boom".into())),
        },
        t(1),
    );
    assert!(step.keep_running);
    assert_eq!(
        core.scheduler().latest_tick("flaky").unwrap().status,
        TickStatus::Failure
    );
    assert!(!core.scheduler().is_in_flight("flaky"));
}

#[test]
fn once_mode_exits_when_drained() {
    let (mut core, _log) = core_with(scenario_a_registry(), CoordinatorSettings::default(), true);

    let step = core.start(vec![request_for("users")], t(0));
    assert!(step.keep_running);
    let run_id = launches(&step.commands)[0].run_id;

    let step = core.step(
        DaemonEvent::RunFinished {
            run_id,
            success: true,
            message: None,
        },
        t(1),
    );
    assert!(!step.keep_running);
    assert_eq!(step.commands, vec![CoreCommand::RequestExit]);
}

#[test]
fn once_mode_with_nothing_to_do_exits_at_start() {
    let (mut core, _log) = core_with(scenario_a_registry(), CoordinatorSettings::default(), true);
    let step = core.start(Vec::new(), t(0));
    assert!(!step.keep_running);
}

#[test]
fn shutdown_stops_the_loop_and_purge_is_harmless() {
    let (mut core, _log) = core_with(scenario_a_registry(), CoordinatorSettings::default(), false);
    core.start(Vec::new(), t(0));
    assert!(core.step(DaemonEvent::PurgeTimer, t(1)).keep_running);
    assert!(!core.step(DaemonEvent::ShutdownRequested, t(2)).keep_running);
}
