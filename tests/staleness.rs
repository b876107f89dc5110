// tests/staleness.rs

mod common;

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use common::t;
use matdag::coordinator::RunId;
use matdag::errors::MatdagError;
use matdag::events::{EventLog, InMemoryEventLog, MaterializationEvent};
use matdag::graph::{AssetGraph, AssetGraphBuilder, AssetKey, AssetSpec, PartitionsDefinition, SourceAssetSpec};
use matdag::staleness::{NotEvaluatedReason, StalenessStatus, StalenessTracker};
use matdag_test_utils::builders::scenario_a_graph;

fn key(path: &str) -> AssetKey {
    AssetKey::parse(path)
}

fn tracker(graph: AssetGraph) -> (StalenessTracker, Arc<InMemoryEventLog>) {
    let log = Arc::new(InMemoryEventLog::new());
    let tracker = StalenessTracker::new(Arc::new(graph), log.clone());
    (tracker, log)
}

fn materialize(log: &InMemoryEventLog, path: &str, partition: Option<&str>, at: DateTime<Utc>) {
    log.append(
        MaterializationEvent::new(key(path), RunId::new(), at)
            .with_partition(partition.map(str::to_string)),
    )
    .unwrap();
}

#[test]
fn scenario_a_upstream_rematerialization_makes_downstream_stale() {
    let (tracker, log) = tracker(scenario_a_graph());

    materialize(&log, "raw_users", None, t(1));
    materialize(&log, "users", None, t(2));
    assert!(!tracker.is_stale(&key("users"), None).unwrap());

    materialize(&log, "raw_users", None, t(3));
    assert!(tracker.is_stale(&key("users"), None).unwrap());
    assert!(
        tracker.is_stale(&key("user_recommender_model"), None).unwrap(),
        "never materialized while its upstream was"
    );
}

#[test]
fn nothing_materialized_means_nothing_stale() {
    let (tracker, _log) = tracker(scenario_a_graph());
    for path in ["raw_users", "users", "user_recommender_model"] {
        assert_eq!(
            tracker.staleness(&key(path), None).unwrap(),
            StalenessStatus::Fresh
        );
    }
}

#[test]
fn materializing_a_node_never_makes_it_stale_relative_to_upstream() {
    let (tracker, log) = tracker(scenario_a_graph());

    materialize(&log, "raw_users", None, t(1));
    assert!(tracker.is_stale(&key("users"), None).unwrap());

    materialize(&log, "users", None, t(2));
    assert!(!tracker.is_stale(&key("users"), None).unwrap());

    // Materializing again with no upstream change keeps it fresh and only
    // adds an event.
    materialize(&log, "users", None, t(3));
    assert!(!tracker.is_stale(&key("users"), None).unwrap());
    assert_eq!(log.events_for(&key("users")).unwrap().len(), 2);
}

#[test]
fn equal_timestamps_are_not_stale() {
    let (tracker, log) = tracker(scenario_a_graph());
    materialize(&log, "raw_users", None, t(5));
    materialize(&log, "users", None, t(5));
    assert!(!tracker.is_stale(&key("users"), None).unwrap());
}

#[test]
fn stale_downstream_walks_the_whole_closure() {
    let (tracker, log) = tracker(scenario_a_graph());
    materialize(&log, "raw_users", None, t(1));
    materialize(&log, "users", None, t(2));
    materialize(&log, "user_recommender_model", None, t(3));

    materialize(&log, "raw_users", None, t(4));
    let stale = tracker
        .stale_downstream_of(&[key("raw_users")].into_iter().collect(), None)
        .unwrap();
    assert_eq!(stale, vec![(key("users"), None)]);

    materialize(&log, "users", None, t(5));
    let stale = tracker
        .stale_downstream_of(&[key("users")].into_iter().collect(), None)
        .unwrap();
    assert_eq!(stale, vec![(key("user_recommender_model"), None)]);
}

#[test]
fn identical_partitions_compare_one_to_one() {
    let regions = PartitionsDefinition::static_keys(["eu", "us"]);
    let graph = AssetGraphBuilder::new()
        .with(SourceAssetSpec::new("events").partitions(regions.clone()))
        .with(AssetSpec::new("sessions").input("events", "events").partitions(regions))
        .build()
        .unwrap();
    let (tracker, log) = tracker(graph);

    materialize(&log, "events", Some("eu"), t(1));
    materialize(&log, "sessions", Some("eu"), t(2));
    materialize(&log, "events", Some("us"), t(3));

    assert!(!tracker.is_stale(&key("sessions"), Some("eu")).unwrap());
    assert!(tracker.is_stale(&key("sessions"), Some("us")).unwrap());

    materialize(&log, "events", Some("eu"), t(4));
    assert!(tracker.is_stale(&key("sessions"), Some("eu")).unwrap());
}

#[test]
fn unpartitioned_upstream_feeds_every_partition() {
    let graph = AssetGraphBuilder::new()
        .with(SourceAssetSpec::new("geo"))
        .with(
            AssetSpec::new("sessions")
                .input("geo", "geo")
                .partitions(PartitionsDefinition::static_keys(["eu", "us"])),
        )
        .build()
        .unwrap();
    let (tracker, log) = tracker(graph);

    materialize(&log, "sessions", Some("eu"), t(1));
    materialize(&log, "geo", None, t(2));
    materialize(&log, "sessions", Some("us"), t(3));

    assert!(tracker.is_stale(&key("sessions"), Some("eu")).unwrap());
    assert!(!tracker.is_stale(&key("sessions"), Some("us")).unwrap());
}

#[test]
fn unaligned_partitions_are_not_evaluated() {
    let daily = PartitionsDefinition::daily(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    let graph = AssetGraphBuilder::new()
        .with(SourceAssetSpec::new("events").partitions(daily))
        .with(
            AssetSpec::new("sessions")
                .input("events", "events")
                .partitions(PartitionsDefinition::static_keys(["eu", "us"])),
        )
        .build()
        .unwrap();
    let (tracker, log) = tracker(graph);

    materialize(&log, "events", Some("2024-01-01"), t(1));

    assert_eq!(
        tracker.staleness(&key("sessions"), Some("eu")).unwrap(),
        StalenessStatus::NotEvaluated(NotEvaluatedReason::UnalignedPartitions)
    );
    assert!(!tracker.is_stale(&key("sessions"), Some("eu")).unwrap());
}

#[test]
fn cross_load_unit_upstreams_are_not_evaluated() {
    let graph = AssetGraphBuilder::new()
        .load_unit("warehouse")
        .with(SourceAssetSpec::new("crm/accounts").external("crm"))
        .with(AssetSpec::new("accounts").input("src", "crm/accounts"))
        .build()
        .unwrap();
    let (tracker, log) = tracker(graph);

    materialize(&log, "crm/accounts", None, t(10));

    assert_eq!(
        tracker.staleness(&key("accounts"), None).unwrap(),
        StalenessStatus::NotEvaluated(NotEvaluatedReason::CrossLoadUnit {
            upstream: key("crm/accounts"),
            load_unit: "crm".to_string(),
        })
    );
    assert!(!tracker.is_stale(&key("accounts"), None).unwrap());
}

#[test]
fn partition_arguments_are_checked() {
    let graph = AssetGraphBuilder::new()
        .with(AssetSpec::new("plain"))
        .with(AssetSpec::new("split").partitions(PartitionsDefinition::static_keys(["a"])))
        .build()
        .unwrap();
    let (tracker, _log) = tracker(graph);

    assert!(matches!(
        tracker.staleness(&key("plain"), Some("a")),
        Err(MatdagError::InvalidPartition { .. })
    ));
    assert!(matches!(
        tracker.staleness(&key("split"), None),
        Err(MatdagError::InvalidPartition { .. })
    ));
    assert!(matches!(
        tracker.staleness(&key("split"), Some("zz")),
        Err(MatdagError::InvalidPartition { .. })
    ));
    assert!(matches!(
        tracker.staleness(&key("missing"), None),
        Err(MatdagError::UnknownAsset(_))
    ));
}
