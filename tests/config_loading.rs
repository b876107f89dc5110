// tests/config_loading.rs

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use matdag::config::{
    load_and_validate, load_from_path, validate_with_env, ConfigFile, RawConfigFile, SensorTarget,
};
use matdag::coordinator::{RunStatus, TagConcurrencyLimit, TagValue};
use matdag::errors::{MatdagError, ValidationError};
use matdag::events::InMemoryEventLog;
use matdag::fs::mock::MockFileSystem;
use matdag::graph::{AssetKey, PartitionsDefinition};
use matdag::registry::Registry;
use matdag::ticks::{MultiAssetTrigger, PurgeAfterDays, DEFAULT_MINIMUM_INTERVAL};
use matdag::types::{CoordinatorPolicy, InstigatorKind};
use matdag_test_utils::builders::ConfigFileBuilder;
use tempfile::tempdir;

const FULL_CONFIG: &str = r#"
[coordinator]
policy = "queued"
max_concurrent_runs = 4
dequeue_interval_seconds = 2
tag_concurrency_limits = [
    { key = "database", value = "redshift", limit = 1 },
    { key = "team", limit = 3 },
    { key = "tenant", value = { apply_limit_per_unique_value = true }, limit = 2 },
]

[retention.schedule]
purge_after_days = 30

[retention.sensor]
purge_after_days = { skipped = 1, failure = 14 }

[sensor_evaluation]
use_threads = true
num_workers = 4

[launcher]
cmd = "materialize --run"

[source_asset.raw_users]
group = "ingest"

[asset.users]
ins = { raw = "raw_users" }
op = "build_users"
group = "core"

[asset.user_recommender_model]
ins = { users = "users" }
config_schema = { epochs = "int" }

[job.users_job]
selection = ["users*"]
tags = { team = "ml" }

[schedule.nightly]
cron = "0 0 2 * * *"
job = "users_job"

[sensor.users_changed]
kind = "asset"
asset = "users"
job = "users_job"
minimum_interval_seconds = 60

[sensor.csv_drop]
kind = "file"
root = "data"
include = ["**/*.csv"]
exclude = ["**/tmp/**"]
job = "users_job"
"#;

fn parse(toml_text: &str) -> RawConfigFile {
    toml::from_str(toml_text).expect("valid toml")
}

fn no_env(_: &str) -> Option<String> {
    None
}

fn validate(toml_text: &str) -> Result<ConfigFile, MatdagError> {
    validate_with_env(parse(toml_text), &no_env)
}

#[test]
fn empty_file_gets_defaults() {
    let cfg = validate("").unwrap();
    assert_eq!(cfg.coordinator.policy, CoordinatorPolicy::Queued);
    assert_eq!(cfg.coordinator.limits.max_concurrent_runs, Some(10));
    assert_eq!(cfg.coordinator.dequeue_interval, Duration::from_secs(5));
    assert_eq!(cfg.coordinator.launch_timeout, Duration::from_secs(60));
    assert_eq!(cfg.coordinator.termination_timeout, Duration::from_secs(30));
    assert_eq!(cfg.retention.schedule, PurgeAfterDays::default());
    assert_eq!(cfg.sensor_evaluation.effective_workers(), 1);
    assert!(cfg.launcher_cmd.is_none());
    assert!(cfg.graph.is_empty());
}

#[test]
fn full_config_loads_from_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Matdag.toml");
    fs::write(&path, FULL_CONFIG).unwrap();

    let raw = load_from_path(&path).unwrap();
    assert_eq!(raw.asset.len(), 2);

    let cfg = load_and_validate(&path).unwrap();
    assert_eq!(cfg.coordinator.limits.max_concurrent_runs, Some(4));
    assert_eq!(cfg.coordinator.dequeue_interval, Duration::from_secs(2));
    assert_eq!(
        cfg.coordinator.limits.tag_limits,
        vec![
            TagConcurrencyLimit::exact("database", "redshift", 1),
            TagConcurrencyLimit::any("team", 3),
            TagConcurrencyLimit::per_unique_value("tenant", 2),
        ]
    );
    assert_eq!(cfg.retention.schedule, PurgeAfterDays::uniform(30));
    assert_eq!(
        cfg.retention.sensor,
        PurgeAfterDays {
            skipped: 1,
            success: -1,
            failure: 14,
        }
    );
    assert_eq!(cfg.sensor_evaluation.effective_workers(), 4);
    assert_eq!(cfg.launcher_cmd.as_deref(), Some("materialize --run"));

    assert_eq!(cfg.graph.len(), 3);
    let users = cfg.graph.node(&AssetKey::parse("users")).unwrap();
    assert_eq!(users.group, "core");
    assert_eq!(cfg.jobs.len(), 1);
    assert_eq!(cfg.jobs[0].tags.get("team").map(String::as_str), Some("ml"));
    assert_eq!(cfg.schedules[0].name, "nightly");

    let asset_sensor = cfg.sensors.iter().find(|s| s.name == "users_changed").unwrap();
    assert_eq!(asset_sensor.minimum_interval, Duration::from_secs(60));
    assert!(matches!(&asset_sensor.target, SensorTarget::Asset(k) if *k == AssetKey::parse("users")));

    let file_sensor = cfg.sensors.iter().find(|s| s.name == "csv_drop").unwrap();
    assert_eq!(file_sensor.minimum_interval, DEFAULT_MINIMUM_INTERVAL);
    match &file_sensor.target {
        SensorTarget::Files { root, patterns } => {
            assert_eq!(root, &dir.path().join("data"));
            assert!(patterns.matches("2024/users.csv"));
            assert!(!patterns.matches("tmp/users.csv"));
        }
        other => panic!("expected file target, got {other:?}"),
    }
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempdir().unwrap();
    let err = load_and_validate(dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, MatdagError::IoError(_)));
}

#[test]
fn malformed_toml_is_a_toml_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Matdag.toml");
    fs::write(&path, "[coordinator\npolicy = ").unwrap();
    assert!(matches!(load_from_path(&path).unwrap_err(), MatdagError::TomlError(_)));
}

#[test]
fn env_indirection_resolves_through_lookup() {
    let raw = parse(
        r#"
[coordinator]
policy = { env = "MATDAG_POLICY" }
max_concurrent_runs = { env = "MATDAG_MAX_RUNS" }
tag_concurrency_limits = [
    { key = "database", value = { env = "MATDAG_DB" }, limit = { env = "MATDAG_DB_LIMIT" } },
]
"#,
    );
    let env: HashMap<&str, &str> = HashMap::from([
        ("MATDAG_POLICY", "immediate"),
        ("MATDAG_MAX_RUNS", "-1"),
        ("MATDAG_DB", "snowflake"),
        ("MATDAG_DB_LIMIT", "2"),
    ]);
    let lookup = |name: &str| env.get(name).map(|v| v.to_string());

    let cfg = validate_with_env(raw.clone(), &lookup).unwrap();
    assert_eq!(cfg.coordinator.policy, CoordinatorPolicy::Immediate);
    assert_eq!(cfg.coordinator.limits.max_concurrent_runs, None);
    let limit = &cfg.coordinator.limits.tag_limits[0];
    assert_eq!(limit.value, TagValue::Exact("snowflake".to_string()));
    assert_eq!(limit.limit, 2);

    let err = validate_with_env(raw, &no_env).unwrap_err();
    assert!(err.to_string().contains("MATDAG_POLICY"));
}

#[test]
fn env_value_must_parse() {
    let raw = parse("[coordinator]\nmax_concurrent_runs = { env = \"RUNS\" }\n");
    let err = validate_with_env(raw, &|_| Some("many".to_string())).unwrap_err();
    assert!(err.to_string().contains("invalid value"));
}

#[test]
fn per_unique_false_means_any_value() {
    let cfg = validate(
        r#"
[coordinator]
tag_concurrency_limits = [{ key = "team", value = { apply_limit_per_unique_value = false }, limit = 1 }]
"#,
    )
    .unwrap();
    assert_eq!(cfg.coordinator.limits.tag_limits, vec![TagConcurrencyLimit::any("team", 1)]);
}

#[test]
fn invalid_scalars_are_rejected() {
    for text in [
        "[coordinator]\npolicy = \"eventually\"\n",
        "[coordinator]\nmax_concurrent_runs = -2\n",
        "[coordinator]\ntag_concurrency_limits = [{ key = \"\", limit = 1 }]\n",
        "[coordinator]\ntag_concurrency_limits = [{ key = \"team\", limit = -1 }]\n",
        "[retention.sensor]\npurge_after_days = -5\n",
        "[retention.sensor]\npurge_after_days = 100000000\n",
        "[retention.schedule]\npurge_after_days = { skipped = 36501 }\n",
        "[sensor_evaluation]\nnum_workers = 0\n",
        "[sensor_evaluation]\nuse_threads = true\nnum_workers = 100000000\n",
        "[launcher]\ncmd = \"  \"\n",
    ] {
        let err = validate(text).unwrap_err();
        assert!(matches!(err, MatdagError::ConfigError(_)), "{text}: {err}");
    }
}

#[test]
fn graph_errors_surface_as_validation_errors() {
    let err = validate(
        r#"
[asset.a]
ins = { b = "b" }
[asset.b]
ins = { a = "a" }
"#,
    )
    .unwrap_err();
    assert!(matches!(err, MatdagError::Validation(ValidationError::Cycle { .. })));

    let err = validate("[asset.a]\ndeps = [\"missing\"]\n").unwrap_err();
    assert!(matches!(
        err,
        MatdagError::Validation(ValidationError::UnresolvedReference { .. })
    ));
}

#[test]
fn external_assets_satisfy_references() {
    let cfg = validate(
        r#"
[definitions]
load_unit = "analytics"

[external_asset."warehouse/orders"]
load_unit = "ingest"

[asset.order_stats]
ins = { orders = "warehouse/orders" }
"#,
    )
    .unwrap();
    assert_eq!(cfg.graph.load_unit(), "analytics");
    let orders = cfg.graph.node(&AssetKey::parse("warehouse/orders")).unwrap();
    assert_eq!(orders.load_unit, "ingest");
    assert!(!orders.materializable());
}

#[test]
fn partitions_are_parsed() {
    let cfg = validate(
        r#"
[asset.events]
partitions = { daily = "2024-01-01" }

[asset.region_stats]
partitions = { static = ["eu", "us"] }

[asset.clicks]
partitions = { hourly = "2024-01-01-00:00" }
"#,
    )
    .unwrap();
    let events = cfg.graph.node(&AssetKey::parse("events")).unwrap();
    assert!(events.partitions.as_ref().unwrap().contains("2024-02-03"));
    let regions = cfg.graph.node(&AssetKey::parse("region_stats")).unwrap();
    assert_eq!(
        regions.partitions,
        Some(PartitionsDefinition::static_keys(["eu", "us"]))
    );

    for bad in [
        "[asset.x]\npartitions = { daily = \"January\" }\n",
        "[asset.x]\npartitions = { static = [] }\n",
        "[asset.x]\npartitions = { static = [\"a\", \"a\"] }\n",
        "[asset.x]\nconfig_schema = { n = \"complex\" }\n",
    ] {
        assert!(validate(bad).is_err(), "{bad}");
    }
}

#[test]
fn graph_asset_section_expands_outputs() {
    let cfg = validate(
        r#"
[source_asset.raw]

[graph_asset.pipeline]
ins = { raw = "raw" }
steps = [
    { name = "clean" },
    { name = "train", op = "fit_model", after = ["clean"] },
]
outputs = { cleaned = { step = "clean", key = "cleaned" }, model = { step = "train", key = "model" } }
internal_deps = { model = ["cleaned"] }
"#,
    )
    .unwrap();
    assert!(cfg.graph.contains(&AssetKey::parse("cleaned")));
    assert!(cfg
        .graph
        .upstream_of(&AssetKey::parse("model"))
        .contains(&AssetKey::parse("cleaned")));
}

#[test]
fn definitions_must_reference_known_things() {
    let base = ConfigFileBuilder::new().asset("a", &[]).job("a_job", &["a"]);

    let err = base.clone().schedule("s", "0 0 * * * *", "missing").try_build().unwrap_err();
    assert!(err.to_string().contains("unknown job"));

    let err = base.clone().schedule("s", "whenever", "a_job").try_build().unwrap_err();
    assert!(err.to_string().contains("cron"));

    let err = base.clone().asset_sensor("s", "ghost", "a_job").try_build().unwrap_err();
    assert!(matches!(err, MatdagError::UnknownAsset(_)));

    let err = base
        .clone()
        .multi_asset_sensor("m", &["a", "ghost"], "a_job")
        .try_build()
        .unwrap_err();
    assert!(err.to_string().contains("no asset with key 'ghost'"));

    let err = base
        .clone()
        .schedule("dup", "0 0 * * * *", "a_job")
        .asset_sensor("dup", "a", "a_job")
        .try_build()
        .unwrap_err();
    assert!(err.to_string().contains("dup"));

    let err = base.clone().job("empty", &[]).try_build().unwrap_err();
    assert!(err.to_string().contains("at least one"));

    let err = ConfigFileBuilder::new()
        .source_asset("raw")
        .job("sources_only", &["raw"])
        .try_build()
        .unwrap_err();
    assert!(err.to_string().contains("no materializable"));
}

#[test]
fn file_sensor_requires_root_and_include() {
    for text in [
        "[sensor.f]\nkind = \"file\"\njob = \"j\"\ninclude = [\"*.csv\"]\n",
        "[sensor.f]\nkind = \"file\"\njob = \"j\"\nroot = \"data\"\n",
        "[sensor.f]\nkind = \"file\"\njob = \"j\"\nroot = \"data\"\ninclude = [\"[\"]\n",
        "[sensor.a]\nkind = \"asset\"\njob = \"j\"\n",
    ] {
        let full = format!("[asset.x]\n[job.j]\nselection = [\"x\"]\n{text}");
        assert!(validate(&full).is_err(), "{text}");
    }
}

const RUN_SENSOR_CONFIG: &str = r#"
[asset.users]
[asset.orders]

[job.users_job]
selection = ["users"]

[job.alert_job]
selection = ["orders"]

[sensor.both_landed]
kind = "multi_asset"
assets = ["users", "orders"]
job = "alert_job"

[sensor.either_landed]
kind = "multi_asset"
assets = ["users", "orders"]
require = "any"
job = "alert_job"

[sensor.users_failed]
kind = "run_failure"
monitored_jobs = ["users_job"]
job = "alert_job"

[sensor.anything_canceled]
kind = "run_status"
status = "canceled"
job = "alert_job"
"#;

#[test]
fn run_status_and_multi_asset_sensors_are_configured() {
    let cfg = validate(RUN_SENSOR_CONFIG).unwrap();
    let target = |name: &str| &cfg.sensors.iter().find(|s| s.name == name).unwrap().target;

    assert!(matches!(
        target("both_landed"),
        SensorTarget::MultiAsset { assets, trigger: MultiAssetTrigger::All } if assets.len() == 2
    ));
    assert!(matches!(
        target("either_landed"),
        SensorTarget::MultiAsset { trigger: MultiAssetTrigger::Any, .. }
    ));
    assert!(matches!(
        target("users_failed"),
        SensorTarget::RunStatus { status: RunStatus::Failure, monitored_jobs } if monitored_jobs == &vec!["users_job".to_string()]
    ));
    assert!(matches!(
        target("anything_canceled"),
        SensorTarget::RunStatus { status: RunStatus::Canceled, monitored_jobs } if monitored_jobs.is_empty()
    ));

    let registry = Registry::from_config(
        &cfg,
        Arc::new(InMemoryEventLog::new()),
        Arc::new(MockFileSystem::new()),
    )
    .unwrap();
    assert_eq!(registry.instigators().len(), 4);
    assert!(registry.instigators().iter().all(|i| i.kind() == InstigatorKind::Sensor));
}

#[test]
fn multi_asset_sensor_names_the_missing_asset() {
    let text = "[asset.users]\n[job.j]\nselection = [\"users\"]\n\
                [sensor.m]\nkind = \"multi_asset\"\nassets = [\"users\", \"ghost\"]\njob = \"j\"\n";
    let err = validate(text).unwrap_err();
    assert!(err.to_string().contains("no asset with key 'ghost'"), "{err}");
}

#[test]
fn run_sensors_reject_incomplete_definitions() {
    for text in [
        "[sensor.m]\nkind = \"multi_asset\"\njob = \"j\"\n",
        "[sensor.r]\nkind = \"run_status\"\njob = \"j\"\n",
        "[sensor.r]\nkind = \"run_status\"\nstatus = \"started\"\njob = \"j\"\n",
        "[sensor.r]\nkind = \"run_failure\"\nstatus = \"success\"\njob = \"j\"\n",
        "[sensor.r]\nkind = \"run_failure\"\nmonitored_jobs = [\"nope\"]\njob = \"j\"\n",
        "[sensor.m]\nkind = \"multi_asset\"\nassets = [\"x\"]\nrequire = \"most\"\njob = \"j\"\n",
    ] {
        let full = format!("[asset.x]\n[job.j]\nselection = [\"x\"]\n{text}");
        assert!(toml::from_str::<RawConfigFile>(&full).is_err() || validate(&full).is_err(), "{text}");
    }
}

#[test]
fn registry_is_built_from_config() {
    let cfg = validate(FULL_CONFIG).unwrap();
    let registry = Registry::from_config(
        &cfg,
        Arc::new(InMemoryEventLog::new()),
        Arc::new(MockFileSystem::new()),
    )
    .unwrap();

    assert!(registry.job("users_job").is_some());
    let mut names: Vec<(&str, InstigatorKind)> = registry
        .instigators()
        .iter()
        .map(|i| (i.name(), i.kind()))
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            ("csv_drop", InstigatorKind::Sensor),
            ("nightly", InstigatorKind::Schedule),
            ("users_changed", InstigatorKind::Sensor),
        ]
    );
    assert!(registry.instigators().iter().all(|i| i.job() == Some("users_job")));
}

#[test]
fn relative_roots_are_kept_when_validating_without_a_path() {
    let cfg = validate(FULL_CONFIG).unwrap();
    let file_sensor = cfg.sensors.iter().find(|s| s.name == "csv_drop").unwrap();
    assert!(matches!(&file_sensor.target, SensorTarget::Files { root, .. } if *root == PathBuf::from("data")));
}
