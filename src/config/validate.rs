// src/config/validate.rs

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};

use crate::config::env::EnvOr;
use crate::config::model::{
    ConfigFile, CoordinatorSection, PartitionsConfig, PurgeAfterDaysConfig, RawConfigFile,
    RequireConfig, RetentionKindConfig, RetentionSection, RunStatusConfig, ScheduleDefinition,
    SensorDefinition, SensorEvaluationSection, SensorKindConfig, SensorTarget, TagLimitConfig,
    TagLimitValueConfig,
};
use crate::coordinator::{ConcurrencyLimits, CoordinatorSettings, RunStatus, TagConcurrencyLimit};
use crate::errors::{MatdagError, Result};
use crate::graph::{
    AssetGraph, AssetGraphBuilder, AssetKey, AssetSelection, AssetSpec, Cadence, ConfigType,
    GraphAssetSpec, OpHandle, OpStep, PartitionsDefinition, SourceAssetSpec, SubGraph,
    DEFAULT_LOAD_UNIT,
};
use crate::registry::JobDefinition;
use crate::ticks::{
    CronSchedule, FilePatterns, MultiAssetTrigger, PurgeAfterDays, RetentionPolicy,
    SensorEvaluationSettings, DEFAULT_MINIMUM_INTERVAL, MAX_PURGE_AFTER_DAYS, MAX_WORKERS,
};
use crate::types::CoordinatorPolicy;

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = MatdagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_with_env(raw, &|name| std::env::var(name).ok())
    }
}

/// Validate `raw`, resolving `{ env = "..." }` values through `lookup`.
pub fn validate_with_env(raw: RawConfigFile, lookup: Lookup<'_>) -> Result<ConfigFile> {
    let coordinator = validate_coordinator(&raw.coordinator, lookup)?;
    let retention = validate_retention(&raw.retention)?;
    let sensor_evaluation = validate_sensor_evaluation(&raw.sensor_evaluation, lookup)?;
    let launcher_cmd = validate_launcher(&raw)?;
    let graph = build_graph(&raw)?;
    let jobs = validate_jobs(&raw, &graph)?;
    ensure_unique_instigator_names(&raw)?;
    let schedules = validate_schedules(&raw)?;
    let sensors = validate_sensors(&raw, &graph)?;

    Ok(ConfigFile {
        coordinator,
        retention,
        sensor_evaluation,
        launcher_cmd,
        graph,
        jobs,
        schedules,
        sensors,
    })
}

fn config_error(msg: impl Into<String>) -> MatdagError {
    MatdagError::ConfigError(msg.into())
}

fn validate_coordinator(section: &CoordinatorSection, lookup: Lookup<'_>) -> Result<CoordinatorSettings> {
    let policy = section
        .policy
        .resolve_with("[coordinator].policy", lookup)?
        .parse::<CoordinatorPolicy>()
        .map_err(|e| config_error(format!("[coordinator].policy: {e}")))?;

    let max = section
        .max_concurrent_runs
        .resolve_with("[coordinator].max_concurrent_runs", lookup)?;
    let max_concurrent_runs = match max {
        -1 => None,
        n if n < -1 => {
            return Err(config_error(format!(
                "[coordinator].max_concurrent_runs must be >= -1 (got {n})"
            )));
        }
        n => Some(usize::try_from(n).map_err(|e| {
            config_error(format!("[coordinator].max_concurrent_runs: {e}"))
        })?),
    };

    let tag_limits = section
        .tag_concurrency_limits
        .iter()
        .enumerate()
        .map(|(i, limit)| validate_tag_limit(i, limit, lookup))
        .collect::<Result<Vec<_>>>()?;

    let secs = |value: &EnvOr<u64>, field: &str| -> Result<Duration> {
        Ok(Duration::from_secs(
            value.resolve_with(&format!("[coordinator].{field}"), lookup)?,
        ))
    };

    Ok(CoordinatorSettings {
        policy,
        limits: ConcurrencyLimits::new(max_concurrent_runs, tag_limits),
        dequeue_interval: secs(&section.dequeue_interval_seconds, "dequeue_interval_seconds")?,
        launch_timeout: secs(&section.launch_timeout_seconds, "launch_timeout_seconds")?,
        termination_timeout: secs(
            &section.termination_timeout_seconds,
            "termination_timeout_seconds",
        )?,
        retained_runs: section
            .retained_runs
            .resolve_with("[coordinator].retained_runs", lookup)?,
        retained_run_keys: section
            .retained_run_keys
            .resolve_with("[coordinator].retained_run_keys", lookup)?,
    })
}

fn validate_tag_limit(index: usize, cfg: &TagLimitConfig, lookup: Lookup<'_>) -> Result<TagConcurrencyLimit> {
    let field = format!("[coordinator].tag_concurrency_limits[{index}]");

    let key = cfg.key.resolve_with(&format!("{field}.key"), lookup)?;
    if key.trim().is_empty() {
        return Err(config_error(format!("{field}.key must not be empty")));
    }

    let limit = cfg.limit.resolve_with(&format!("{field}.limit"), lookup)?;
    let limit = usize::try_from(limit)
        .map_err(|_| config_error(format!("{field}.limit must be >= 0 (got {limit})")))?;

    let limit = match &cfg.value {
        None => TagConcurrencyLimit::any(&key, limit),
        Some(TagLimitValueConfig::PerUniqueValue {
            apply_limit_per_unique_value: true,
        }) => TagConcurrencyLimit::per_unique_value(&key, limit),
        Some(TagLimitValueConfig::PerUniqueValue {
            apply_limit_per_unique_value: false,
        }) => TagConcurrencyLimit::any(&key, limit),
        Some(TagLimitValueConfig::Value(value)) => {
            let value = value.resolve_with(&format!("{field}.value"), lookup)?;
            TagConcurrencyLimit::exact(&key, &value, limit)
        }
    };
    Ok(limit)
}

fn validate_retention(section: &RetentionSection) -> Result<RetentionPolicy> {
    Ok(RetentionPolicy {
        schedule: purge_days("schedule", section.schedule.as_ref())?,
        sensor: purge_days("sensor", section.sensor.as_ref())?,
    })
}

fn purge_days(kind: &str, cfg: Option<&RetentionKindConfig>) -> Result<PurgeAfterDays> {
    let defaults = PurgeAfterDays::default();
    let days = match cfg.map(|c| &c.purge_after_days) {
        None => defaults,
        Some(PurgeAfterDaysConfig::Uniform(days)) => PurgeAfterDays::uniform(*days),
        Some(PurgeAfterDaysConfig::PerOutcome {
            skipped,
            success,
            failure,
        }) => PurgeAfterDays {
            skipped: skipped.unwrap_or(defaults.skipped),
            success: success.unwrap_or(defaults.success),
            failure: failure.unwrap_or(defaults.failure),
        },
    };

    for (outcome, value) in [
        ("skipped", days.skipped),
        ("success", days.success),
        ("failure", days.failure),
    ] {
        if !(-1..=MAX_PURGE_AFTER_DAYS).contains(&value) {
            return Err(config_error(format!(
                "[retention.{kind}].purge_after_days.{outcome} must be between -1 and \
                 {MAX_PURGE_AFTER_DAYS} (got {value})"
            )));
        }
    }
    Ok(days)
}

fn validate_sensor_evaluation(
    section: &SensorEvaluationSection,
    lookup: Lookup<'_>,
) -> Result<SensorEvaluationSettings> {
    let use_threads = section
        .use_threads
        .resolve_with("[sensor_evaluation].use_threads", lookup)?;
    let workers = section
        .num_workers
        .resolve_with("[sensor_evaluation].num_workers", lookup)?;
    if workers < 1 {
        return Err(config_error(format!(
            "[sensor_evaluation].num_workers must be >= 1 (got {workers})"
        )));
    }
    let num_workers = usize::try_from(workers)
        .map_err(|e| config_error(format!("[sensor_evaluation].num_workers: {e}")))?;
    if num_workers > MAX_WORKERS {
        return Err(config_error(format!(
            "[sensor_evaluation].num_workers must be <= {MAX_WORKERS} (got {num_workers})"
        )));
    }

    Ok(SensorEvaluationSettings {
        use_threads,
        num_workers,
    })
}

fn validate_launcher(cfg: &RawConfigFile) -> Result<Option<String>> {
    match &cfg.launcher.cmd {
        Some(cmd) if cmd.trim().is_empty() => {
            Err(config_error("[launcher].cmd must not be empty"))
        }
        other => Ok(other.clone()),
    }
}

fn parse_partitions(owner: &str, cfg: &PartitionsConfig) -> Result<PartitionsDefinition> {
    match cfg {
        PartitionsConfig::Static(keys) => {
            if keys.is_empty() {
                return Err(config_error(format!(
                    "{owner}: static partitions must list at least one key"
                )));
            }
            let unique: BTreeSet<&String> = keys.iter().collect();
            if unique.len() != keys.len() {
                return Err(config_error(format!(
                    "{owner}: static partition keys must be unique"
                )));
            }
            Ok(PartitionsDefinition::static_keys(keys.iter().cloned()))
        }
        PartitionsConfig::Daily(start) => NaiveDate::parse_from_str(start, Cadence::Daily.key_format())
            .map(PartitionsDefinition::daily)
            .map_err(|e| {
                config_error(format!("{owner}: invalid daily partition start '{start}': {e}"))
            }),
        PartitionsConfig::Hourly(start) => {
            NaiveDateTime::parse_from_str(start, Cadence::Hourly.key_format())
                .map(PartitionsDefinition::hourly)
                .map_err(|e| {
                    config_error(format!(
                        "{owner}: invalid hourly partition start '{start}' (expected YYYY-MM-DD-HH:MM): {e}"
                    ))
                })
        }
    }
}

fn parse_config_schema(owner: &str, schema: &BTreeMap<String, String>) -> Result<BTreeMap<String, ConfigType>> {
    schema
        .iter()
        .map(|(option, ty)| {
            ty.parse::<ConfigType>()
                .map(|ty| (option.clone(), ty))
                .map_err(|e| config_error(format!("{owner}: config option '{option}': {e}")))
        })
        .collect()
}

/// Turn every asset section into a declaration and compile the graph.
fn build_graph(cfg: &RawConfigFile) -> Result<AssetGraph> {
    let load_unit = cfg
        .definitions
        .load_unit
        .as_deref()
        .unwrap_or(DEFAULT_LOAD_UNIT);
    if load_unit.trim().is_empty() {
        return Err(config_error("[definitions].load_unit must not be empty"));
    }

    let mut builder = AssetGraphBuilder::new().load_unit(load_unit);

    for (key, source) in &cfg.source_asset {
        let owner = format!("[source_asset.\"{key}\"]");
        let mut spec = SourceAssetSpec::new(AssetKey::parse(key));
        if let Some(group) = &source.group {
            spec = spec.group(group);
        }
        if let Some(partitions) = &source.partitions {
            spec = spec.partitions(parse_partitions(&owner, partitions)?);
        }
        spec.metadata = source.metadata.clone();
        builder.add(spec);
    }

    for (key, external) in &cfg.external_asset {
        let owner = format!("[external_asset.\"{key}\"]");
        if external.load_unit.trim().is_empty() {
            return Err(config_error(format!("{owner}.load_unit must not be empty")));
        }
        let mut spec = SourceAssetSpec::new(AssetKey::parse(key)).external(&external.load_unit);
        if let Some(group) = &external.group {
            spec = spec.group(group);
        }
        if let Some(partitions) = &external.partitions {
            spec = spec.partitions(parse_partitions(&owner, partitions)?);
        }
        builder.add(spec);
    }

    for (key, asset) in &cfg.asset {
        let owner = format!("[asset.\"{key}\"]");
        let mut spec = AssetSpec::new(AssetKey::parse(key)).key_prefix(asset.key_prefix.iter().cloned());
        for (slot, upstream) in &asset.ins {
            spec = spec.input(slot, AssetKey::parse(upstream));
        }
        for dep in &asset.deps {
            spec = spec.dep(AssetKey::parse(dep));
        }
        if let Some(group) = &asset.group {
            spec = spec.group(group);
        }
        if let Some(op) = &asset.op {
            spec = spec.op(op);
        }
        if let Some(partitions) = &asset.partitions {
            spec = spec.partitions(parse_partitions(&owner, partitions)?);
        }
        spec.config_schema = parse_config_schema(&owner, &asset.config_schema)?;
        spec.metadata = asset.metadata.clone();
        spec.required_resources = asset.resources.iter().cloned().collect();
        builder.add(spec);
    }

    for (name, graph_asset) in &cfg.graph_asset {
        let owner = format!("[graph_asset.{name}]");
        let steps = graph_asset
            .steps
            .iter()
            .map(|step| OpStep {
                name: step.name.clone(),
                op: OpHandle::new(step.op.as_deref().unwrap_or(&step.name)),
                upstream_steps: step.after.clone(),
            })
            .collect();
        let mut spec = GraphAssetSpec::new(SubGraph {
            name: name.clone(),
            steps,
        })
        .key_prefix(graph_asset.key_prefix.iter().cloned());

        for (output, out) in &graph_asset.outputs {
            spec = spec.output(output, &out.step, AssetKey::parse(&out.key));
        }
        for (slot, upstream) in &graph_asset.ins {
            spec = spec.input(slot, AssetKey::parse(upstream));
        }
        for (output, deps) in &graph_asset.internal_deps {
            if !graph_asset.outputs.contains_key(output) {
                return Err(config_error(format!(
                    "{owner}: internal_deps names unknown output '{output}'"
                )));
            }
            for dep in deps {
                spec = spec.internal_dep(output, AssetKey::parse(dep));
            }
        }
        if let Some(group) = &graph_asset.group {
            spec = spec.group(group);
        }
        if let Some(partitions) = &graph_asset.partitions {
            spec = spec.partitions(parse_partitions(&owner, partitions)?);
        }
        builder.add(spec);
    }

    Ok(builder.build()?)
}

fn validate_jobs(cfg: &RawConfigFile, graph: &AssetGraph) -> Result<Vec<JobDefinition>> {
    let mut jobs = Vec::with_capacity(cfg.job.len());
    for (name, job) in &cfg.job {
        if job.selection.is_empty() {
            return Err(config_error(format!(
                "[job.{name}].selection must list at least one term"
            )));
        }
        let selection = AssetSelection::parse_all(&job.selection)?;
        if selection.resolve(graph)?.is_empty() {
            return Err(config_error(format!(
                "[job.{name}] selects no materializable assets"
            )));
        }
        jobs.push(JobDefinition {
            name: name.clone(),
            selection,
            tags: job.tags.clone(),
        });
    }
    Ok(jobs)
}

fn ensure_job_exists(cfg: &RawConfigFile, owner: &str, job: &str) -> Result<()> {
    if cfg.job.contains_key(job) {
        Ok(())
    } else {
        Err(config_error(format!("{owner} references unknown job '{job}'")))
    }
}

fn ensure_unique_instigator_names(cfg: &RawConfigFile) -> Result<()> {
    for name in cfg.schedule.keys() {
        if cfg.sensor.contains_key(name) {
            return Err(config_error(format!(
                "'{name}' is used both as a schedule and as a sensor name"
            )));
        }
    }
    Ok(())
}

fn validate_schedules(cfg: &RawConfigFile) -> Result<Vec<ScheduleDefinition>> {
    let mut schedules = Vec::with_capacity(cfg.schedule.len());
    for (name, schedule) in &cfg.schedule {
        ensure_job_exists(cfg, &format!("[schedule.{name}]"), &schedule.job)?;
        CronSchedule::new(name, &schedule.cron, &schedule.job)?;
        schedules.push(ScheduleDefinition {
            name: name.clone(),
            cron: schedule.cron.clone(),
            job: schedule.job.clone(),
            tags: schedule.tags.clone(),
        });
    }
    Ok(schedules)
}

fn validate_sensors(cfg: &RawConfigFile, graph: &AssetGraph) -> Result<Vec<SensorDefinition>> {
    let mut sensors = Vec::with_capacity(cfg.sensor.len());
    for (name, sensor) in &cfg.sensor {
        let owner = format!("[sensor.{name}]");
        ensure_job_exists(cfg, &owner, &sensor.job)?;

        let target = match sensor.kind {
            SensorKindConfig::Asset => {
                let asset = sensor
                    .asset
                    .as_deref()
                    .ok_or_else(|| config_error(format!("{owner}: kind = \"asset\" requires `asset`")))?;
                let key = AssetKey::parse(asset);
                if !graph.contains(&key) {
                    return Err(MatdagError::UnknownAsset(key));
                }
                SensorTarget::Asset(key)
            }
            SensorKindConfig::MultiAsset => {
                if sensor.assets.is_empty() {
                    return Err(config_error(format!(
                        "{owner}: kind = \"multi_asset\" requires at least one entry in `assets`"
                    )));
                }
                let assets: Vec<AssetKey> = sensor.assets.iter().map(|a| AssetKey::parse(a)).collect();
                if let Some(missing) = assets.iter().find(|k| !graph.contains(k)) {
                    return Err(config_error(format!("{owner}: no asset with key '{missing}'")));
                }
                SensorTarget::MultiAsset {
                    assets,
                    trigger: match sensor.require {
                        RequireConfig::All => MultiAssetTrigger::All,
                        RequireConfig::Any => MultiAssetTrigger::Any,
                    },
                }
            }
            SensorKindConfig::RunStatus | SensorKindConfig::RunFailure => {
                let status = match (sensor.kind, sensor.status) {
                    (SensorKindConfig::RunFailure, None | Some(RunStatusConfig::Failure)) => RunStatus::Failure,
                    (SensorKindConfig::RunFailure, Some(_)) => {
                        return Err(config_error(format!(
                            "{owner}: kind = \"run_failure\" only watches failed runs; drop `status`"
                        )));
                    }
                    (_, None) => {
                        return Err(config_error(format!("{owner}: kind = \"run_status\" requires `status`")));
                    }
                    (_, Some(RunStatusConfig::Success)) => RunStatus::Success,
                    (_, Some(RunStatusConfig::Failure)) => RunStatus::Failure,
                    (_, Some(RunStatusConfig::Canceled)) => RunStatus::Canceled,
                };
                for job in &sensor.monitored_jobs {
                    ensure_job_exists(cfg, &format!("{owner} monitored_jobs"), job)?;
                }
                SensorTarget::RunStatus {
                    status,
                    monitored_jobs: sensor.monitored_jobs.clone(),
                }
            }
            SensorKindConfig::File => {
                let root = sensor
                    .root
                    .as_deref()
                    .ok_or_else(|| config_error(format!("{owner}: kind = \"file\" requires `root`")))?;
                if sensor.include.is_empty() {
                    return Err(config_error(format!(
                        "{owner}: kind = \"file\" requires at least one `include` pattern"
                    )));
                }
                let patterns = FilePatterns::new(&sensor.include, &sensor.exclude)
                    .map_err(|e| config_error(format!("{owner}: {e:#}")))?;
                SensorTarget::Files {
                    root: PathBuf::from(root),
                    patterns,
                }
            }
        };

        sensors.push(SensorDefinition {
            name: name.clone(),
            target,
            job: sensor.job.clone(),
            minimum_interval: sensor
                .minimum_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_MINIMUM_INTERVAL),
            tags: sensor.tags.clone(),
        });
    }
    Ok(sensors)
}
