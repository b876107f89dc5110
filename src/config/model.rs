// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::config::env::EnvOr;
use crate::coordinator::{CoordinatorSettings, RunStatus};
use crate::graph::{AssetGraph, AssetKey};
use crate::registry::JobDefinition;
use crate::ticks::{FilePatterns, MultiAssetTrigger, RetentionPolicy, SensorEvaluationSettings};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [coordinator]
/// policy = "queued"
/// max_concurrent_runs = 10
///
/// [asset.users]
/// ins = { raw = "raw_users" }
/// op = "build_users"
///
/// [job.users_job]
/// selection = ["users*"]
///
/// [schedule.nightly]
/// cron = "0 0 0 * * *"
/// job = "users_job"
/// ```
///
/// All sections are optional and have reasonable defaults. Deserializing
/// only checks shapes; [`ConfigFile::try_from`] does the rest.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub coordinator: CoordinatorSection,

    #[serde(default)]
    pub retention: RetentionSection,

    #[serde(default)]
    pub sensor_evaluation: SensorEvaluationSection,

    #[serde(default)]
    pub launcher: LauncherSection,

    #[serde(default)]
    pub definitions: DefinitionsSection,

    /// `[source_asset.<key>]`; keys are `/`-separated asset paths.
    #[serde(default)]
    pub source_asset: BTreeMap<String, SourceAssetConfig>,

    /// `[asset.<key>]`
    #[serde(default)]
    pub asset: BTreeMap<String, AssetConfig>,

    /// `[graph_asset.<name>]`: several assets computed by one op sub-graph.
    #[serde(default)]
    pub graph_asset: BTreeMap<String, GraphAssetConfig>,

    /// `[external_asset.<key>]`: assets owned by another load unit.
    #[serde(default)]
    pub external_asset: BTreeMap<String, ExternalAssetConfig>,

    #[serde(default)]
    pub job: BTreeMap<String, JobConfig>,

    #[serde(default)]
    pub schedule: BTreeMap<String, ScheduleConfig>,

    #[serde(default)]
    pub sensor: BTreeMap<String, SensorConfig>,
}

/// `[coordinator]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorSection {
    /// `"immediate"` or `"queued"`.
    #[serde(default = "default_policy")]
    pub policy: EnvOr<String>,

    /// `-1` means unlimited.
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: EnvOr<i64>,

    #[serde(default = "default_dequeue_interval")]
    pub dequeue_interval_seconds: EnvOr<u64>,

    #[serde(default = "default_launch_timeout")]
    pub launch_timeout_seconds: EnvOr<u64>,

    #[serde(default = "default_termination_timeout")]
    pub termination_timeout_seconds: EnvOr<u64>,

    #[serde(default)]
    pub tag_concurrency_limits: Vec<TagLimitConfig>,

    /// Terminal runs kept in memory for inspection.
    #[serde(default = "default_retained_runs")]
    pub retained_runs: EnvOr<usize>,

    /// Run keys remembered for deduplication.
    #[serde(default = "default_retained_run_keys")]
    pub retained_run_keys: EnvOr<usize>,
}

fn default_policy() -> EnvOr<String> {
    EnvOr::Literal("queued".to_string())
}

fn default_max_concurrent_runs() -> EnvOr<i64> {
    EnvOr::Literal(10)
}

fn default_dequeue_interval() -> EnvOr<u64> {
    EnvOr::Literal(5)
}

fn default_launch_timeout() -> EnvOr<u64> {
    EnvOr::Literal(60)
}

fn default_termination_timeout() -> EnvOr<u64> {
    EnvOr::Literal(30)
}

fn default_retained_runs() -> EnvOr<usize> {
    EnvOr::Literal(1_000)
}

fn default_retained_run_keys() -> EnvOr<usize> {
    EnvOr::Literal(100_000)
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            policy: default_policy(),
            max_concurrent_runs: default_max_concurrent_runs(),
            dequeue_interval_seconds: default_dequeue_interval(),
            launch_timeout_seconds: default_launch_timeout(),
            termination_timeout_seconds: default_termination_timeout(),
            tag_concurrency_limits: Vec::new(),
            retained_runs: default_retained_runs(),
            retained_run_keys: default_retained_run_keys(),
        }
    }
}

/// One entry of `tag_concurrency_limits`.
///
/// ```toml
/// { key = "database", value = "redshift", limit = 1 }
/// { key = "team", limit = 4 }
/// { key = "tenant", value = { apply_limit_per_unique_value = true }, limit = 1 }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct TagLimitConfig {
    pub key: EnvOr<String>,
    #[serde(default)]
    pub value: Option<TagLimitValueConfig>,
    pub limit: EnvOr<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TagLimitValueConfig {
    PerUniqueValue { apply_limit_per_unique_value: bool },
    Value(EnvOr<String>),
}

/// `[retention]` section, one optional table per instigator kind.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RetentionSection {
    #[serde(default)]
    pub schedule: Option<RetentionKindConfig>,
    #[serde(default)]
    pub sensor: Option<RetentionKindConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionKindConfig {
    pub purge_after_days: PurgeAfterDaysConfig,
}

/// Either one number for every outcome or a per-outcome table.
/// Outcomes missing from the table keep their defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PurgeAfterDaysConfig {
    Uniform(i64),
    PerOutcome {
        #[serde(default)]
        skipped: Option<i64>,
        #[serde(default)]
        success: Option<i64>,
        #[serde(default)]
        failure: Option<i64>,
    },
}

/// `[sensor_evaluation]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorEvaluationSection {
    #[serde(default = "default_use_threads")]
    pub use_threads: EnvOr<bool>,
    #[serde(default = "default_num_workers")]
    pub num_workers: EnvOr<i64>,
}

fn default_use_threads() -> EnvOr<bool> {
    EnvOr::Literal(false)
}

fn default_num_workers() -> EnvOr<i64> {
    EnvOr::Literal(1)
}

impl Default for SensorEvaluationSection {
    fn default() -> Self {
        Self {
            use_threads: default_use_threads(),
            num_workers: default_num_workers(),
        }
    }
}

/// `[launcher]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LauncherSection {
    /// Shell command run once per launched run.
    #[serde(default)]
    pub cmd: Option<String>,
}

/// `[definitions]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DefinitionsSection {
    /// Name of the load unit these definitions form.
    #[serde(default)]
    pub load_unit: Option<String>,
}

/// Partition set of an asset.
///
/// ```toml
/// partitions = { static = ["eu", "us"] }
/// partitions = { daily = "2024-01-01" }
/// partitions = { hourly = "2024-01-01-00:00" }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionsConfig {
    Static(Vec<String>),
    Daily(String),
    Hourly(String),
}

/// `[source_asset.<key>]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SourceAssetConfig {
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub partitions: Option<PartitionsConfig>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// `[external_asset.<key>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalAssetConfig {
    pub load_unit: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub partitions: Option<PartitionsConfig>,
}

/// `[asset.<key>]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AssetConfig {
    #[serde(default)]
    pub key_prefix: Vec<String>,

    /// Input slot -> upstream key.
    #[serde(default)]
    pub ins: BTreeMap<String, String>,

    /// Upstream keys that do not bind to an input slot.
    #[serde(default)]
    pub deps: Vec<String>,

    #[serde(default)]
    pub group: Option<String>,

    /// Op name; defaults to the asset name.
    #[serde(default)]
    pub op: Option<String>,

    #[serde(default)]
    pub partitions: Option<PartitionsConfig>,

    /// Option name -> `"int" | "float" | "bool" | "string" | "any"`.
    #[serde(default)]
    pub config_schema: BTreeMap<String, String>,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    #[serde(default)]
    pub resources: Vec<String>,
}

/// One op of a graph-backed asset.
#[derive(Debug, Clone, Deserialize)]
pub struct StepConfig {
    pub name: String,
    /// Op name; defaults to the step name.
    #[serde(default)]
    pub op: Option<String>,
    #[serde(default)]
    pub after: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    pub step: String,
    pub key: String,
}

/// `[graph_asset.<name>]` section.
///
/// ```toml
/// [graph_asset.split]
/// steps = [{ name = "load" }, { name = "split", after = ["load"] }]
/// outputs = { left = { step = "split", key = "left" }, right = { step = "split", key = "right" } }
/// ins = { raw = "raw_users" }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct GraphAssetConfig {
    pub steps: Vec<StepConfig>,
    pub outputs: BTreeMap<String, OutputConfig>,
    #[serde(default)]
    pub ins: BTreeMap<String, String>,
    /// Output name -> the only upstream keys that output reads.
    #[serde(default)]
    pub internal_deps: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub key_prefix: Vec<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub partitions: Option<PartitionsConfig>,
}

/// `[job.<name>]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct JobConfig {
    /// Selection terms, unioned.
    pub selection: Vec<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// `[schedule.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Six or seven field cron expression (seconds first).
    pub cron: String,
    pub job: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKindConfig {
    Asset,
    MultiAsset,
    RunStatus,
    RunFailure,
    File,
}

/// `require` of a `multi_asset` sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequireConfig {
    #[default]
    All,
    Any,
}

/// `status` of a `run_status` sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatusConfig {
    Success,
    Failure,
    Canceled,
}

/// `[sensor.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    pub kind: SensorKindConfig,
    pub job: String,

    /// Watched asset key (`kind = "asset"`).
    #[serde(default)]
    pub asset: Option<String>,

    /// Watched asset keys (`kind = "multi_asset"`).
    #[serde(default)]
    pub assets: Vec<String>,
    #[serde(default)]
    pub require: RequireConfig,

    /// Terminal status to react to (`kind = "run_status"`).
    #[serde(default)]
    pub status: Option<RunStatusConfig>,
    /// Jobs whose runs are watched (`run_status` and `run_failure`); all
    /// jobs when empty.
    #[serde(default)]
    pub monitored_jobs: Vec<String>,

    /// Watched root directory (`kind = "file"`), relative to the config file.
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default)]
    pub minimum_interval_seconds: Option<u64>,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Validated schedule definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleDefinition {
    pub name: String,
    pub cron: String,
    pub job: String,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub enum SensorTarget {
    Asset(AssetKey),
    MultiAsset {
        assets: Vec<AssetKey>,
        trigger: MultiAssetTrigger,
    },
    RunStatus {
        status: RunStatus,
        monitored_jobs: Vec<String>,
    },
    Files {
        root: PathBuf,
        patterns: FilePatterns,
    },
}

/// Validated sensor definition.
#[derive(Debug, Clone)]
pub struct SensorDefinition {
    pub name: String,
    pub target: SensorTarget,
    pub job: String,
    pub minimum_interval: Duration,
    pub tags: BTreeMap<String, String>,
}

/// Fully validated configuration.
///
/// Construct it with `ConfigFile::try_from(raw)`; every field has already
/// been checked, including the asset graph.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub coordinator: CoordinatorSettings,
    pub retention: RetentionPolicy,
    pub sensor_evaluation: SensorEvaluationSettings,
    pub launcher_cmd: Option<String>,
    pub graph: AssetGraph,
    pub jobs: Vec<JobDefinition>,
    pub schedules: Vec<ScheduleDefinition>,
    pub sensors: Vec<SensorDefinition>,
}
