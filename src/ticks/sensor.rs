// src/ticks/sensor.rs

//! Condition-driven instigators.
//!
//! - [`AssetSensor`] fires when an asset gets a newer materialization.
//! - [`MultiAssetSensor`] does the same over several assets at once.
//! - [`RunStatusSensor`] fires for runs that ended with a given status.
//! - [`FileChangeSensor`] fires when the content of a set of files changes.
//! - [`FnSensor`] wraps a closure, for library users and tests.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result as AnyResult};
use chrono::{DateTime, TimeDelta, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;

use crate::coordinator::{RunRequest, RunStatus, SENSOR_NAME_TAG};
use crate::errors::MatdagError;
use crate::events::{EventLog, MaterializationEvent, RunStatusEvent};
use crate::fs::{aggregate_hash, FileSystem};
use crate::graph::{AssetGraph, AssetKey};
use crate::ticks::instigator::{
    EvaluationContext, Instigator, TickEvaluation, TickEvaluationError,
};
use crate::types::InstigatorKind;

/// Default spacing between two evaluations of one sensor.
pub const DEFAULT_MINIMUM_INTERVAL: Duration = Duration::from_secs(30);

/// Id of the run a run-status sensor reacted to.
pub const ORIGIN_RUN_ID_TAG: &str = "matdag/origin_run_id";
/// Terminal status of that run.
pub const ORIGIN_RUN_STATUS_TAG: &str = "matdag/origin_run_status";

fn after_interval(last: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let delta = TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX);
    last.checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn parse_timestamp_cursor(cursor: &str, value: &str) -> Result<DateTime<Utc>, TickEvaluationError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| TickEvaluationError::InvalidCursor {
            cursor: cursor.to_string(),
            reason: e.to_string(),
        })
}

fn sensor_request(name: &str, job: &str, tags: &BTreeMap<String, String>) -> RunRequest {
    let mut request = RunRequest::for_job(job).with_tag(SENSOR_NAME_TAG, name);
    for (k, v) in tags {
        request = request.with_tag(k, v);
    }
    request
}

/// Watches one asset in the event log.
///
/// The cursor is the RFC 3339 timestamp of the latest materialization already
/// acted on.
#[derive(Debug)]
pub struct AssetSensor {
    name: String,
    asset: AssetKey,
    job: String,
    log: Arc<dyn EventLog>,
    minimum_interval: Duration,
    tags: BTreeMap<String, String>,
}

impl AssetSensor {
    pub fn new(name: &str, asset: AssetKey, job: &str, log: Arc<dyn EventLog>) -> Self {
        Self {
            name: name.to_string(),
            asset,
            job: job.to_string(),
            log,
            minimum_interval: DEFAULT_MINIMUM_INTERVAL,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_minimum_interval(mut self, interval: Duration) -> Self {
        self.minimum_interval = interval;
        self
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn asset(&self) -> &AssetKey {
        &self.asset
    }
}

impl Instigator for AssetSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> InstigatorKind {
        InstigatorKind::Sensor
    }

    fn job(&self) -> Option<&str> {
        Some(&self.job)
    }

    fn next_evaluation_after(&self, last: DateTime<Utc>) -> DateTime<Utc> {
        after_interval(last, self.minimum_interval)
    }

    fn evaluate(&self, ctx: &EvaluationContext) -> Result<TickEvaluation, TickEvaluationError> {
        let seen = match &ctx.cursor {
            None => None,
            Some(cursor) => Some(parse_timestamp_cursor(cursor, cursor)?),
        };

        let latest = self
            .log
            .latest_any_partition(&self.asset)
            .map_err(|e| TickEvaluationError::failed(e.to_string()))?;

        let Some(event) = latest else {
            return Ok(TickEvaluation::skip(format!(
                "{} has never been materialized",
                self.asset
            )));
        };

        if seen.is_some_and(|seen| event.timestamp <= seen) {
            return Ok(TickEvaluation::skip(format!(
                "no new materialization of {}",
                self.asset
            )));
        }

        let cursor = event.timestamp.to_rfc3339();
        let mut request = sensor_request(&self.name, &self.job, &self.tags)
            .with_run_key(format!("sensor:{}:{}", self.name, cursor));
        if let Some(partition) = event.partition {
            request = request.with_partition(partition);
        }

        debug!(sensor = %self.name, asset = %self.asset, materialized_at = %cursor, "asset sensor requesting run");
        Ok(TickEvaluation::requests(vec![request]).with_cursor(cursor))
    }
}

/// When a [`MultiAssetSensor`] fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultiAssetTrigger {
    /// Every watched asset has a materialization newer than the cursor.
    #[default]
    All,
    /// At least one watched asset does.
    Any,
}

/// Watches several assets in the event log.
///
/// The cursor is a TOML table mapping each asset key to the RFC 3339
/// timestamp of the latest materialization already acted on. Keys missing
/// from the table have never been acted on.
#[derive(Debug)]
pub struct MultiAssetSensor {
    name: String,
    assets: BTreeSet<AssetKey>,
    trigger: MultiAssetTrigger,
    job: String,
    log: Arc<dyn EventLog>,
    minimum_interval: Duration,
    tags: BTreeMap<String, String>,
}

impl MultiAssetSensor {
    /// Fails when `assets` is empty or names a key the graph does not have.
    pub fn new<I>(
        name: &str,
        assets: I,
        job: &str,
        log: Arc<dyn EventLog>,
        graph: &AssetGraph,
    ) -> crate::errors::Result<Self>
    where
        I: IntoIterator<Item = AssetKey>,
    {
        let assets: BTreeSet<AssetKey> = assets.into_iter().collect();
        if assets.is_empty() {
            return Err(MatdagError::ConfigError(format!(
                "multi-asset sensor '{name}' watches no assets"
            )));
        }
        if let Some(missing) = assets.iter().find(|k| !graph.contains(k)) {
            return Err(MatdagError::ConfigError(format!(
                "multi-asset sensor '{name}': no asset with key '{missing}'"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            assets,
            trigger: MultiAssetTrigger::default(),
            job: job.to_string(),
            log,
            minimum_interval: DEFAULT_MINIMUM_INTERVAL,
            tags: BTreeMap::new(),
        })
    }

    pub fn with_trigger(mut self, trigger: MultiAssetTrigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_minimum_interval(mut self, interval: Duration) -> Self {
        self.minimum_interval = interval;
        self
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn assets(&self) -> impl Iterator<Item = &AssetKey> {
        self.assets.iter()
    }

    fn read_cursor(
        cursor: Option<&str>,
    ) -> Result<BTreeMap<String, DateTime<Utc>>, TickEvaluationError> {
        let Some(cursor) = cursor else {
            return Ok(BTreeMap::new());
        };
        let table: BTreeMap<String, String> =
            toml::from_str(cursor).map_err(|e| TickEvaluationError::InvalidCursor {
                cursor: cursor.to_string(),
                reason: e.to_string(),
            })?;
        table
            .into_iter()
            .map(|(k, v)| Ok((k, parse_timestamp_cursor(cursor, &v)?)))
            .collect()
    }

    fn write_cursor(
        seen: &BTreeMap<String, DateTime<Utc>>,
    ) -> Result<String, TickEvaluationError> {
        let table: BTreeMap<&str, String> = seen
            .iter()
            .map(|(k, t)| (k.as_str(), t.to_rfc3339()))
            .collect();
        toml::to_string(&table).map_err(|e| TickEvaluationError::failed(e.to_string()))
    }
}

impl Instigator for MultiAssetSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> InstigatorKind {
        InstigatorKind::Sensor
    }

    fn job(&self) -> Option<&str> {
        Some(&self.job)
    }

    fn next_evaluation_after(&self, last: DateTime<Utc>) -> DateTime<Utc> {
        after_interval(last, self.minimum_interval)
    }

    fn evaluate(&self, ctx: &EvaluationContext) -> Result<TickEvaluation, TickEvaluationError> {
        let mut seen = Self::read_cursor(ctx.cursor.as_deref())?;

        let mut fresh: Vec<MaterializationEvent> = Vec::new();
        let mut waiting: Vec<&AssetKey> = Vec::new();
        for key in &self.assets {
            let latest = self
                .log
                .latest_any_partition(key)
                .map_err(|e| TickEvaluationError::failed(e.to_string()))?;
            match latest {
                Some(event)
                    if seen
                        .get(&key.to_string())
                        .is_none_or(|acted| event.timestamp > *acted) =>
                {
                    fresh.push(event)
                }
                _ => waiting.push(key),
            }
        }

        let fire = match self.trigger {
            MultiAssetTrigger::All => waiting.is_empty(),
            MultiAssetTrigger::Any => !fresh.is_empty(),
        };
        if !fire {
            let names: Vec<String> = waiting.iter().map(|k| k.to_string()).collect();
            return Ok(TickEvaluation::skip(match self.trigger {
                MultiAssetTrigger::All => format!("waiting on new materializations of {}", names.join(", ")),
                MultiAssetTrigger::Any => "no new materialization of any watched asset".to_string(),
            }));
        }

        for event in &fresh {
            seen.insert(event.key.to_string(), event.timestamp);
        }
        let cursor = Self::write_cursor(&seen)?;
        let digest = blake3::hash(cursor.as_bytes()).to_hex();
        let mut request = sensor_request(&self.name, &self.job, &self.tags)
            .with_run_key(format!("sensor:{}:{}", self.name, &digest.as_str()[..16]));

        let mut partitions = fresh.iter().map(|e| e.partition.as_deref());
        if let Some(Some(first)) = partitions.next() {
            if partitions.all(|p| p == Some(first)) {
                request = request.with_partition(first);
            }
        }

        debug!(sensor = %self.name, assets = fresh.len(), "multi-asset sensor requesting run");
        Ok(TickEvaluation::requests(vec![request]).with_cursor(cursor))
    }
}

/// Reacts to runs that reached a terminal status.
///
/// Reads the run status feed of the event log. The cursor is the sequence
/// number of the last status event examined. Without a cursor only runs that
/// ended at or after the sensor was registered count. One run is requested
/// per matching run, keyed by the id of the run that triggered it.
#[derive(Debug)]
pub struct RunStatusSensor {
    name: String,
    status: RunStatus,
    monitored_jobs: BTreeSet<String>,
    job: String,
    log: Arc<dyn EventLog>,
    minimum_interval: Duration,
    tags: BTreeMap<String, String>,
}

impl RunStatusSensor {
    /// `status` must be terminal.
    pub fn new(
        name: &str,
        status: RunStatus,
        job: &str,
        log: Arc<dyn EventLog>,
    ) -> crate::errors::Result<Self> {
        if !status.is_terminal() {
            return Err(MatdagError::ConfigError(format!(
                "run status sensor '{name}' cannot watch non-terminal status {status}"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            status,
            monitored_jobs: BTreeSet::new(),
            job: job.to_string(),
            log,
            minimum_interval: DEFAULT_MINIMUM_INTERVAL,
            tags: BTreeMap::new(),
        })
    }

    /// Sensor for failed runs.
    pub fn failure(name: &str, job: &str, log: Arc<dyn EventLog>) -> Self {
        Self {
            name: name.to_string(),
            status: RunStatus::Failure,
            monitored_jobs: BTreeSet::new(),
            job: job.to_string(),
            log,
            minimum_interval: DEFAULT_MINIMUM_INTERVAL,
            tags: BTreeMap::new(),
        }
    }

    /// Only react to runs of `job`. Without any monitored job every run counts.
    pub fn monitoring(mut self, job: &str) -> Self {
        self.monitored_jobs.insert(job.to_string());
        self
    }

    pub fn with_minimum_interval(mut self, interval: Duration) -> Self {
        self.minimum_interval = interval;
        self
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    fn matches(&self, event: &RunStatusEvent) -> bool {
        event.status == self.status
            && (self.monitored_jobs.is_empty()
                || event
                    .job
                    .as_ref()
                    .is_some_and(|job| self.monitored_jobs.contains(job)))
    }
}

impl Instigator for RunStatusSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> InstigatorKind {
        InstigatorKind::Sensor
    }

    fn job(&self) -> Option<&str> {
        Some(&self.job)
    }

    fn next_evaluation_after(&self, last: DateTime<Utc>) -> DateTime<Utc> {
        after_interval(last, self.minimum_interval)
    }

    fn evaluate(&self, ctx: &EvaluationContext) -> Result<TickEvaluation, TickEvaluationError> {
        let after = match ctx.cursor.as_deref() {
            None => 0,
            Some(cursor) => cursor.parse::<u64>().map_err(|e| TickEvaluationError::InvalidCursor {
                cursor: cursor.to_string(),
                reason: e.to_string(),
            })?,
        };

        let events = self
            .log
            .run_status_events_after(after)
            .map_err(|e| TickEvaluationError::failed(e.to_string()))?;
        let Some(last_seq) = events.last().map(|e| e.seq) else {
            return Ok(TickEvaluation::skip("no new run status events"));
        };

        let requests: Vec<RunRequest> = events
            .iter()
            .filter(|e| ctx.cursor.is_some() || e.timestamp >= ctx.registered_at)
            .filter(|e| self.matches(e))
            .map(|e| {
                sensor_request(&self.name, &self.job, &self.tags)
                    .with_tag(ORIGIN_RUN_ID_TAG, &e.run_id.to_string())
                    .with_tag(ORIGIN_RUN_STATUS_TAG, &e.status.to_string())
                    .with_run_key(format!("run_status:{}:{}", self.name, e.run_id))
            })
            .collect();

        let cursor = last_seq.to_string();
        if requests.is_empty() {
            return Ok(TickEvaluation::skip(format!(
                "no new {} runs",
                self.status.to_string().to_lowercase()
            ))
            .with_cursor(cursor));
        }

        debug!(sensor = %self.name, status = %self.status, runs = requests.len(), "run status sensor requesting runs");
        Ok(TickEvaluation::requests(requests).with_cursor(cursor))
    }
}

/// Compiled include/exclude globs, matched against paths relative to a root.
#[derive(Clone)]
pub struct FilePatterns {
    include: GlobSet,
    exclude: Option<GlobSet>,
}

impl fmt::Debug for FilePatterns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilePatterns").finish_non_exhaustive()
    }
}

impl FilePatterns {
    pub fn new(include: &[String], exclude: &[String]) -> AnyResult<Self> {
        let include_set = build_globset(include).context("building include globset")?;
        let exclude_set = if exclude.is_empty() {
            None
        } else {
            Some(build_globset(exclude).context("building exclude globset")?)
        };
        Ok(Self {
            include: include_set,
            exclude: exclude_set,
        })
    }

    /// `rel_path` uses `/` separators, e.g. `"data/users.csv"`.
    pub fn matches(&self, rel_path: &str) -> bool {
        if !self.include.is_match(rel_path) {
            return false;
        }
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(rel_path) {
                return false;
            }
        }
        true
    }
}

fn build_globset(patterns: &[String]) -> AnyResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).with_context(|| format!("invalid glob pattern: {pat}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

/// All files under `root` matching `patterns`.
pub fn collect_matching_files(
    fs: &dyn FileSystem,
    root: &Path,
    patterns: &FilePatterns,
) -> AnyResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        for path in fs.read_dir(&dir)? {
            if fs.is_dir(&path) {
                stack.push(path);
            } else if fs.is_file(&path) {
                if let Ok(rel) = path.strip_prefix(root) {
                    let rel_str = rel.to_string_lossy().replace('\\', "/");
                    if patterns.matches(&rel_str) {
                        files.push(path);
                    }
                }
            }
        }
    }

    Ok(files)
}

/// Watches files under a root directory by content hash.
///
/// The cursor is the aggregate blake3 hash of every matching file. The first
/// evaluation only records a baseline.
#[derive(Debug)]
pub struct FileChangeSensor {
    name: String,
    root: PathBuf,
    patterns: FilePatterns,
    fs: Arc<dyn FileSystem>,
    job: String,
    minimum_interval: Duration,
    tags: BTreeMap<String, String>,
}

impl FileChangeSensor {
    pub fn new(
        name: &str,
        root: PathBuf,
        patterns: FilePatterns,
        fs: Arc<dyn FileSystem>,
        job: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            root,
            patterns,
            fs,
            job: job.to_string(),
            minimum_interval: DEFAULT_MINIMUM_INTERVAL,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_minimum_interval(mut self, interval: Duration) -> Self {
        self.minimum_interval = interval;
        self
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }
}

impl Instigator for FileChangeSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> InstigatorKind {
        InstigatorKind::Sensor
    }

    fn job(&self) -> Option<&str> {
        Some(&self.job)
    }

    fn next_evaluation_after(&self, last: DateTime<Utc>) -> DateTime<Utc> {
        after_interval(last, self.minimum_interval)
    }

    fn evaluate(&self, ctx: &EvaluationContext) -> Result<TickEvaluation, TickEvaluationError> {
        let fs = self.fs.as_ref();
        let files = collect_matching_files(fs, &self.root, &self.patterns)
            .and_then(|files| aggregate_hash(fs, &self.root, &files).map(|h| (files.len(), h)));
        let (count, hash) = files.map_err(|e| TickEvaluationError::failed(format!("{e:#}")))?;

        match ctx.cursor.as_deref() {
            None => Ok(TickEvaluation::skip(format!("baseline recorded for {count} files"))
                .with_cursor(hash)),
            Some(prev) if prev == hash => Ok(TickEvaluation::skip("no file changes")),
            Some(_) => {
                debug!(sensor = %self.name, files = count, hash = %hash, "file change detected");
                let request = sensor_request(&self.name, &self.job, &self.tags);
                Ok(TickEvaluation::requests(vec![request]).with_cursor(hash))
            }
        }
    }
}

type SensorFn =
    dyn Fn(&EvaluationContext) -> Result<TickEvaluation, TickEvaluationError> + Send + Sync;

/// Sensor backed by a closure.
pub struct FnSensor {
    name: String,
    minimum_interval: Duration,
    f: Box<SensorFn>,
}

impl fmt::Debug for FnSensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSensor")
            .field("name", &self.name)
            .field("minimum_interval", &self.minimum_interval)
            .finish_non_exhaustive()
    }
}

impl FnSensor {
    pub fn new<F>(name: &str, minimum_interval: Duration, f: F) -> Self
    where
        F: Fn(&EvaluationContext) -> Result<TickEvaluation, TickEvaluationError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.to_string(),
            minimum_interval,
            f: Box::new(f),
        }
    }
}

impl Instigator for FnSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> InstigatorKind {
        InstigatorKind::Sensor
    }

    fn next_evaluation_after(&self, last: DateTime<Utc>) -> DateTime<Utc> {
        after_interval(last, self.minimum_interval)
    }

    fn evaluate(&self, ctx: &EvaluationContext) -> Result<TickEvaluation, TickEvaluationError> {
        (self.f)(ctx)
    }
}
