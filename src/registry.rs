// src/registry.rs

//! Everything loaded for one load unit.
//!
//! The registry is built once at load time and handed to the coordinator,
//! the tick scheduler and the daemon behind an `Arc`. Reloading definitions
//! means building a new registry.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::{ConfigFile, SensorTarget};
use crate::coordinator::RunTarget;
use crate::errors::{MatdagError, Result};
use crate::events::EventLog;
use crate::fs::FileSystem;
use crate::graph::{AssetGraph, AssetKey, AssetSelection, PartitionsDefinition};
use crate::ticks::{
    AssetSensor, CronSchedule, FileChangeSensor, Instigator, MultiAssetSensor, RunStatusSensor,
};

/// A named asset selection plus the tags every run of it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefinition {
    pub name: String,
    pub selection: AssetSelection,
    pub tags: BTreeMap<String, String>,
}

impl JobDefinition {
    pub fn new(name: &str, selection: AssetSelection) -> Self {
        Self {
            name: name.to_string(),
            selection,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }
}

/// A run target resolved against the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub job: Option<String>,
    pub asset_keys: BTreeSet<AssetKey>,
    /// Job tags; request tags are layered on top by the coordinator.
    pub tags: BTreeMap<String, String>,
}

pub struct Registry {
    graph: Arc<AssetGraph>,
    jobs: BTreeMap<String, JobDefinition>,
    instigators: Vec<Arc<dyn Instigator>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("load_unit", &self.graph.load_unit())
            .field("assets", &self.graph.len())
            .field("jobs", &self.jobs.keys().collect::<Vec<_>>())
            .field(
                "instigators",
                &self.instigators.iter().map(|i| i.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Registry {
    pub fn new(graph: AssetGraph) -> Self {
        Self {
            graph: Arc::new(graph),
            jobs: BTreeMap::new(),
            instigators: Vec::new(),
        }
    }

    /// Add a job. Its selection must resolve to at least one asset.
    pub fn with_job(mut self, job: JobDefinition) -> Result<Self> {
        if self.jobs.contains_key(&job.name) {
            return Err(MatdagError::ConfigError(format!(
                "job '{}' is defined more than once",
                job.name
            )));
        }
        let keys = job.selection.resolve(&self.graph)?;
        if keys.is_empty() {
            return Err(MatdagError::ConfigError(format!(
                "job '{}' selects no materializable assets",
                job.name
            )));
        }
        debug!(job = %job.name, assets = keys.len(), "job registered");
        self.jobs.insert(job.name.clone(), job);
        Ok(self)
    }

    /// Add a schedule or sensor. Names must be unique across both kinds.
    pub fn with_instigator(mut self, instigator: Arc<dyn Instigator>) -> Result<Self> {
        if self
            .instigators
            .iter()
            .any(|i| i.name() == instigator.name())
        {
            return Err(MatdagError::ConfigError(format!(
                "instigator '{}' is defined more than once",
                instigator.name()
            )));
        }
        self.instigators.push(instigator);
        Ok(self)
    }

    /// Build the registry described by a validated config.
    ///
    /// Asset sensors read from `event_log`; file sensors hash through `fs`.
    /// A schedule whose job targets assets sharing one time-window partition
    /// set requests the last completed window on every tick.
    pub fn from_config(
        config: &ConfigFile,
        event_log: Arc<dyn EventLog>,
        fs: Arc<dyn FileSystem>,
    ) -> Result<Self> {
        let mut registry = Registry::new(config.graph.clone());
        for job in &config.jobs {
            registry = registry.with_job(job.clone())?;
        }

        for def in &config.schedules {
            let mut schedule = CronSchedule::new(&def.name, &def.cron, &def.job)?;
            for (k, v) in &def.tags {
                schedule = schedule.with_tag(k, v);
            }
            if let Some(partitions @ PartitionsDefinition::TimeWindow(_)) =
                registry.shared_partitions(&def.job)?
            {
                schedule = schedule.with_partitions(partitions);
            }
            registry = registry.with_instigator(Arc::new(schedule))?;
        }

        for def in &config.sensors {
            let instigator: Arc<dyn Instigator> = match &def.target {
                SensorTarget::Asset(key) => {
                    let mut sensor =
                        AssetSensor::new(&def.name, key.clone(), &def.job, Arc::clone(&event_log))
                            .with_minimum_interval(def.minimum_interval);
                    for (k, v) in &def.tags {
                        sensor = sensor.with_tag(k, v);
                    }
                    Arc::new(sensor)
                }
                SensorTarget::MultiAsset { assets, trigger } => {
                    let mut sensor = MultiAssetSensor::new(
                        &def.name,
                        assets.iter().cloned(),
                        &def.job,
                        Arc::clone(&event_log),
                        &config.graph,
                    )?
                    .with_trigger(*trigger)
                    .with_minimum_interval(def.minimum_interval);
                    for (k, v) in &def.tags {
                        sensor = sensor.with_tag(k, v);
                    }
                    Arc::new(sensor)
                }
                SensorTarget::RunStatus {
                    status,
                    monitored_jobs,
                } => {
                    let mut sensor =
                        RunStatusSensor::new(&def.name, *status, &def.job, Arc::clone(&event_log))?
                            .with_minimum_interval(def.minimum_interval);
                    for job in monitored_jobs {
                        sensor = sensor.monitoring(job);
                    }
                    for (k, v) in &def.tags {
                        sensor = sensor.with_tag(k, v);
                    }
                    Arc::new(sensor)
                }
                SensorTarget::Files { root, patterns } => {
                    let mut sensor = FileChangeSensor::new(
                        &def.name,
                        root.clone(),
                        patterns.clone(),
                        Arc::clone(&fs),
                        &def.job,
                    )
                    .with_minimum_interval(def.minimum_interval);
                    for (k, v) in &def.tags {
                        sensor = sensor.with_tag(k, v);
                    }
                    Arc::new(sensor)
                }
            };
            registry = registry.with_instigator(instigator)?;
        }

        Ok(registry)
    }

    /// The partition set every asset of `job` shares, if there is one.
    fn shared_partitions(&self, job: &str) -> Result<Option<PartitionsDefinition>> {
        let resolved = self.resolve_target(&RunTarget::Job(job.to_string()))?;
        let mut shared: Option<&PartitionsDefinition> = None;
        for key in &resolved.asset_keys {
            let Some(partitions) = self.graph.node(key).and_then(|n| n.partitions.as_ref()) else {
                return Ok(None);
            };
            match shared {
                None => shared = Some(partitions),
                Some(existing) if existing == partitions => {}
                Some(_) => return Ok(None),
            }
        }
        Ok(shared.cloned())
    }

    pub fn graph(&self) -> &Arc<AssetGraph> {
        &self.graph
    }

    pub fn job(&self, name: &str) -> Option<&JobDefinition> {
        self.jobs.get(name)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &JobDefinition> {
        self.jobs.values()
    }

    pub fn instigators(&self) -> &[Arc<dyn Instigator>] {
        &self.instigators
    }

    pub fn resolve_target(&self, target: &RunTarget) -> Result<ResolvedTarget> {
        match target {
            RunTarget::Job(name) => {
                let job = self
                    .jobs
                    .get(name)
                    .ok_or_else(|| MatdagError::UnknownJob(name.clone()))?;
                Ok(ResolvedTarget {
                    job: Some(name.clone()),
                    asset_keys: job.selection.resolve(&self.graph)?,
                    tags: job.tags.clone(),
                })
            }
            RunTarget::Selection(selection) => Ok(ResolvedTarget {
                job: None,
                asset_keys: selection.resolve(&self.graph)?,
                tags: BTreeMap::new(),
            }),
        }
    }
}
