#![allow(dead_code)]

use std::collections::BTreeMap;

use matdag::config::model::{
    AssetConfig, JobConfig, RequireConfig, ScheduleConfig, SensorConfig, SensorKindConfig,
    SourceAssetConfig, TagLimitConfig, TagLimitValueConfig,
};
use matdag::config::{ConfigFile, EnvOr, RawConfigFile};
use matdag::coordinator::RunRequest;
use matdag::errors::Result;
use matdag::graph::{AssetGraph, AssetGraphBuilder, AssetSelection, AssetSpec, SourceAssetSpec};
use matdag::registry::{JobDefinition, Registry};

/// `raw_users (source) -> users -> user_recommender_model`.
pub fn scenario_a_graph() -> AssetGraph {
    AssetGraphBuilder::new()
        .with(SourceAssetSpec::new("raw_users"))
        .with(AssetSpec::new("users").input("raw", "raw_users"))
        .with(AssetSpec::new("user_recommender_model").input("users", "users"))
        .build()
        .expect("scenario A graph is valid")
}

/// Scenario A graph plus a `users_job` job selecting `users` and everything
/// downstream of it.
pub fn scenario_a_registry() -> Registry {
    Registry::new(scenario_a_graph())
        .with_job(JobDefinition::new(
            "users_job",
            AssetSelection::keys(["users"]).downstream(),
        ))
        .expect("users_job resolves")
}

/// Unconnected materializable assets, one per name, plus a job `all`.
pub fn flat_registry(names: &[&str]) -> Registry {
    let mut builder = AssetGraphBuilder::new();
    for name in names {
        builder.add(AssetSpec::new(*name));
    }
    let graph = builder.build().expect("flat graph is valid");
    Registry::new(graph)
        .with_job(JobDefinition::new("all", AssetSelection::All))
        .expect("job `all` resolves")
}

/// Request materializing a single key.
pub fn request_for(key: &str) -> RunRequest {
    RunRequest::for_selection(AssetSelection::keys([key]))
}

/// Builder for `RawConfigFile` / `ConfigFile` to simplify test setup.
#[derive(Clone)]
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn source_asset(mut self, key: &str) -> Self {
        self.config
            .source_asset
            .insert(key.to_string(), SourceAssetConfig::default());
        self
    }

    /// Asset whose input slots are named after the upstream keys.
    pub fn asset(self, key: &str, upstream: &[&str]) -> Self {
        let ins = upstream
            .iter()
            .map(|u| (u.replace('/', "_"), u.to_string()))
            .collect::<BTreeMap<_, _>>();
        self.asset_config(
            key,
            AssetConfig {
                ins,
                ..AssetConfig::default()
            },
        )
    }

    pub fn asset_config(mut self, key: &str, asset: AssetConfig) -> Self {
        self.config.asset.insert(key.to_string(), asset);
        self
    }

    pub fn job(mut self, name: &str, selection: &[&str]) -> Self {
        self.config.job.insert(
            name.to_string(),
            JobConfig {
                selection: selection.iter().map(|s| s.to_string()).collect(),
                tags: BTreeMap::new(),
            },
        );
        self
    }

    pub fn schedule(mut self, name: &str, cron: &str, job: &str) -> Self {
        self.config.schedule.insert(
            name.to_string(),
            ScheduleConfig {
                cron: cron.to_string(),
                job: job.to_string(),
                tags: BTreeMap::new(),
            },
        );
        self
    }

    pub fn asset_sensor(mut self, name: &str, asset: &str, job: &str) -> Self {
        self.config.sensor.insert(
            name.to_string(),
            SensorConfig {
                kind: SensorKindConfig::Asset,
                job: job.to_string(),
                asset: Some(asset.to_string()),
                assets: Vec::new(),
                require: RequireConfig::default(),
                status: None,
                monitored_jobs: Vec::new(),
                root: None,
                include: Vec::new(),
                exclude: Vec::new(),
                minimum_interval_seconds: None,
                tags: BTreeMap::new(),
            },
        );
        self
    }

    pub fn multi_asset_sensor(mut self, name: &str, assets: &[&str], job: &str) -> Self {
        self.config.sensor.insert(
            name.to_string(),
            SensorConfig {
                kind: SensorKindConfig::MultiAsset,
                job: job.to_string(),
                asset: None,
                assets: assets.iter().map(|a| a.to_string()).collect(),
                require: RequireConfig::default(),
                status: None,
                monitored_jobs: Vec::new(),
                root: None,
                include: Vec::new(),
                exclude: Vec::new(),
                minimum_interval_seconds: None,
                tags: BTreeMap::new(),
            },
        );
        self
    }

    pub fn policy(mut self, policy: &str) -> Self {
        self.config.coordinator.policy = EnvOr::Literal(policy.to_string());
        self
    }

    pub fn max_concurrent_runs(mut self, max: i64) -> Self {
        self.config.coordinator.max_concurrent_runs = EnvOr::Literal(max);
        self
    }

    pub fn tag_limit(mut self, key: &str, value: Option<&str>, limit: i64) -> Self {
        self.config.coordinator.tag_concurrency_limits.push(TagLimitConfig {
            key: EnvOr::Literal(key.to_string()),
            value: value.map(|v| TagLimitValueConfig::Value(EnvOr::Literal(v.to_string()))),
            limit: EnvOr::Literal(limit),
        });
        self
    }

    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}
