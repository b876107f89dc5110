// src/lib.rs

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod daemon;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod fs;
pub mod graph;
pub mod logging;
pub mod registry;
pub mod staleness;
pub mod ticks;
pub mod types;

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::load_and_validate;
use crate::config::model::ConfigFile;
use crate::coordinator::{RunRequest, RunStatus};
use crate::daemon::{CoreDaemon, DaemonEvent, DaemonOptions, Runtime};
use crate::dispatch::process::ProcessDispatcher;
use crate::events::{EventLog, InMemoryEventLog};
use crate::fs::{FileSystem, RealFileSystem};
use crate::graph::AssetSelection;
use crate::registry::Registry;
use crate::ticks::EvaluationPool;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and the registry
/// - the core daemon and its runtime shell
/// - the process dispatcher
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = args.config_path();
    let cfg = load_and_validate(&config_path)?;

    let event_log: Arc<dyn EventLog> = Arc::new(InMemoryEventLog::default());
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let registry = Arc::new(Registry::from_config(&cfg, Arc::clone(&event_log), fs)?);

    let initial = args
        .launch
        .iter()
        .map(|term| AssetSelection::parse(term).map(RunRequest::for_selection))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if args.dry_run {
        print_dry_run(&cfg, &registry);
        return Ok(());
    }

    let cmd = cfg.launcher_cmd.as_deref().ok_or_else(|| {
        anyhow!(
            "{} has no [launcher].cmd; nothing can run assets",
            config_path.display()
        )
    })?;

    let (tx, rx) = mpsc::channel::<DaemonEvent>(256);
    let dispatcher = ProcessDispatcher::new(cmd, tx.clone());

    // Ctrl-C → graceful shutdown.
    {
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            if tx.send(DaemonEvent::ShutdownRequested).await.is_err() {
                warn!("daemon already stopped; ignoring Ctrl+C");
            }
        });
    }

    info!(
        load_unit = %registry.graph().load_unit(),
        assets = registry.graph().len(),
        instigators = registry.instigators().len(),
        manual_runs = initial.len(),
        "definitions loaded"
    );

    let options = DaemonOptions { once: args.once };
    let core = CoreDaemon::new(
        registry,
        cfg.coordinator.clone(),
        cfg.retention,
        event_log,
        options,
        Utc::now(),
    );
    let pool = EvaluationPool::new(cfg.sensor_evaluation);

    let runtime = Runtime::new(core, tx, rx, dispatcher, pool);
    let core = runtime.run(initial).await?;

    let failed = core.coordinator().count_with_status(RunStatus::Failure);
    info!(
        succeeded = core.coordinator().count_with_status(RunStatus::Success),
        failed,
        canceled = core.coordinator().count_with_status(RunStatus::Canceled),
        "daemon stopped"
    );
    if args.once && failed > 0 {
        bail!("{failed} run(s) failed");
    }
    Ok(())
}

/// Dry-run output: graph, groups, jobs, instigators and coordinator settings.
fn print_dry_run(cfg: &ConfigFile, registry: &Registry) {
    let graph = registry.graph();
    println!("matdag dry-run");
    println!("  load_unit = {}", graph.load_unit());
    println!("  coordinator.policy = {:?}", cfg.coordinator.policy);
    match cfg.coordinator.limits.max_concurrent_runs {
        Some(max) => println!("  coordinator.max_concurrent_runs = {max}"),
        None => println!("  coordinator.max_concurrent_runs = unlimited"),
    }
    for limit in &cfg.coordinator.limits.tag_limits {
        println!("  coordinator.tag_limit: {limit}");
    }
    println!(
        "  sensor_evaluation.workers = {}",
        cfg.sensor_evaluation.effective_workers()
    );
    println!();

    println!("assets ({}), topological order:", graph.len());
    for key in graph.topological_order() {
        let Some(node) = graph.node(key) else {
            continue;
        };
        let kind = if node.materializable() {
            "asset"
        } else if node.load_unit != graph.load_unit() {
            "external"
        } else {
            "source"
        };
        println!("  - {key} ({kind}, group {})", node.group);
        if !node.upstream.is_empty() {
            let upstream: Vec<String> = node.upstream.iter().map(|k| k.to_string()).collect();
            println!("      upstream: {upstream:?}");
        }
        if let Some(partitions) = &node.partitions {
            println!("      partitions: {partitions:?}");
        }
    }
    println!();

    println!("groups:");
    for (group, keys) in graph.groups() {
        println!("  - {group}: {}", keys.len());
    }
    println!();

    println!("jobs:");
    for job in registry.jobs() {
        println!("  - {} = {}", job.name, job.selection);
    }
    println!();

    println!("instigators:");
    for instigator in registry.instigators() {
        println!(
            "  - {} ({}, job {})",
            instigator.name(),
            instigator.kind(),
            instigator.job().unwrap_or("-")
        );
    }

    debug!("dry-run complete (no daemon started)");
}
