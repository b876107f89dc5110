// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::config::default_config_path;

/// Command-line arguments for `matdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "matdag",
    version,
    about = "Keep a graph of data assets materialized: schedules, sensors and a run queue.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `$MATDAG_CONFIG`, else `Matdag.toml` in the current working
    /// directory.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Evaluate every schedule and sensor once, wait for all runs, then exit.
    #[arg(long)]
    pub once: bool,

    /// Submit a run for this selection at startup (repeatable).
    ///
    /// Accepts `*`, `group:<name>`, `a/b`, `*a/b` (with upstream) and
    /// `a/b*` (with downstream).
    #[arg(long, value_name = "SELECTION")]
    pub launch: Vec<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `MATDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the asset graph, but don't start the daemon.
    #[arg(long)]
    pub dry_run: bool,
}

impl CliArgs {
    pub fn config_path(&self) -> std::path::PathBuf {
        self.config
            .as_ref()
            .map(std::path::PathBuf::from)
            .unwrap_or_else(default_config_path)
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
