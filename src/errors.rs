// src/errors.rs

//! Crate-wide error types.
//!
//! - [`ValidationError`] is raised while compiling declarations into an
//!   [`AssetGraph`](crate::graph::AssetGraph); the load unit is refused.
//! - [`MatdagError`] wraps everything else the library can fail with.
//!
//! Launcher and evaluation failures have their own types
//! ([`DispatchError`](crate::dispatch::DispatchError),
//! [`TickEvaluationError`](crate::ticks::TickEvaluationError)) because they are
//! recovered locally and never abort the daemon.

use thiserror::Error;

use crate::coordinator::RunId;
use crate::graph::AssetKey;

/// Load-time graph validation failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("cycle detected in asset graph: {}", format_path(.path))]
    Cycle { path: Vec<AssetKey> },

    #[error("asset '{key}' is assigned to more than one group ('{first}' and '{second}')")]
    GroupConflict {
        key: AssetKey,
        first: String,
        second: String,
    },

    #[error("asset '{asset}' depends on '{upstream}', which is not declared and not marked external")]
    UnresolvedReference { asset: AssetKey, upstream: AssetKey },

    #[error("asset '{key}' is declared more than once with different definitions")]
    DuplicateKey { key: AssetKey },

    #[error("asset '{key}' has invalid group name '{group}' (allowed: letters, digits, '_')")]
    InvalidGroupName { key: AssetKey, group: String },

    #[error("asset key must have at least one non-empty segment")]
    EmptyKey,

    #[error("graph-backed asset '{name}' is invalid: {reason}")]
    InvalidComposite { name: String, reason: String },
}

fn format_path(path: &[AssetKey]) -> String {
    path.iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[derive(Error, Debug)]
pub enum MatdagError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Unknown asset: {0}")]
    UnknownAsset(AssetKey),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Invalid partition '{partition}' for asset '{key}': {reason}")]
    InvalidPartition {
        key: AssetKey,
        partition: String,
        reason: String,
    },

    #[error("Invalid asset selection '{0}'")]
    InvalidSelection(String),

    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    #[error("Event log error: {0}")]
    EventLog(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, MatdagError>;
