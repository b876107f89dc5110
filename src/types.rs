// src/types.rs

//! Small shared enums used by both configuration and runtime code.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// How the coordinator admits runs.
///
/// - `Immediate`: every request is launched straight away, no concurrency
///   accounting.
/// - `Queued`: requests wait in a FIFO queue and are admitted under the
///   global and per-tag concurrency limits (default).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorPolicy {
    Immediate,
    #[default]
    Queued,
}

impl FromStr for CoordinatorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "immediate" => Ok(CoordinatorPolicy::Immediate),
            "queued" => Ok(CoordinatorPolicy::Queued),
            other => Err(format!(
                "invalid coordinator policy: {other} (expected \"immediate\" or \"queued\")"
            )),
        }
    }
}

/// The two kinds of tick-producing instigators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstigatorKind {
    Schedule,
    Sensor,
}

impl fmt::Display for InstigatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstigatorKind::Schedule => write!(f, "schedule"),
            InstigatorKind::Sensor => write!(f, "sensor"),
        }
    }
}
