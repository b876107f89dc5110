// src/ticks/tick.rs

use std::fmt;

use chrono::{DateTime, Utc};

use crate::coordinator::RunId;
use crate::types::InstigatorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickStatus {
    /// Evaluated, nothing requested.
    Skipped,
    /// Evaluated and requested one or more runs.
    Success,
    /// Evaluation raised; the cursor was not advanced.
    Failure,
}

impl fmt::Display for TickStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickStatus::Skipped => write!(f, "SKIPPED"),
            TickStatus::Success => write!(f, "SUCCESS"),
            TickStatus::Failure => write!(f, "FAILURE"),
        }
    }
}

/// Record of one schedule or sensor evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    pub id: u64,
    pub instigator: String,
    pub kind: InstigatorKind,
    pub timestamp: DateTime<Utc>,
    pub status: TickStatus,
    /// Number of run requests the evaluation produced.
    pub requested: usize,
    /// Runs actually created from those requests (duplicates and rejected
    /// requests create none).
    pub run_ids: Vec<RunId>,
    /// Cursor after this tick; equal to the previous cursor on failure.
    pub cursor: Option<String>,
    pub skip_reason: Option<String>,
    pub error: Option<String>,
}
