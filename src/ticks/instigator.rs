// src/ticks/instigator.rs

//! The instigator boundary: anything that is periodically evaluated into run
//! requests (cron schedules, sensors).

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::coordinator::RunRequest;
use crate::types::InstigatorKind;

/// Input to one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationContext {
    pub instigator: String,
    /// Cursor left by the last successful evaluation.
    pub cursor: Option<String>,
    pub now: DateTime<Utc>,
    /// When the instigator was registered with the scheduler.
    pub registered_at: DateTime<Utc>,
    pub last_evaluation: Option<DateTime<Utc>>,
}

/// Output of a successful evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TickEvaluation {
    pub run_requests: Vec<RunRequest>,
    /// New cursor; `None` keeps the previous one.
    pub cursor: Option<String>,
    pub skip_reason: Option<String>,
}

impl TickEvaluation {
    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            run_requests: Vec::new(),
            cursor: None,
            skip_reason: Some(reason.into()),
        }
    }

    pub fn requests(run_requests: Vec<RunRequest>) -> Self {
        Self {
            run_requests,
            cursor: None,
            skip_reason: None,
        }
    }

    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }
}

/// Failure raised by an evaluation. Always recovered by the scheduler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TickEvaluationError {
    #[error("evaluation failed: {0}")]
    Failed(String),

    #[error("evaluation panicked: {0}")]
    Panicked(String),

    #[error("invalid cursor '{cursor}': {reason}")]
    InvalidCursor { cursor: String, reason: String },
}

impl TickEvaluationError {
    pub fn failed(msg: impl Into<String>) -> Self {
        TickEvaluationError::Failed(msg.into())
    }
}

/// A schedule or sensor.
///
/// `evaluate` is synchronous and may block (it runs on a worker thread); it
/// must not rely on being called at any particular time, only on the context.
pub trait Instigator: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> InstigatorKind;

    /// Job this instigator targets, if it targets one.
    fn job(&self) -> Option<&str> {
        None
    }

    /// When the first evaluation is due. Sensors are due immediately.
    fn first_evaluation_at(&self, registered_at: DateTime<Utc>) -> DateTime<Utc> {
        registered_at
    }

    /// When the next evaluation is due, given the last one ran at `last`.
    fn next_evaluation_after(&self, last: DateTime<Utc>) -> DateTime<Utc>;

    fn evaluate(&self, ctx: &EvaluationContext) -> Result<TickEvaluation, TickEvaluationError>;
}
