// src/ticks/schedule.rs

//! Cron-driven schedules.
//!
//! The cursor holds the last execution time a run was requested for, in
//! RFC 3339. Each evaluation requests one run for the latest execution time
//! in `(cursor, now]`; missed earlier times are not backfilled. Without a
//! cursor the window starts at the time the schedule was registered.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tracing::debug;

use crate::coordinator::{RunRequest, SCHEDULED_EXECUTION_TIME_TAG, SCHEDULE_NAME_TAG};
use crate::errors::{MatdagError, Result};
use crate::graph::PartitionsDefinition;
use crate::ticks::instigator::{
    EvaluationContext, Instigator, TickEvaluation, TickEvaluationError,
};
use crate::types::InstigatorKind;

pub struct CronSchedule {
    name: String,
    expression: String,
    schedule: Schedule,
    job: String,
    tags: BTreeMap<String, String>,
    /// When set, each run targets the last partition completed at the
    /// scheduled time.
    partitions: Option<PartitionsDefinition>,
}

impl std::fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronSchedule")
            .field("name", &self.name)
            .field("cron", &self.expression)
            .field("job", &self.job)
            .finish_non_exhaustive()
    }
}

impl CronSchedule {
    /// `expression` uses the `cron` crate syntax (seconds field first).
    pub fn new(name: &str, expression: &str, job: &str) -> Result<Self> {
        let schedule = Schedule::from_str(expression).map_err(|e| {
            MatdagError::ConfigError(format!(
                "schedule '{name}': invalid cron expression '{expression}': {e}"
            ))
        })?;
        Ok(Self {
            name: name.to_string(),
            expression: expression.to_string(),
            schedule,
            job: job.to_string(),
            tags: BTreeMap::new(),
            partitions: None,
        })
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_partitions(mut self, partitions: PartitionsDefinition) -> Self {
        self.partitions = Some(partitions);
        self
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn window_start(
        &self,
        ctx: &EvaluationContext,
    ) -> std::result::Result<DateTime<Utc>, TickEvaluationError> {
        match &ctx.cursor {
            None => Ok(ctx.registered_at),
            Some(cursor) => DateTime::parse_from_rfc3339(cursor)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| TickEvaluationError::InvalidCursor {
                    cursor: cursor.clone(),
                    reason: e.to_string(),
                }),
        }
    }
}

impl Instigator for CronSchedule {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> InstigatorKind {
        InstigatorKind::Schedule
    }

    fn job(&self) -> Option<&str> {
        Some(&self.job)
    }

    fn first_evaluation_at(&self, registered_at: DateTime<Utc>) -> DateTime<Utc> {
        self.next_evaluation_after(registered_at)
    }

    fn next_evaluation_after(&self, last: DateTime<Utc>) -> DateTime<Utc> {
        self.schedule
            .after(&last)
            .next()
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn evaluate(
        &self,
        ctx: &EvaluationContext,
    ) -> std::result::Result<TickEvaluation, TickEvaluationError> {
        let start = self.window_start(ctx)?;
        let Some(scheduled) = self
            .schedule
            .after(&start)
            .take_while(|t| *t <= ctx.now)
            .last()
        else {
            return Ok(TickEvaluation::skip(format!(
                "no execution time due since {}",
                start.to_rfc3339()
            )));
        };

        let mut request = RunRequest::for_job(&self.job)
            .with_run_key(format!("sched:{}:{}", self.name, scheduled.timestamp()))
            .with_tag(SCHEDULE_NAME_TAG, &self.name)
            .with_tag(SCHEDULED_EXECUTION_TIME_TAG, &scheduled.to_rfc3339());
        for (k, v) in &self.tags {
            request = request.with_tag(k, v);
        }

        if let Some(partitions) = &self.partitions {
            match partitions.partition_keys(scheduled).pop() {
                Some(partition) => request = request.with_partition(partition),
                None => {
                    return Ok(TickEvaluation::skip(format!(
                        "no partition completed by {}",
                        scheduled.to_rfc3339()
                    ))
                    .with_cursor(scheduled.to_rfc3339()));
                }
            }
        }

        debug!(schedule = %self.name, scheduled = %scheduled, "schedule requesting run");
        Ok(TickEvaluation::requests(vec![request]).with_cursor(scheduled.to_rfc3339()))
    }
}
