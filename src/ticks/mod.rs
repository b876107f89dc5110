// src/ticks/mod.rs

//! Schedules, sensors and the ticks they produce.
//!
//! - [`instigator`] is the trait every schedule and sensor implements.
//! - [`schedule`] holds cron schedules; [`sensor`] holds asset, run status,
//!   file and closure-backed sensors.
//! - [`scheduler`] tracks cursors, due times and tick history.
//! - [`pool`] runs evaluations on a bounded set of worker threads.
//! - [`tick`] and [`retention`] define tick records and their purge policy.

pub mod instigator;
pub mod pool;
pub mod retention;
pub mod schedule;
pub mod scheduler;
pub mod sensor;
pub mod tick;

pub use instigator::{EvaluationContext, Instigator, TickEvaluation, TickEvaluationError};
pub use pool::{evaluate_guarded, EvaluationPool, SensorEvaluationSettings, MAX_WORKERS};
pub use retention::{PurgeAfterDays, RetentionPolicy, MAX_PURGE_AFTER_DAYS};
pub use schedule::CronSchedule;
pub use scheduler::{CompletedTick, TickScheduler};
pub use sensor::{
    AssetSensor, FileChangeSensor, FilePatterns, FnSensor, MultiAssetSensor, MultiAssetTrigger,
    RunStatusSensor, DEFAULT_MINIMUM_INTERVAL, ORIGIN_RUN_ID_TAG, ORIGIN_RUN_STATUS_TAG,
};
pub use tick::{Tick, TickStatus};
