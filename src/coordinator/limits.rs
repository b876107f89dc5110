// src/coordinator/limits.rs

//! Concurrency limits for the queued policy.
//!
//! A limit matches a run through the run's tags. Each matching limit places
//! the run in a *bucket*; the run may start only if, in every bucket it falls
//! into, fewer than `limit` runs are currently STARTED.

use std::collections::BTreeMap;
use std::fmt;

use crate::coordinator::run::Run;

/// Which tag values a limit applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagValue {
    /// Only runs whose tag equals this value.
    Exact(String),
    /// Every run carrying the key, counted together.
    Any,
    /// Every run carrying the key, counted separately per distinct value.
    PerUniqueValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagConcurrencyLimit {
    pub key: String,
    pub value: TagValue,
    pub limit: usize,
}

impl TagConcurrencyLimit {
    pub fn exact(key: &str, value: &str, limit: usize) -> Self {
        Self {
            key: key.to_string(),
            value: TagValue::Exact(value.to_string()),
            limit,
        }
    }

    pub fn any(key: &str, limit: usize) -> Self {
        Self {
            key: key.to_string(),
            value: TagValue::Any,
            limit,
        }
    }

    pub fn per_unique_value(key: &str, limit: usize) -> Self {
        Self {
            key: key.to_string(),
            value: TagValue::PerUniqueValue,
            limit,
        }
    }

    /// Bucket `tags` falls into under this limit, or `None` if it does not match.
    pub fn bucket<'a>(&self, tags: &'a BTreeMap<String, String>) -> Option<Option<&'a str>> {
        let value = tags.get(&self.key)?;
        match &self.value {
            TagValue::Exact(expected) if expected == value => Some(None),
            TagValue::Exact(_) => None,
            TagValue::Any => Some(None),
            TagValue::PerUniqueValue => Some(Some(value.as_str())),
        }
    }

    /// Whether `a` and `b` share a bucket under this limit.
    fn same_bucket(&self, a: &BTreeMap<String, String>, b: &BTreeMap<String, String>) -> bool {
        match (self.bucket(a), self.bucket(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }
}

impl fmt::Display for TagConcurrencyLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            TagValue::Exact(v) => write!(f, "{}={} (limit {})", self.key, v, self.limit),
            TagValue::Any => write!(f, "{}=* (limit {})", self.key, self.limit),
            TagValue::PerUniqueValue => {
                write!(f, "{}=<each value> (limit {})", self.key, self.limit)
            }
        }
    }
}

/// Global plus per-tag limits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConcurrencyLimits {
    /// `None` means unlimited.
    pub max_concurrent_runs: Option<usize>,
    pub tag_limits: Vec<TagConcurrencyLimit>,
}

impl ConcurrencyLimits {
    pub fn new(max_concurrent_runs: Option<usize>, tag_limits: Vec<TagConcurrencyLimit>) -> Self {
        Self {
            max_concurrent_runs,
            tag_limits,
        }
    }

    /// Check whether `candidate` may start next to the `started` runs.
    ///
    /// Returns the first saturated limit as a human-readable reason.
    pub fn check<'a>(
        &self,
        candidate: &Run,
        started: impl Iterator<Item = &'a Run> + Clone,
    ) -> Result<(), String> {
        if let Some(max) = self.max_concurrent_runs {
            let count = started.clone().count();
            if count >= max {
                return Err(format!("max_concurrent_runs ({max}) reached"));
            }
        }

        for limit in &self.tag_limits {
            if limit.bucket(&candidate.tags).is_none() {
                continue;
            }
            let count = started
                .clone()
                .filter(|r| limit.same_bucket(&candidate.tags, &r.tags))
                .count();
            if count >= limit.limit {
                return Err(format!("tag limit {limit} reached"));
            }
        }

        Ok(())
    }
}
