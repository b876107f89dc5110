// src/events/memory.rs

//! In-memory [`EventLog`] used by the daemon when no external store is wired
//! in, and by tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::errors::{MatdagError, Result};
use crate::events::{EventLog, MaterializationEvent, RunStatusEvent};
use crate::graph::AssetKey;

/// Run status events kept before the oldest are dropped.
pub const DEFAULT_RUN_STATUS_CAPACITY: usize = 10_000;

#[derive(Debug)]
pub struct InMemoryEventLog {
    events: RwLock<HashMap<AssetKey, Vec<MaterializationEvent>>>,
    run_statuses: RwLock<RunStatusFeed>,
}

#[derive(Debug)]
struct RunStatusFeed {
    events: VecDeque<RunStatusEvent>,
    last_seq: u64,
    capacity: usize,
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::with_run_status_capacity(DEFAULT_RUN_STATUS_CAPACITY)
    }
}

fn poison_err<T>(_: PoisonError<T>) -> MatdagError {
    MatdagError::EventLog("event log lock poisoned".to_string())
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_run_status_capacity(capacity: usize) -> Self {
        Self {
            events: RwLock::new(HashMap::new()),
            run_statuses: RwLock::new(RunStatusFeed {
                events: VecDeque::new(),
                last_seq: 0,
                capacity,
            }),
        }
    }

    /// Total number of events recorded.
    pub fn len(&self) -> Result<usize> {
        let events = self.events.read().map_err(poison_err)?;
        Ok(events.values().map(Vec::len).sum())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl EventLog for InMemoryEventLog {
    fn append(&self, event: MaterializationEvent) -> Result<()> {
        let mut events = self.events.write().map_err(poison_err)?;
        events.entry(event.key.clone()).or_default().push(event);
        Ok(())
    }

    fn latest(&self, key: &AssetKey, partition: Option<&str>) -> Result<Option<DateTime<Utc>>> {
        let events = self.events.read().map_err(poison_err)?;
        Ok(events.get(key).and_then(|evs| {
            evs.iter()
                .filter(|e| e.partition.as_deref() == partition)
                .map(|e| e.timestamp)
                .max()
        }))
    }

    fn latest_any_partition(&self, key: &AssetKey) -> Result<Option<MaterializationEvent>> {
        let events = self.events.read().map_err(poison_err)?;
        Ok(events
            .get(key)
            .and_then(|evs| evs.iter().max_by_key(|e| e.timestamp).cloned()))
    }

    fn events_for(&self, key: &AssetKey) -> Result<Vec<MaterializationEvent>> {
        let events = self.events.read().map_err(poison_err)?;
        Ok(events.get(key).cloned().unwrap_or_default())
    }

    fn record_run_status(&self, mut event: RunStatusEvent) -> Result<u64> {
        let mut feed = self.run_statuses.write().map_err(poison_err)?;
        feed.last_seq += 1;
        event.seq = feed.last_seq;
        feed.events.push_back(event);
        while feed.events.len() > feed.capacity {
            feed.events.pop_front();
        }
        Ok(feed.last_seq)
    }

    fn run_status_events_after(&self, after: u64) -> Result<Vec<RunStatusEvent>> {
        let feed = self.run_statuses.read().map_err(poison_err)?;
        Ok(feed
            .events
            .iter()
            .filter(|e| e.seq > after)
            .cloned()
            .collect())
    }
}
