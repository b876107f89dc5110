// src/coordinator/queue.rs

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::coordinator::run::RunId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueEntry {
    id: RunId,
    created_at: DateTime<Utc>,
    seq: u64,
}

/// Runs waiting for admission, ordered by creation time.
///
/// Semantics:
/// - entries are kept sorted by `(created_at, seq)`, so a run submitted with
///   an older creation timestamp lands ahead of newer ones even if it arrived
///   later.
/// - admission scans head to tail; an entry is only removed when it is
///   admitted or canceled.
#[derive(Debug, Default)]
pub struct RunQueue {
    entries: VecDeque<QueueEntry>,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn push(&mut self, id: RunId, created_at: DateTime<Utc>, seq: u64) {
        let entry = QueueEntry {
            id,
            created_at,
            seq,
        };
        let pos = self
            .entries
            .iter()
            .position(|e| (e.created_at, e.seq) > (created_at, seq))
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, entry);
        debug!(run_id = %id, position = pos, queued = self.entries.len(), "run enqueued");
    }

    /// Remove `id`; returns whether it was queued.
    pub fn remove(&mut self, id: RunId) -> bool {
        match self.entries.iter().position(|e| e.id == id) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: RunId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Queued run ids, head first.
    pub fn ids(&self) -> Vec<RunId> {
        self.entries.iter().map(|e| e.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn orders_by_creation_time_then_seq() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();
        let (a, b, c) = (RunId::new(), RunId::new(), RunId::new());

        let mut q = RunQueue::new();
        q.push(a, t1, 0);
        q.push(b, t0, 1);
        q.push(c, t1, 2);

        assert_eq!(q.ids(), vec![b, a, c]);
        assert!(q.remove(a));
        assert!(!q.remove(a));
        assert_eq!(q.ids(), vec![b, c]);
    }
}
