// src/staleness.rs

//! Staleness derived from materialization history.
//!
//! A node is stale when an upstream it reads from has a materialization newer
//! than the node's own latest one, or when the node was never materialized
//! but some upstream was.
//!
//! Two kinds of edges are left out of the comparison:
//! - edges whose upstream belongs to another load unit. A node with such an
//!   upstream is reported as [`StalenessStatus::NotEvaluated`] as a whole,
//!   since cross-unit lineage is not tracked.
//! - partitioned edges whose partition sets cannot be aligned 1:1. These are
//!   skipped; when every upstream edge is skipped the node is not evaluated.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::errors::{MatdagError, Result};
use crate::events::EventLog;
use crate::graph::{mapping_between, AssetGraph, AssetKey, AssetNode, PartitionMapping};

/// Why a node was not evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotEvaluatedReason {
    /// An upstream lives in another load unit.
    CrossLoadUnit { upstream: AssetKey, load_unit: String },
    /// No upstream edge can be aligned with this node's partitions.
    UnalignedPartitions,
}

impl fmt::Display for NotEvaluatedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotEvaluatedReason::CrossLoadUnit { upstream, load_unit } => {
                write!(f, "upstream {upstream} belongs to load unit '{load_unit}'")
            }
            NotEvaluatedReason::UnalignedPartitions => {
                write!(f, "upstream partitions cannot be aligned")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StalenessStatus {
    Stale,
    Fresh,
    NotEvaluated(NotEvaluatedReason),
}

/// Read-only view over the graph and the event log.
#[derive(Debug, Clone)]
pub struct StalenessTracker {
    graph: Arc<AssetGraph>,
    log: Arc<dyn EventLog>,
}

impl StalenessTracker {
    pub fn new(graph: Arc<AssetGraph>, log: Arc<dyn EventLog>) -> Self {
        Self { graph, log }
    }

    /// `true` iff the node is evaluated and stale.
    pub fn is_stale(&self, key: &AssetKey, partition: Option<&str>) -> Result<bool> {
        Ok(self.staleness(key, partition)? == StalenessStatus::Stale)
    }

    pub fn staleness(&self, key: &AssetKey, partition: Option<&str>) -> Result<StalenessStatus> {
        let node = self
            .graph
            .node(key)
            .ok_or_else(|| MatdagError::UnknownAsset(key.clone()))?;
        check_partition(node, partition)?;

        let mut compared: Vec<DateTime<Utc>> = Vec::new();
        let mut skipped = 0usize;

        for up_key in &node.upstream {
            let Some(up) = self.graph.node(up_key) else {
                continue;
            };
            if up.load_unit != node.load_unit {
                return Ok(StalenessStatus::NotEvaluated(
                    NotEvaluatedReason::CrossLoadUnit {
                        upstream: up_key.clone(),
                        load_unit: up.load_unit.clone(),
                    },
                ));
            }

            let up_partition = match mapping_between(up.partitions.as_ref(), node.partitions.as_ref())
            {
                PartitionMapping::AllUpstream => None,
                PartitionMapping::Identity => partition,
                PartitionMapping::Unaligned => {
                    skipped += 1;
                    continue;
                }
            };

            if let Some(ts) = self.log.latest(up_key, up_partition)? {
                compared.push(ts);
            }
        }

        if skipped > 0 && skipped == node.upstream.len() {
            return Ok(StalenessStatus::NotEvaluated(
                NotEvaluatedReason::UnalignedPartitions,
            ));
        }

        let own = self.log.latest(key, partition)?;
        let newest_upstream = compared.into_iter().max();

        let stale = match (own, newest_upstream) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(own), Some(up)) => up > own,
        };

        trace!(asset = %key, ?partition, ?own, ?newest_upstream, stale, "staleness evaluated");

        Ok(if stale {
            StalenessStatus::Stale
        } else {
            StalenessStatus::Fresh
        })
    }

    /// Downstream nodes of `keys` that are stale, with the partition they were
    /// evaluated for.
    ///
    /// A partitioned downstream is checked at `partition` when that partition
    /// is valid for it; unpartitioned downstreams are checked as a whole.
    pub fn stale_downstream_of(
        &self,
        keys: &BTreeSet<AssetKey>,
        partition: Option<&str>,
    ) -> Result<Vec<(AssetKey, Option<String>)>> {
        let reachable = self.graph.downstream_closure(keys);
        let mut stale = Vec::new();
        for key in self.graph.topological_order() {
            if keys.contains(key) || !reachable.contains(key) {
                continue;
            }
            let Some(node) = self.graph.node(key) else {
                continue;
            };
            let part = match (&node.partitions, partition) {
                (None, _) => None,
                (Some(def), Some(p)) if def.contains(p) => Some(p),
                (Some(_), _) => continue,
            };
            if self.is_stale(key, part)? {
                stale.push((key.clone(), part.map(str::to_string)));
            }
        }
        Ok(stale)
    }
}

fn check_partition(node: &AssetNode, partition: Option<&str>) -> Result<()> {
    let invalid = |reason: &str| MatdagError::InvalidPartition {
        key: node.key.clone(),
        partition: partition.unwrap_or_default().to_string(),
        reason: reason.to_string(),
    };

    match (&node.partitions, partition) {
        (None, None) => Ok(()),
        (None, Some(_)) => Err(invalid("asset is not partitioned")),
        (Some(_), None) => Err(invalid("asset is partitioned; a partition is required")),
        (Some(def), Some(p)) if def.contains(p) => Ok(()),
        (Some(_), Some(_)) => Err(invalid("unknown partition")),
    }
}
