// src/graph/graph.rs

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::graph::key::AssetKey;
use crate::graph::node::AssetNode;

/// Immutable, validated asset dependency graph for one load unit.
///
/// Edges point upstream -> downstream. The graph is built once by
/// [`AssetGraphBuilder`](crate::graph::AssetGraphBuilder) and then shared
/// read-only (behind an `Arc`) by the coordinator, the tick scheduler and the
/// staleness tracker.
#[derive(Debug, Clone)]
pub struct AssetGraph {
    load_unit: String,
    nodes: BTreeMap<AssetKey, AssetNode>,
    dag: DiGraph<AssetKey, ()>,
    index: HashMap<AssetKey, NodeIndex>,
    topo_order: Vec<AssetKey>,
}

impl AssetGraph {
    /// Build from nodes that already passed validation.
    ///
    /// Assumes that:
    /// - every upstream key is a node
    /// - there are no cycles
    pub(crate) fn from_validated(load_unit: String, nodes: BTreeMap<AssetKey, AssetNode>) -> Self {
        let mut dag: DiGraph<AssetKey, ()> = DiGraph::new();
        let mut index = HashMap::with_capacity(nodes.len());

        for key in nodes.keys() {
            index.insert(key.clone(), dag.add_node(key.clone()));
        }

        for node in nodes.values() {
            for up in &node.upstream {
                if let (Some(&from), Some(&to)) = (index.get(up), index.get(&node.key)) {
                    dag.add_edge(from, to, ());
                }
            }
        }

        // Validation already rejected cycles; fall back to key order otherwise.
        let topo_order = match toposort(&dag, None) {
            Ok(order) => order
                .into_iter()
                .filter_map(|idx| dag.node_weight(idx).cloned())
                .collect(),
            Err(_) => nodes.keys().cloned().collect(),
        };

        Self {
            load_unit,
            nodes,
            dag,
            index,
            topo_order,
        }
    }

    /// Name of the load unit this graph was built for.
    pub fn load_unit(&self) -> &str {
        &self.load_unit
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, key: &AssetKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn node(&self, key: &AssetKey) -> Option<&AssetNode> {
        self.nodes.get(key)
    }

    /// All nodes, ordered by key.
    pub fn nodes(&self) -> impl Iterator<Item = &AssetNode> {
        self.nodes.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &AssetKey> {
        self.nodes.keys()
    }

    /// Keys with a computation handle (excludes source and external assets).
    pub fn materializable_keys(&self) -> impl Iterator<Item = &AssetKey> {
        self.nodes
            .values()
            .filter(|n| n.materializable())
            .map(|n| &n.key)
    }

    /// Keys in topological order (every upstream before its downstreams).
    pub fn topological_order(&self) -> &[AssetKey] {
        &self.topo_order
    }

    /// Immediate upstream keys of `key`.
    pub fn upstream_of(&self, key: &AssetKey) -> BTreeSet<AssetKey> {
        self.neighbors(key, Direction::Incoming)
    }

    /// Immediate downstream keys of `key`.
    pub fn downstream_of(&self, key: &AssetKey) -> BTreeSet<AssetKey> {
        self.neighbors(key, Direction::Outgoing)
    }

    /// `keys` plus everything transitively upstream of them.
    pub fn upstream_closure<'a>(
        &self,
        keys: impl IntoIterator<Item = &'a AssetKey>,
    ) -> BTreeSet<AssetKey> {
        self.closure(keys, Direction::Incoming)
    }

    /// `keys` plus everything transitively downstream of them.
    pub fn downstream_closure<'a>(
        &self,
        keys: impl IntoIterator<Item = &'a AssetKey>,
    ) -> BTreeSet<AssetKey> {
        self.closure(keys, Direction::Outgoing)
    }

    /// Group name -> keys in that group.
    pub fn groups(&self) -> BTreeMap<&str, Vec<&AssetKey>> {
        let mut groups: BTreeMap<&str, Vec<&AssetKey>> = BTreeMap::new();
        for node in self.nodes.values() {
            groups.entry(node.group.as_str()).or_default().push(&node.key);
        }
        groups
    }

    fn neighbors(&self, key: &AssetKey, direction: Direction) -> BTreeSet<AssetKey> {
        let Some(&idx) = self.index.get(key) else {
            return BTreeSet::new();
        };
        self.dag
            .neighbors_directed(idx, direction)
            .filter_map(|n| self.dag.node_weight(n).cloned())
            .collect()
    }

    fn closure<'a>(
        &self,
        keys: impl IntoIterator<Item = &'a AssetKey>,
        direction: Direction,
    ) -> BTreeSet<AssetKey> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<AssetKey> = keys
            .into_iter()
            .filter(|k| self.contains(k))
            .cloned()
            .collect();

        while let Some(key) = stack.pop() {
            if !seen.insert(key.clone()) {
                continue;
            }
            stack.extend(self.neighbors(&key, direction));
        }

        seen
    }
}
