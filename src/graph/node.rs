// src/graph/node.rs

//! Asset declarations (what users write) and asset nodes (what the graph stores).

use std::collections::{BTreeMap, BTreeSet};

use crate::graph::key::AssetKey;
use crate::graph::partition::PartitionsDefinition;

/// Group assigned when a declaration does not name one.
pub const DEFAULT_GROUP: &str = "default";

/// Load unit assigned when a definitions set does not name one.
pub const DEFAULT_LOAD_UNIT: &str = "default";

/// Opaque handle to the computation (op) that produces an asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpHandle(pub String);

impl OpHandle {
    pub fn new(name: impl Into<String>) -> Self {
        OpHandle(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// Expected type of a run-config option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigType {
    Int,
    Float,
    Bool,
    String,
    Any,
}

impl std::str::FromStr for ConfigType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "int" => Ok(ConfigType::Int),
            "float" => Ok(ConfigType::Float),
            "bool" => Ok(ConfigType::Bool),
            "string" | "str" => Ok(ConfigType::String),
            "any" => Ok(ConfigType::Any),
            other => Err(format!(
                "invalid config type: {other} (expected int, float, bool, string or any)"
            )),
        }
    }
}

/// One step of a graph-backed asset's internal sub-graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpStep {
    pub name: String,
    pub op: OpHandle,
    /// Names of steps inside the same sub-graph that feed this one.
    pub upstream_steps: Vec<String>,
}

/// Sub-DAG of ops wrapped as one or more assets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubGraph {
    pub name: String,
    pub steps: Vec<OpStep>,
}

/// The computation behind a materializable node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetComputation {
    Simple(OpHandle),
    Composite {
        graph: SubGraph,
        /// Output name -> step name producing it.
        output_steps: BTreeMap<String, String>,
        /// Output name -> full asset key.
        keys_by_output: BTreeMap<String, AssetKey>,
    },
}

/// Single-output asset declaration.
///
/// Inputs are an explicit mapping from input slot name to upstream key; there
/// is no name-based inference at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssetSpec {
    pub key: AssetKey,
    pub key_prefix: Vec<String>,
    pub ins: BTreeMap<String, AssetKey>,
    /// Upstream keys that do not bind to an input slot.
    pub deps: Vec<AssetKey>,
    pub group: Option<String>,
    pub partitions: Option<PartitionsDefinition>,
    pub op: Option<OpHandle>,
    pub config_schema: BTreeMap<String, ConfigType>,
    pub metadata: BTreeMap<String, String>,
    pub required_resources: BTreeSet<String>,
}

impl AssetSpec {
    pub fn new(key: impl Into<AssetKey>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn key_prefix<I, S>(mut self, prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_prefix = prefix.into_iter().map(Into::into).collect();
        self
    }

    pub fn input(mut self, slot: &str, key: impl Into<AssetKey>) -> Self {
        self.ins.insert(slot.to_string(), key.into());
        self
    }

    pub fn dep(mut self, key: impl Into<AssetKey>) -> Self {
        self.deps.push(key.into());
        self
    }

    pub fn group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    pub fn partitions(mut self, partitions: PartitionsDefinition) -> Self {
        self.partitions = Some(partitions);
        self
    }

    pub fn op(mut self, op: &str) -> Self {
        self.op = Some(OpHandle::new(op));
        self
    }

    pub fn config(mut self, option: &str, ty: ConfigType) -> Self {
        self.config_schema.insert(option.to_string(), ty);
        self
    }

    pub fn metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn resource(mut self, name: &str) -> Self {
        self.required_resources.insert(name.to_string());
        self
    }

    /// Key after applying the prefix.
    pub fn full_key(&self) -> AssetKey {
        self.key.with_prefix(&self.key_prefix)
    }
}

/// Graph-backed (multi-output) asset declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphAssetSpec {
    pub graph: SubGraph,
    pub key_prefix: Vec<String>,
    /// Output name -> (step producing it, base key).
    pub outputs: BTreeMap<String, (String, AssetKey)>,
    pub ins: BTreeMap<String, AssetKey>,
    /// Output name -> upstream keys used by that output only. Outputs not
    /// listed depend on every input.
    pub internal_deps: BTreeMap<String, BTreeSet<AssetKey>>,
    pub group: Option<String>,
    pub partitions: Option<PartitionsDefinition>,
    pub config_schema: BTreeMap<String, ConfigType>,
    pub metadata: BTreeMap<String, String>,
    pub required_resources: BTreeSet<String>,
}

impl GraphAssetSpec {
    pub fn new(graph: SubGraph) -> Self {
        Self {
            graph,
            key_prefix: Vec::new(),
            outputs: BTreeMap::new(),
            ins: BTreeMap::new(),
            internal_deps: BTreeMap::new(),
            group: None,
            partitions: None,
            config_schema: BTreeMap::new(),
            metadata: BTreeMap::new(),
            required_resources: BTreeSet::new(),
        }
    }

    pub fn key_prefix<I, S>(mut self, prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_prefix = prefix.into_iter().map(Into::into).collect();
        self
    }

    pub fn output(mut self, name: &str, step: &str, key: impl Into<AssetKey>) -> Self {
        self.outputs
            .insert(name.to_string(), (step.to_string(), key.into()));
        self
    }

    pub fn input(mut self, slot: &str, key: impl Into<AssetKey>) -> Self {
        self.ins.insert(slot.to_string(), key.into());
        self
    }

    pub fn internal_dep(mut self, output: &str, key: impl Into<AssetKey>) -> Self {
        self.internal_deps
            .entry(output.to_string())
            .or_default()
            .insert(key.into());
        self
    }

    pub fn group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    pub fn partitions(mut self, partitions: PartitionsDefinition) -> Self {
        self.partitions = Some(partitions);
        self
    }
}

/// Asset produced outside this system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAssetSpec {
    pub key: AssetKey,
    pub group: Option<String>,
    pub partitions: Option<PartitionsDefinition>,
    pub metadata: BTreeMap<String, String>,
    /// Load unit owning the asset; `None` means the unit being loaded.
    pub load_unit: Option<String>,
}

impl SourceAssetSpec {
    pub fn new(key: impl Into<AssetKey>) -> Self {
        Self {
            key: key.into(),
            group: None,
            partitions: None,
            metadata: BTreeMap::new(),
            load_unit: None,
        }
    }

    pub fn group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    pub fn partitions(mut self, partitions: PartitionsDefinition) -> Self {
        self.partitions = Some(partitions);
        self
    }

    /// Mark the asset as living in another load unit.
    pub fn external(mut self, load_unit: &str) -> Self {
        self.load_unit = Some(load_unit.to_string());
        self
    }
}

/// Any declaration accepted by the graph builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetDeclaration {
    Asset(AssetSpec),
    Graph(GraphAssetSpec),
    Source(SourceAssetSpec),
}

impl From<AssetSpec> for AssetDeclaration {
    fn from(spec: AssetSpec) -> Self {
        AssetDeclaration::Asset(spec)
    }
}

impl From<GraphAssetSpec> for AssetDeclaration {
    fn from(spec: GraphAssetSpec) -> Self {
        AssetDeclaration::Graph(spec)
    }
}

impl From<SourceAssetSpec> for AssetDeclaration {
    fn from(spec: SourceAssetSpec) -> Self {
        AssetDeclaration::Source(spec)
    }
}

/// A node of the compiled [`AssetGraph`](crate::graph::AssetGraph).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetNode {
    pub key: AssetKey,
    pub group: String,
    /// All upstream keys (input slots plus non-argument deps).
    pub upstream: BTreeSet<AssetKey>,
    /// Input slot -> upstream key.
    pub inputs: BTreeMap<String, AssetKey>,
    pub partitions: Option<PartitionsDefinition>,
    /// `None` for source and external assets.
    pub computation: Option<AssetComputation>,
    pub config_schema: BTreeMap<String, ConfigType>,
    pub metadata: BTreeMap<String, String>,
    pub required_resources: BTreeSet<String>,
    pub load_unit: String,
}

impl AssetNode {
    pub fn materializable(&self) -> bool {
        self.computation.is_some()
    }

    pub fn is_partitioned(&self) -> bool {
        self.partitions.is_some()
    }
}
