// src/graph/mod.rs

//! Asset graph model.
//!
//! - [`key`] defines segment-wise asset keys.
//! - [`partition`] holds partition definitions and partition mappings.
//! - [`node`] contains user-facing declarations and compiled graph nodes.
//! - [`builder`] validates declarations and compiles them into an [`AssetGraph`].
//! - [`graph`] is the immutable, shareable DAG itself.
//! - [`selection`] resolves asset selections against a graph.

pub mod builder;
pub mod graph;
pub mod key;
pub mod node;
pub mod partition;
pub mod selection;

pub use builder::AssetGraphBuilder;
pub use graph::AssetGraph;
pub use key::AssetKey;
pub use node::{
    AssetComputation, AssetDeclaration, AssetNode, AssetSpec, ConfigType, GraphAssetSpec,
    OpHandle, OpStep, SourceAssetSpec, SubGraph, DEFAULT_GROUP, DEFAULT_LOAD_UNIT,
};
pub use partition::{mapping_between, Cadence, PartitionMapping, PartitionsDefinition};
pub use selection::AssetSelection;
