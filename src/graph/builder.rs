// src/graph/builder.rs

//! Compile asset declarations into a validated [`AssetGraph`].
//!
//! Validation fails fast, in this order:
//! 1. malformed keys, group names and graph-backed declarations,
//! 2. conflicting declarations of the same key (group conflicts first),
//! 3. upstream references that resolve to no declared node,
//! 4. cycles, reported as the key sequence that closes the loop.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::errors::ValidationError;
use crate::graph::graph::AssetGraph;
use crate::graph::key::AssetKey;
use crate::graph::node::{
    AssetComputation, AssetDeclaration, AssetNode, AssetSpec, GraphAssetSpec, OpHandle,
    SourceAssetSpec, DEFAULT_GROUP, DEFAULT_LOAD_UNIT,
};

static GROUP_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("group name pattern is valid"));

/// Collects declarations for one load unit and builds the graph.
#[derive(Debug, Clone)]
pub struct AssetGraphBuilder {
    load_unit: String,
    declarations: Vec<AssetDeclaration>,
}

impl Default for AssetGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetGraphBuilder {
    pub fn new() -> Self {
        Self {
            load_unit: DEFAULT_LOAD_UNIT.to_string(),
            declarations: Vec::new(),
        }
    }

    pub fn load_unit(mut self, name: &str) -> Self {
        self.load_unit = name.to_string();
        self
    }

    pub fn with(mut self, decl: impl Into<AssetDeclaration>) -> Self {
        self.declarations.push(decl.into());
        self
    }

    pub fn add(&mut self, decl: impl Into<AssetDeclaration>) {
        self.declarations.push(decl.into());
    }

    pub fn build(self) -> Result<AssetGraph, ValidationError> {
        let mut candidates = Vec::new();
        for decl in &self.declarations {
            match decl {
                AssetDeclaration::Asset(spec) => {
                    candidates.push(expand_asset(spec, &self.load_unit)?)
                }
                AssetDeclaration::Graph(spec) => {
                    candidates.extend(expand_graph_asset(spec, &self.load_unit)?)
                }
                AssetDeclaration::Source(spec) => {
                    candidates.push(expand_source(spec, &self.load_unit)?)
                }
            }
        }

        let nodes = merge_declarations(candidates)?;
        ensure_references_resolve(&nodes)?;
        ensure_acyclic(&nodes)?;

        debug!(
            load_unit = %self.load_unit,
            nodes = nodes.len(),
            "asset graph validated"
        );

        Ok(AssetGraph::from_validated(self.load_unit, nodes))
    }
}

fn resolve_group(key: &AssetKey, group: Option<&String>) -> Result<String, ValidationError> {
    let group = group.map(String::as_str).unwrap_or(DEFAULT_GROUP);
    if !GROUP_NAME.is_match(group) {
        return Err(ValidationError::InvalidGroupName {
            key: key.clone(),
            group: group.to_string(),
        });
    }
    Ok(group.to_string())
}

fn expand_asset(spec: &AssetSpec, load_unit: &str) -> Result<AssetNode, ValidationError> {
    let key = spec.full_key();
    key.validate()?;
    let group = resolve_group(&key, spec.group.as_ref())?;

    let mut upstream: BTreeSet<AssetKey> = spec.ins.values().cloned().collect();
    upstream.extend(spec.deps.iter().cloned());
    for up in &upstream {
        up.validate()?;
    }

    let op = spec
        .op
        .clone()
        .unwrap_or_else(|| OpHandle::new(key.name()));

    Ok(AssetNode {
        key,
        group,
        upstream,
        inputs: spec.ins.clone(),
        partitions: spec.partitions.clone(),
        computation: Some(AssetComputation::Simple(op)),
        config_schema: spec.config_schema.clone(),
        metadata: spec.metadata.clone(),
        required_resources: spec.required_resources.clone(),
        load_unit: load_unit.to_string(),
    })
}

fn expand_source(spec: &SourceAssetSpec, load_unit: &str) -> Result<AssetNode, ValidationError> {
    spec.key.validate()?;
    let group = resolve_group(&spec.key, spec.group.as_ref())?;

    Ok(AssetNode {
        key: spec.key.clone(),
        group,
        upstream: BTreeSet::new(),
        inputs: BTreeMap::new(),
        partitions: spec.partitions.clone(),
        computation: None,
        config_schema: BTreeMap::new(),
        metadata: spec.metadata.clone(),
        required_resources: BTreeSet::new(),
        load_unit: spec
            .load_unit
            .clone()
            .unwrap_or_else(|| load_unit.to_string()),
    })
}

/// Expand a graph-backed declaration into one node per output.
fn expand_graph_asset(
    spec: &GraphAssetSpec,
    load_unit: &str,
) -> Result<Vec<AssetNode>, ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidComposite {
        name: spec.graph.name.clone(),
        reason,
    };

    if spec.outputs.is_empty() {
        return Err(invalid("no outputs mapped to asset keys".to_string()));
    }
    validate_sub_graph(spec).map_err(invalid)?;

    // Base key -> full key, so internal deps may name sibling outputs by base key.
    let mut full_by_base: HashMap<AssetKey, AssetKey> = HashMap::new();
    let mut keys_by_output = BTreeMap::new();
    let mut output_steps = BTreeMap::new();
    for (output, (step, base)) in &spec.outputs {
        let full = base.with_prefix(&spec.key_prefix);
        full.validate()?;
        full_by_base.insert(base.clone(), full.clone());
        keys_by_output.insert(output.clone(), full);
        output_steps.insert(output.clone(), step.clone());
    }

    if let Some(unknown) = spec
        .internal_deps
        .keys()
        .find(|o| !spec.outputs.contains_key(*o))
    {
        return Err(invalid(format!(
            "internal deps reference unknown output '{unknown}'"
        )));
    }

    let computation = AssetComputation::Composite {
        graph: spec.graph.clone(),
        output_steps,
        keys_by_output: keys_by_output.clone(),
    };

    let all_inputs: BTreeSet<AssetKey> = spec.ins.values().cloned().collect();
    let mut nodes = Vec::with_capacity(keys_by_output.len());

    for (output, key) in keys_by_output {
        let group = resolve_group(&key, spec.group.as_ref())?;
        let upstream: BTreeSet<AssetKey> = match spec.internal_deps.get(&output) {
            Some(deps) => deps
                .iter()
                .map(|d| full_by_base.get(d).cloned().unwrap_or_else(|| d.clone()))
                .collect(),
            None => all_inputs.clone(),
        };
        let inputs = spec
            .ins
            .iter()
            .filter(|(_, k)| upstream.contains(*k))
            .map(|(slot, k)| (slot.clone(), k.clone()))
            .collect();

        nodes.push(AssetNode {
            key,
            group,
            upstream,
            inputs,
            partitions: spec.partitions.clone(),
            computation: Some(computation.clone()),
            config_schema: spec.config_schema.clone(),
            metadata: spec.metadata.clone(),
            required_resources: spec.required_resources.clone(),
            load_unit: load_unit.to_string(),
        });
    }

    Ok(nodes)
}

/// Check step names, step references, output steps and sub-graph acyclicity.
fn validate_sub_graph(spec: &GraphAssetSpec) -> Result<(), String> {
    let mut steps: HashMap<&str, &[String]> = HashMap::new();
    for step in &spec.graph.steps {
        if steps
            .insert(step.name.as_str(), step.upstream_steps.as_slice())
            .is_some()
        {
            return Err(format!("step '{}' is declared twice", step.name));
        }
    }

    for (name, ups) in &steps {
        if let Some(missing) = ups.iter().find(|u| !steps.contains_key(u.as_str())) {
            return Err(format!("step '{name}' depends on unknown step '{missing}'"));
        }
    }

    for (output, (step, _)) in &spec.outputs {
        if !steps.contains_key(step.as_str()) {
            return Err(format!("output '{output}' refers to unknown step '{step}'"));
        }
    }

    // Kahn's algorithm: any step left with unmet inputs sits on a cycle.
    let mut remaining: HashMap<&str, usize> =
        steps.iter().map(|(name, ups)| (*name, ups.len())).collect();
    let mut ready: Vec<&str> = remaining
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut visited = 0;
    while let Some(done) = ready.pop() {
        visited += 1;
        for (name, ups) in &steps {
            if ups.iter().any(|u| u == done) {
                if let Some(n) = remaining.get_mut(name) {
                    *n -= ups.iter().filter(|u| *u == done).count();
                    if *n == 0 {
                        ready.push(*name);
                    }
                }
            }
        }
    }
    if visited != steps.len() {
        return Err("op sub-graph contains a cycle".to_string());
    }

    Ok(())
}

/// Fold candidate nodes into one node per key.
///
/// Re-declaring a key with an identical definition is a no-op.
fn merge_declarations(
    candidates: Vec<AssetNode>,
) -> Result<BTreeMap<AssetKey, AssetNode>, ValidationError> {
    let mut nodes: BTreeMap<AssetKey, AssetNode> = BTreeMap::new();

    for node in candidates {
        match nodes.get(&node.key) {
            None => {
                nodes.insert(node.key.clone(), node);
            }
            Some(existing) if *existing == node => {
                debug!(asset = %node.key, "identical re-declaration ignored");
            }
            Some(existing)
                if existing.materializable()
                    && node.materializable()
                    && existing.group != node.group =>
            {
                return Err(ValidationError::GroupConflict {
                    key: node.key.clone(),
                    first: existing.group.clone(),
                    second: node.group.clone(),
                });
            }
            Some(_) => {
                return Err(ValidationError::DuplicateKey { key: node.key });
            }
        }
    }

    Ok(nodes)
}

fn ensure_references_resolve(nodes: &BTreeMap<AssetKey, AssetNode>) -> Result<(), ValidationError> {
    for node in nodes.values() {
        if let Some(missing) = node.upstream.iter().find(|up| !nodes.contains_key(*up)) {
            return Err(ValidationError::UnresolvedReference {
                asset: node.key.clone(),
                upstream: missing.clone(),
            });
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

/// Depth-first search along upstream -> downstream edges, tracking the
/// current recursion stack. Reaching a node that is still on the stack closes
/// a cycle; the reported path starts and ends with that node.
fn ensure_acyclic(nodes: &BTreeMap<AssetKey, AssetNode>) -> Result<(), ValidationError> {
    let mut downstream: BTreeMap<&AssetKey, BTreeSet<&AssetKey>> = BTreeMap::new();
    for node in nodes.values() {
        for up in &node.upstream {
            downstream.entry(up).or_default().insert(&node.key);
        }
    }

    let mut state: HashMap<&AssetKey, Visit> = HashMap::new();
    let mut stack: Vec<&AssetKey> = Vec::new();

    for root in nodes.keys() {
        if state.contains_key(root) {
            continue;
        }
        visit(root, &downstream, &mut state, &mut stack)?;
    }

    Ok(())
}

fn visit<'a>(
    key: &'a AssetKey,
    downstream: &BTreeMap<&'a AssetKey, BTreeSet<&'a AssetKey>>,
    state: &mut HashMap<&'a AssetKey, Visit>,
    stack: &mut Vec<&'a AssetKey>,
) -> Result<(), ValidationError> {
    state.insert(key, Visit::InProgress);
    stack.push(key);

    if let Some(children) = downstream.get(key) {
        for child in children {
            match state.get(child) {
                Some(Visit::Done) => {}
                Some(Visit::InProgress) => {
                    let start = stack.iter().position(|k| k == child).unwrap_or(0);
                    let mut path: Vec<AssetKey> =
                        stack[start..].iter().map(|k| (*k).clone()).collect();
                    path.push((*child).clone());
                    return Err(ValidationError::Cycle { path });
                }
                None => visit(*child, downstream, state, stack)?,
            }
        }
    }

    stack.pop();
    state.insert(key, Visit::Done);
    Ok(())
}
