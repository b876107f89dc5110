// tests/property/graph.rs

use std::collections::{BTreeSet, HashMap};

use matdag::errors::ValidationError;
use matdag::graph::{AssetGraphBuilder, AssetKey, AssetSpec};
use proptest::prelude::*;

/// Dependency lists where asset `i` may only depend on assets `0..i`.
fn acyclic_deps(max_assets: usize) -> impl Strategy<Value = Vec<BTreeSet<usize>>> {
    (1..=max_assets).prop_flat_map(|n| {
        proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..4), n).prop_map(
            |raw| {
                raw.into_iter()
                    .enumerate()
                    .map(|(i, picks)| {
                        if i == 0 {
                            BTreeSet::new()
                        } else {
                            picks.into_iter().map(|p| p % i).collect()
                        }
                    })
                    .collect()
            },
        )
    })
}

fn name(i: usize) -> String {
    format!("asset_{i}")
}

fn builder_for(deps: &[BTreeSet<usize>]) -> AssetGraphBuilder {
    let mut builder = AssetGraphBuilder::new();
    for (i, upstream) in deps.iter().enumerate() {
        let mut spec = AssetSpec::new(name(i).as_str());
        for u in upstream {
            spec = spec.dep(name(*u).as_str());
        }
        builder.add(spec);
    }
    builder
}

proptest! {
    #[test]
    fn topological_order_puts_upstream_first(deps in acyclic_deps(12)) {
        let graph = builder_for(&deps).build().unwrap();
        prop_assert_eq!(graph.len(), deps.len());

        let position: HashMap<&AssetKey, usize> = graph
            .topological_order()
            .iter()
            .enumerate()
            .map(|(i, k)| (k, i))
            .collect();
        for (i, upstream) in deps.iter().enumerate() {
            let key = AssetKey::parse(&name(i));
            for u in upstream {
                let up = AssetKey::parse(&name(*u));
                prop_assert!(position[&up] < position[&key]);
                prop_assert!(graph.downstream_of(&up).contains(&key));
            }
        }
    }

    #[test]
    fn back_edge_is_reported_as_cycle(deps in acyclic_deps(8), from in any::<usize>(), to in any::<usize>()) {
        prop_assume!(deps.len() >= 2);
        // Make two assets depend on each other.
        let hi = 1 + to % (deps.len() - 1);
        let lo = from % hi;
        let mut deps = deps;
        deps[hi].insert(lo);
        deps[lo].insert(hi);

        match builder_for(&deps).build() {
            Err(ValidationError::Cycle { path }) => {
                prop_assert!(path.len() >= 2);
                prop_assert_eq!(path.first(), path.last());
            }
            other => prop_assert!(false, "expected cycle, got {:?}", other.map(|g| g.len())),
        }
    }
}
