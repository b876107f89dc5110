// src/graph/selection.rs

//! Asset selections: which nodes a run or job targets.
//!
//! String syntax, one term per string:
//! - `*`            every materializable asset
//! - `group:<name>` every asset in a group
//! - `*a/b`         `a/b` plus everything upstream of it
//! - `a/b*`         `a/b` plus everything downstream of it
//! - `a/b`          a single key

use std::collections::BTreeSet;
use std::fmt;

use crate::errors::{MatdagError, Result};
use crate::graph::graph::AssetGraph;
use crate::graph::key::AssetKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSelection {
    All,
    Keys(Vec<AssetKey>),
    Groups(Vec<String>),
    Upstream(Box<AssetSelection>),
    Downstream(Box<AssetSelection>),
    Union(Vec<AssetSelection>),
}

impl AssetSelection {
    pub fn keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<AssetKey>,
    {
        AssetSelection::Keys(keys.into_iter().map(Into::into).collect())
    }

    pub fn groups<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AssetSelection::Groups(groups.into_iter().map(Into::into).collect())
    }

    pub fn upstream(self) -> Self {
        AssetSelection::Upstream(Box::new(self))
    }

    pub fn downstream(self) -> Self {
        AssetSelection::Downstream(Box::new(self))
    }

    /// Parse one selection term.
    pub fn parse(term: &str) -> Result<Self> {
        let term = term.trim();
        if term.is_empty() {
            return Err(MatdagError::InvalidSelection(
                "empty selection term".to_string(),
            ));
        }
        if term == "*" {
            return Ok(AssetSelection::All);
        }
        if let Some(group) = term.strip_prefix("group:") {
            if group.trim().is_empty() {
                return Err(MatdagError::InvalidSelection(format!(
                    "missing group name in '{term}'"
                )));
            }
            return Ok(AssetSelection::groups([group.trim()]));
        }

        let (upstream, rest) = match term.strip_prefix('*') {
            Some(rest) => (true, rest),
            None => (false, term),
        };
        let (downstream, path) = match rest.strip_suffix('*') {
            Some(path) => (true, path),
            None => (false, rest),
        };

        let key = AssetKey::parse(path);
        if key.is_empty() || path.contains('*') {
            return Err(MatdagError::InvalidSelection(format!(
                "invalid selection term '{term}'"
            )));
        }

        let mut selection = AssetSelection::Keys(vec![key]);
        match (upstream, downstream) {
            (true, true) => {
                selection = AssetSelection::Union(vec![
                    selection.clone().upstream(),
                    selection.downstream(),
                ])
            }
            (true, false) => selection = selection.upstream(),
            (false, true) => selection = selection.downstream(),
            (false, false) => {}
        }
        Ok(selection)
    }

    /// Parse several terms into their union.
    pub fn parse_all<S: AsRef<str>>(terms: &[S]) -> Result<Self> {
        let mut parsed = terms
            .iter()
            .map(|t| AssetSelection::parse(t.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        if parsed.len() == 1 {
            return Ok(parsed.remove(0));
        }
        Ok(AssetSelection::Union(parsed))
    }

    /// Resolve against a graph.
    ///
    /// Only materializable keys are returned; source and external assets
    /// pulled in by an upstream closure are dropped. Naming a key that is not
    /// in the graph is an error.
    pub fn resolve(&self, graph: &AssetGraph) -> Result<BTreeSet<AssetKey>> {
        let all = self.resolve_any(graph)?;
        Ok(all
            .into_iter()
            .filter(|k| graph.node(k).is_some_and(|n| n.materializable()))
            .collect())
    }

    fn resolve_any(&self, graph: &AssetGraph) -> Result<BTreeSet<AssetKey>> {
        match self {
            AssetSelection::All => Ok(graph.keys().cloned().collect()),
            AssetSelection::Keys(keys) => {
                if let Some(missing) = keys.iter().find(|k| !graph.contains(k)) {
                    return Err(MatdagError::UnknownAsset(missing.clone()));
                }
                Ok(keys.iter().cloned().collect())
            }
            AssetSelection::Groups(groups) => Ok(graph
                .nodes()
                .filter(|n| groups.iter().any(|g| *g == n.group))
                .map(|n| n.key.clone())
                .collect()),
            AssetSelection::Upstream(inner) => {
                let base = inner.resolve_any(graph)?;
                Ok(graph.upstream_closure(&base))
            }
            AssetSelection::Downstream(inner) => {
                let base = inner.resolve_any(graph)?;
                Ok(graph.downstream_closure(&base))
            }
            AssetSelection::Union(parts) => {
                let mut out = BTreeSet::new();
                for part in parts {
                    out.extend(part.resolve_any(graph)?);
                }
                Ok(out)
            }
        }
    }
}

impl fmt::Display for AssetSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetSelection::All => write!(f, "*"),
            AssetSelection::Keys(keys) => {
                let keys: Vec<String> = keys.iter().map(ToString::to_string).collect();
                write!(f, "{}", keys.join(", "))
            }
            AssetSelection::Groups(groups) => {
                let groups: Vec<String> = groups.iter().map(|g| format!("group:{g}")).collect();
                write!(f, "{}", groups.join(", "))
            }
            AssetSelection::Upstream(inner) => write!(f, "*({inner})"),
            AssetSelection::Downstream(inner) => write!(f, "({inner})*"),
            AssetSelection::Union(parts) => {
                let parts: Vec<String> = parts.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(" | "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_terms() {
        assert_eq!(AssetSelection::parse("*").unwrap(), AssetSelection::All);
        assert_eq!(
            AssetSelection::parse("group:core").unwrap(),
            AssetSelection::groups(["core"])
        );
        assert_eq!(
            AssetSelection::parse("*a/b").unwrap(),
            AssetSelection::keys(["a/b"]).upstream()
        );
        assert_eq!(
            AssetSelection::parse("a/b*").unwrap(),
            AssetSelection::keys(["a/b"]).downstream()
        );
        assert!(AssetSelection::parse("a*b").is_err());
        assert!(AssetSelection::parse("group:").is_err());
    }
}
