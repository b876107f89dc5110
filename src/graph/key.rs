// src/graph/key.rs

//! Asset keys: ordered sequences of string segments.
//!
//! Keys are always compared segment-wise. A string such as `"a/b"` is parsed
//! into the segments `["a", "b"]` on the way in, so `AssetKey::from("a/b")`
//! and `AssetKey::new(["a", "b"])` are the same key.

use std::fmt;

use crate::errors::ValidationError;

/// Separator used when a key is written as a single string.
pub const KEY_SEPARATOR: char = '/';

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetKey {
    segments: Vec<String>,
}

impl AssetKey {
    /// Build a key from explicit segments.
    ///
    /// A segment that itself contains `/` is split, so segments never carry
    /// the separator.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments
                .into_iter()
                .flat_map(|s| {
                    let s: String = s.into();
                    split_segments(&s)
                })
                .collect(),
        }
    }

    /// Parse a `/`-separated path (`"warehouse/users"`).
    ///
    /// Empty segments (leading, trailing or doubled separators) are dropped.
    pub fn parse(path: &str) -> Self {
        Self {
            segments: split_segments(path),
        }
    }

    /// Compose `prefix + base` segment-wise.
    pub fn with_prefix(&self, prefix: &[String]) -> Self {
        let mut segments = Vec::with_capacity(prefix.len() + self.segments.len());
        segments.extend(prefix.iter().flat_map(|p| split_segments(p)));
        segments.extend(self.segments.iter().cloned());
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment, used as the display name of a node.
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Reject keys with no segments or with blank segments.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.segments.is_empty() || self.segments.iter().any(|s| s.trim().is_empty()) {
            return Err(ValidationError::EmptyKey);
        }
        Ok(())
    }
}

fn split_segments(path: &str) -> Vec<String> {
    path.split(KEY_SEPARATOR)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

impl From<&str> for AssetKey {
    fn from(path: &str) -> Self {
        AssetKey::parse(path)
    }
}

impl From<String> for AssetKey {
    fn from(path: String) -> Self {
        AssetKey::parse(&path)
    }
}

impl From<Vec<String>> for AssetKey {
    fn from(segments: Vec<String>) -> Self {
        AssetKey::new(segments)
    }
}

impl From<&[&str]> for AssetKey {
    fn from(segments: &[&str]) -> Self {
        AssetKey::new(segments.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for AssetKey {
    fn from(segments: [&str; N]) -> Self {
        AssetKey::new(segments)
    }
}
