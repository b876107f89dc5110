// src/config/env.rs

//! Values that may be given literally or through an environment variable.
//!
//! ```toml
//! max_concurrent_runs = 10
//! max_concurrent_runs = { env = "MATDAG_MAX_RUNS" }
//! ```

use std::fmt::Display;
use std::str::FromStr;

use serde::Deserialize;

use crate::errors::{MatdagError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum EnvOr<T> {
    Env { env: String },
    Literal(T),
}

impl<T> EnvOr<T>
where
    T: FromStr + Clone,
    T::Err: Display,
{
    /// Resolve against the process environment.
    pub fn resolve(&self, field: &str) -> Result<T> {
        self.resolve_with(field, &|name| std::env::var(name).ok())
    }

    /// Resolve with an explicit variable lookup.
    pub fn resolve_with(&self, field: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Result<T> {
        match self {
            EnvOr::Literal(value) => Ok(value.clone()),
            EnvOr::Env { env } => {
                let raw = lookup(env).ok_or_else(|| {
                    MatdagError::ConfigError(format!(
                        "{field}: environment variable '{env}' is not set"
                    ))
                })?;
                raw.trim().parse::<T>().map_err(|e| {
                    MatdagError::ConfigError(format!(
                        "{field}: environment variable '{env}' has invalid value '{raw}': {e}"
                    ))
                })
            }
        }
    }
}

impl<T> From<T> for EnvOr<T> {
    fn from(value: T) -> Self {
        EnvOr::Literal(value)
    }
}
