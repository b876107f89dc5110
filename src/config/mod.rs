// src/config/mod.rs

//! Configuration loading and validation for matdag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Resolve literal-or-environment values (`env.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Turn the raw model into validated settings and an asset graph (`validate.rs`).

pub mod env;
pub mod loader;
pub mod model;
pub mod validate;

pub use env::EnvOr;
pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    ConfigFile, RawConfigFile, ScheduleDefinition, SensorDefinition, SensorTarget,
};
pub use validate::validate_with_env;
