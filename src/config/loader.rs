// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile, SensorTarget};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and validate it.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` default fns).
/// - Resolves `{ env = "..." }` values from the process environment.
/// - Compiles and validates the asset graph, jobs, schedules and sensors.
///
/// Relative file sensor roots are taken relative to the config file's
/// directory.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let raw_config = load_from_path(path)?;
    let mut config = ConfigFile::try_from(raw_config)?;

    let base = path.parent().unwrap_or_else(|| Path::new(""));
    rebase_sensor_roots(&mut config, base);

    Ok(config)
}

fn rebase_sensor_roots(config: &mut ConfigFile, base: &Path) {
    for sensor in &mut config.sensors {
        if let SensorTarget::Files { root, .. } = &mut sensor.target {
            if root.is_relative() {
                *root = base.join(&*root);
            }
        }
    }
}

/// Helper to resolve a default config path.
///
/// Honours `MATDAG_CONFIG`, otherwise `Matdag.toml` in the current working
/// directory.
pub fn default_config_path() -> PathBuf {
    std::env::var_os("MATDAG_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("Matdag.toml"))
}
