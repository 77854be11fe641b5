// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{EngineConfig, RawEngineConfig};
use crate::errors::{AvocadoError, Result};

/// Load a configuration file from a given path and return the raw
/// `RawEngineConfig`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawEngineConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawEngineConfig = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and run validation.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<EngineConfig> {
    let raw_config = load_from_path(&path)?;
    let config = EngineConfig::try_from(raw_config)?;
    Ok(config)
}

/// Default config location.
///
/// `AVOCADO_CONFIG` wins; otherwise `~/.config/avocado/avocado.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("AVOCADO_CONFIG") {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    std::env::var_os("HOME").map(|home| {
        PathBuf::from(home)
            .join(".config")
            .join("avocado")
            .join("avocado.toml")
    })
}

/// Load the configuration a command should run with.
///
/// An explicit path must exist. The default path is optional; when it is
/// missing the built-in defaults are used.
pub fn load_effective(explicit: Option<&Path>) -> Result<EngineConfig> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(AvocadoError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        return load_and_validate(path);
    }

    match default_config_path() {
        Some(path) if path.is_file() => {
            debug!(path = %path.display(), "loading default config file");
            load_and_validate(path)
        }
        _ => Ok(EngineConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExecutionOrder;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("avocado.toml");
        fs::write(
            &path,
            "[run]\nfailfast = true\nexecution_order = \"tests-per-variant\"\n\n[runner.timeout]\nprocess_alive = 1.5\n",
        )
        .unwrap();

        let cfg = load_and_validate(&path).unwrap();
        assert!(cfg.run.failfast);
        assert_eq!(cfg.run.execution_order, ExecutionOrder::TestsPerVariant);
        assert_eq!(cfg.runner.timeout.process_alive, 1.5);
        assert_eq!(cfg.runner.timeout.process_died, 5.0);
        assert_eq!(cfg.scheduler.workers, 4);
    }

    #[test]
    fn unknown_key_is_a_toml_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("avocado.toml");
        fs::write(&path, "[run]\nfailfats = true\n").unwrap();
        assert!(matches!(load_and_validate(&path), Err(AvocadoError::Toml(_))));
    }

    #[test]
    fn explicit_missing_file_is_config_error() {
        let err = load_effective(Some(Path::new("/nonexistent/avocado.toml"))).unwrap_err();
        assert!(matches!(err, AvocadoError::Config(_)));
    }
}
