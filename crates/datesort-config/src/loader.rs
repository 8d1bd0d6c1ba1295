//! Layered configuration loading.
//!
//! # Design
//! - Sources are read into sparse [`ConfigLayer`]s and merged lowest to highest:
//!   YAML file, legacy environment variables, then CLI flags (which already
//!   carry `DATESORT_*` environment values through clap).
//! - Environment access goes through a lookup closure so tests never mutate the
//!   process environment.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{ConfigLayer, DatesortConfig, LogLevel};

/// Environment variable honoured for the log level when no flag is given.
pub const LEGACY_LOG_LEVEL_ENV: &str = "LOG_LEVEL";

/// Read a YAML configuration file into a layer.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not match the schema.
pub fn load_file(path: &Path) -> ConfigResult<ConfigLayer> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        operation: "config_file.read",
        path: path.to_path_buf(),
        source,
    })?;
    if raw.trim().is_empty() {
        return Ok(ConfigLayer::default());
    }
    let layer = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "loaded configuration file");
    Ok(layer)
}

/// Build a layer from environment variables that predate the `DATESORT_*` names.
///
/// # Errors
///
/// Returns an error when a recognised variable holds an invalid value.
pub fn legacy_env_layer<F>(lookup: F) -> ConfigResult<ConfigLayer>
where
    F: Fn(&str) -> Option<String>,
{
    let log_level = lookup(LEGACY_LOG_LEVEL_ENV)
        .filter(|value| !value.trim().is_empty())
        .map(|value| value.parse::<LogLevel>())
        .transpose()?;
    Ok(ConfigLayer {
        log_level,
        ..ConfigLayer::default()
    })
}

/// Merge layers (lowest precedence first) and resolve the final configuration.
///
/// # Errors
///
/// Returns an error when required fields are missing or validation fails.
pub fn resolve<I>(layers: I) -> ConfigResult<DatesortConfig>
where
    I: IntoIterator<Item = ConfigLayer>,
{
    let merged = layers
        .into_iter()
        .fold(ConfigLayer::default(), ConfigLayer::merge);
    DatesortConfig::from_layer(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    type TestResult<T> = anyhow::Result<T>;

    #[test]
    fn legacy_env_reads_log_level() -> TestResult<()> {
        let layer = legacy_env_layer(|name| {
            (name == LEGACY_LOG_LEVEL_ENV).then(|| "warning".to_string())
        })?;
        assert_eq!(layer.log_level, Some(LogLevel::Warning));

        let empty = legacy_env_layer(|_| None)?;
        assert_eq!(empty, ConfigLayer::default());
        Ok(())
    }

    #[test]
    fn legacy_env_rejects_unknown_level() {
        let result = legacy_env_layer(|_| Some("loud".to_string()));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidField {
                field: "log_level",
                ..
            })
        ));
    }

    #[test]
    fn resolve_applies_precedence() -> TestResult<()> {
        let file = ConfigLayer {
            source: Some(PathBuf::from("/file/src")),
            destination: Some(PathBuf::from("/file/dst")),
            quarantine: Some(PathBuf::from("/file/q")),
            max_workers: Some(2),
            log_level: Some(LogLevel::Debug),
            ..ConfigLayer::default()
        };
        let env = ConfigLayer {
            log_level: Some(LogLevel::Error),
            ..ConfigLayer::default()
        };
        let cli = ConfigLayer {
            destination: Some(PathBuf::from("/cli/dst")),
            ..ConfigLayer::default()
        };
        let config = resolve([file, env, cli])?;
        assert_eq!(config.source, PathBuf::from("/file/src"));
        assert_eq!(config.destination, PathBuf::from("/cli/dst"));
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.queue_capacity, 32);
        assert_eq!(config.log_level, LogLevel::Error);
        Ok(())
    }
}
