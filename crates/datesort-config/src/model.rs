//! Typed configuration models.
//!
//! # Design
//! - `ConfigLayer` is a sparse, deserialisable view used for the YAML file, the
//!   environment, and CLI overrides; later layers win field by field.
//! - `DatesortConfig` is the resolved, validated value object handed to the
//!   pipeline. It is never mutated after resolution.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{ConfigError, ConfigResult};
use crate::validate::validate;

/// Operator-facing log level names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LogLevel {
    /// Verbose diagnostics.
    Debug,
    /// Normal operational messages.
    #[default]
    Info,
    /// Recoverable problems.
    Warning,
    /// Failures affecting a single file.
    Error,
    /// Failures requiring operator attention.
    Critical,
}

impl LogLevel {
    /// Render the level using the operator-facing spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }

    /// Map the level to a `tracing` filter directive.
    #[must_use]
    pub const fn filter_directive(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error | Self::Critical => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARNING" | "WARN" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            "CRITICAL" => Ok(Self::Critical),
            _ => Err(ConfigError::invalid("log_level", "unknown_level", value)),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, ConfigError> {
        value.parse()
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        level.as_str().to_string()
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Output style for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStyle {
    /// One JSON object per line.
    Json,
    /// Human-readable multi-line output.
    Pretty,
}

impl FromStr for LogStyle {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            _ => Err(ConfigError::invalid("log_format", "unknown_style", value)),
        }
    }
}

/// Sparse configuration layer; every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    /// Directory watched for new files.
    pub source: Option<PathBuf>,
    /// Root of the date-partitioned destination tree.
    pub destination: Option<PathBuf>,
    /// Holding directory for files that exhausted their retries.
    #[serde(alias = "quarantine_folder")]
    pub quarantine: Option<PathBuf>,
    /// Poll interval in milliseconds.
    pub poll_interval: Option<u64>,
    /// Number of concurrent workers.
    pub max_workers: Option<usize>,
    /// Attempts per file before quarantine.
    pub max_retries: Option<u32>,
    /// Minimum free/total ratio on the destination volume.
    pub min_free_disk_ratio: Option<f64>,
    /// Log level.
    pub log_level: Option<LogLevel>,
    /// Log output style.
    pub log_format: Option<LogStyle>,
    /// Bounded work queue capacity.
    pub queue_capacity: Option<usize>,
    /// First retry delay in milliseconds.
    pub retry_base_delay_ms: Option<u64>,
    /// Maximum retry delay in milliseconds.
    pub retry_max_delay_ms: Option<u64>,
    /// Drain grace period in milliseconds.
    pub shutdown_grace_ms: Option<u64>,
    /// Windowed error rate (percent) that triggers an alert log.
    pub error_rate_alert_percent: Option<f64>,
    /// Rolling metrics window in seconds.
    pub metrics_window_secs: Option<u64>,
    /// Consecutive failed listings before the poller reports a fatal error.
    pub fatal_listing_failures: Option<u32>,
    /// Address for the optional HTTP metrics listener.
    pub metrics_addr: Option<SocketAddr>,
}

impl ConfigLayer {
    /// Overlay `higher` on top of `self`; values present in `higher` win.
    #[must_use]
    pub fn merge(self, higher: Self) -> Self {
        Self {
            source: higher.source.or(self.source),
            destination: higher.destination.or(self.destination),
            quarantine: higher.quarantine.or(self.quarantine),
            poll_interval: higher.poll_interval.or(self.poll_interval),
            max_workers: higher.max_workers.or(self.max_workers),
            max_retries: higher.max_retries.or(self.max_retries),
            min_free_disk_ratio: higher.min_free_disk_ratio.or(self.min_free_disk_ratio),
            log_level: higher.log_level.or(self.log_level),
            log_format: higher.log_format.or(self.log_format),
            queue_capacity: higher.queue_capacity.or(self.queue_capacity),
            retry_base_delay_ms: higher.retry_base_delay_ms.or(self.retry_base_delay_ms),
            retry_max_delay_ms: higher.retry_max_delay_ms.or(self.retry_max_delay_ms),
            shutdown_grace_ms: higher.shutdown_grace_ms.or(self.shutdown_grace_ms),
            error_rate_alert_percent: higher
                .error_rate_alert_percent
                .or(self.error_rate_alert_percent),
            metrics_window_secs: higher.metrics_window_secs.or(self.metrics_window_secs),
            fatal_listing_failures: higher
                .fatal_listing_failures
                .or(self.fatal_listing_failures),
            metrics_addr: higher.metrics_addr.or(self.metrics_addr),
        }
    }
}

/// Resolved, validated configuration for a single run.
#[derive(Debug, Clone, PartialEq)]
pub struct DatesortConfig {
    /// Directory watched for new files.
    pub source: PathBuf,
    /// Root of the date-partitioned destination tree.
    pub destination: PathBuf,
    /// Holding directory for files that exhausted their retries.
    pub quarantine: PathBuf,
    /// Delay between source listings.
    pub poll_interval: Duration,
    /// Number of concurrent workers.
    pub max_workers: usize,
    /// Attempts per file before quarantine.
    pub max_retries: u32,
    /// Minimum free/total ratio on the destination volume.
    pub min_free_disk_ratio: f64,
    /// Log level.
    pub log_level: LogLevel,
    /// Log output style; `None` lets telemetry infer one from the build profile.
    pub log_format: Option<LogStyle>,
    /// Bounded work queue capacity.
    pub queue_capacity: usize,
    /// First retry delay.
    pub retry_base_delay: Duration,
    /// Maximum retry delay.
    pub retry_max_delay: Duration,
    /// Drain grace period after shutdown is requested.
    pub shutdown_grace: Duration,
    /// Windowed error rate (percent) that triggers an alert log.
    pub error_rate_alert_percent: f64,
    /// Rolling metrics window.
    pub metrics_window: Duration,
    /// Consecutive failed listings before the poller reports a fatal error.
    pub fatal_listing_failures: u32,
    /// Address for the optional HTTP metrics listener.
    pub metrics_addr: Option<SocketAddr>,
}

impl DatesortConfig {
    /// Build a config from the three required paths, using defaults elsewhere.
    ///
    /// # Errors
    ///
    /// Returns an error when the paths violate the configuration invariants.
    pub fn with_paths(
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        quarantine: impl Into<PathBuf>,
    ) -> ConfigResult<Self> {
        Self::from_layer(ConfigLayer {
            source: Some(source.into()),
            destination: Some(destination.into()),
            quarantine: Some(quarantine.into()),
            ..ConfigLayer::default()
        })
    }

    /// Apply defaults to a merged layer and validate the result.
    ///
    /// # Errors
    ///
    /// Returns an error when a required path is missing or a value is out of range.
    pub fn from_layer(layer: ConfigLayer) -> ConfigResult<Self> {
        let max_workers = layer.max_workers.unwrap_or(defaults::MAX_WORKERS);
        let config = Self {
            source: layer
                .source
                .ok_or(ConfigError::MissingField { field: "source" })?,
            destination: layer.destination.ok_or(ConfigError::MissingField {
                field: "destination",
            })?,
            quarantine: layer.quarantine.ok_or(ConfigError::MissingField {
                field: "quarantine_folder",
            })?,
            poll_interval: Duration::from_millis(
                layer.poll_interval.unwrap_or(defaults::POLL_INTERVAL_MS),
            ),
            max_workers,
            max_retries: layer.max_retries.unwrap_or(defaults::MAX_RETRIES),
            min_free_disk_ratio: layer
                .min_free_disk_ratio
                .unwrap_or(defaults::MIN_FREE_DISK_RATIO),
            log_level: layer.log_level.unwrap_or_default(),
            log_format: layer.log_format,
            queue_capacity: layer
                .queue_capacity
                .unwrap_or_else(|| max_workers.saturating_mul(defaults::QUEUE_SLOTS_PER_WORKER)),
            retry_base_delay: Duration::from_millis(
                layer
                    .retry_base_delay_ms
                    .unwrap_or(defaults::RETRY_BASE_DELAY_MS),
            ),
            retry_max_delay: Duration::from_millis(
                layer
                    .retry_max_delay_ms
                    .unwrap_or(defaults::RETRY_MAX_DELAY_MS),
            ),
            shutdown_grace: Duration::from_millis(
                layer.shutdown_grace_ms.unwrap_or(defaults::SHUTDOWN_GRACE_MS),
            ),
            error_rate_alert_percent: layer
                .error_rate_alert_percent
                .unwrap_or(defaults::ERROR_RATE_ALERT_PERCENT),
            metrics_window: Duration::from_secs(
                layer
                    .metrics_window_secs
                    .unwrap_or(defaults::METRICS_WINDOW_SECS),
            ),
            fatal_listing_failures: layer
                .fatal_listing_failures
                .unwrap_or(defaults::FATAL_LISTING_FAILURES),
            metrics_addr: layer.metrics_addr,
        };
        validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult<T> = anyhow::Result<T>;

    #[test]
    fn log_level_parses_operator_spellings() -> TestResult<()> {
        assert_eq!("debug".parse::<LogLevel>()?, LogLevel::Debug);
        assert_eq!("WARNING".parse::<LogLevel>()?, LogLevel::Warning);
        assert_eq!(" Critical ".parse::<LogLevel>()?, LogLevel::Critical);
        assert!("verbose".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::Critical.filter_directive(), "error");
        assert_eq!(LogLevel::Warning.filter_directive(), "warn");
        assert_eq!(LogLevel::Info.to_string(), "INFO");
        Ok(())
    }

    #[test]
    fn log_level_converts_from_owned_strings() -> TestResult<()> {
        assert_eq!(LogLevel::try_from("error".to_string())?, LogLevel::Error);
        assert!(LogLevel::try_from("loud".to_string()).is_err());
        let level: LogLevel = serde_yaml::from_str("WARN")?;
        assert_eq!(level, LogLevel::Warning);
        assert_eq!(serde_yaml::to_string(&LogLevel::Critical)?.trim(), "CRITICAL");
        Ok(())
    }

    #[test]
    fn merge_prefers_higher_layer() {
        let low = ConfigLayer {
            source: Some(PathBuf::from("/low/src")),
            max_workers: Some(2),
            poll_interval: Some(1_000),
            ..ConfigLayer::default()
        };
        let high = ConfigLayer {
            max_workers: Some(8),
            ..ConfigLayer::default()
        };
        let merged = low.merge(high);
        assert_eq!(merged.source, Some(PathBuf::from("/low/src")));
        assert_eq!(merged.max_workers, Some(8));
        assert_eq!(merged.poll_interval, Some(1_000));
    }

    #[test]
    fn with_paths_applies_defaults() -> TestResult<()> {
        let config = DatesortConfig::with_paths("/data/in", "/data/out", "/data/quarantine")?;
        assert_eq!(config.poll_interval, Duration::from_millis(5_000));
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.max_retries, 3);
        assert!((config.min_free_disk_ratio - 0.10).abs() < f64::EPSILON);
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.metrics_addr.is_none());
        Ok(())
    }

    #[test]
    fn from_layer_reports_missing_paths() {
        let err = DatesortConfig::from_layer(ConfigLayer {
            source: Some(PathBuf::from("/data/in")),
            destination: Some(PathBuf::from("/data/out")),
            ..ConfigLayer::default()
        })
        .err();
        assert!(matches!(
            err,
            Some(ConfigError::MissingField {
                field: "quarantine_folder"
            })
        ));
    }
}
