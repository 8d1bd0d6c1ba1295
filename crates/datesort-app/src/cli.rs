//! Command-line surface.
//!
//! Every option doubles as a `DATESORT_*` environment variable through clap's
//! `env` support; values left unset fall through to the config file and the
//! built-in defaults.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use datesort_config::{ConfigLayer, LogLevel, LogStyle};

/// Date-partitioning file reorganizer daemon.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "datesort", version, about)]
pub struct Cli {
    /// Directory watched for incoming files.
    #[arg(env = "DATESORT_SOURCE")]
    pub source: Option<PathBuf>,
    /// Root of the `YYYY/MM/DD` destination tree.
    #[arg(env = "DATESORT_DESTINATION")]
    pub destination: Option<PathBuf>,
    /// Directory receiving files that could not be placed.
    #[arg(env = "DATESORT_QUARANTINE_FOLDER")]
    pub quarantine_folder: Option<PathBuf>,
    /// YAML configuration file.
    #[arg(long, env = "DATESORT_CONFIG")]
    pub config: Option<PathBuf>,
    /// Milliseconds between source listings.
    #[arg(long, alias = "poll_interval", env = "DATESORT_POLL_INTERVAL")]
    pub poll_interval: Option<u64>,
    /// Concurrent workers.
    #[arg(long, alias = "max_workers", env = "DATESORT_MAX_WORKERS")]
    pub max_workers: Option<usize>,
    /// Attempts per file before quarantine.
    #[arg(long, alias = "max_retries", env = "DATESORT_MAX_RETRIES")]
    pub max_retries: Option<u32>,
    /// Minimum free/total ratio on the destination volume.
    #[arg(long, alias = "min_free_disk_ratio", env = "DATESORT_MIN_FREE_DISK_RATIO")]
    pub min_free_disk_ratio: Option<f64>,
    /// DEBUG, INFO, WARNING, ERROR or CRITICAL.
    #[arg(long, alias = "log_level", env = "DATESORT_LOG_LEVEL", value_parser = parse_log_level)]
    pub log_level: Option<LogLevel>,
    /// `json` or `pretty`.
    #[arg(long, env = "DATESORT_LOG_FORMAT", value_parser = parse_log_style)]
    pub log_format: Option<LogStyle>,
    /// Work queue capacity.
    #[arg(long, env = "DATESORT_QUEUE_CAPACITY")]
    pub queue_capacity: Option<usize>,
    /// First retry delay in milliseconds.
    #[arg(long, env = "DATESORT_RETRY_BASE_DELAY_MS")]
    pub retry_base_delay_ms: Option<u64>,
    /// Retry delay ceiling in milliseconds.
    #[arg(long, env = "DATESORT_RETRY_MAX_DELAY_MS")]
    pub retry_max_delay_ms: Option<u64>,
    /// Drain grace period in milliseconds.
    #[arg(long, env = "DATESORT_SHUTDOWN_GRACE_MS")]
    pub shutdown_grace_ms: Option<u64>,
    /// Windowed error rate (percent) that triggers a warning.
    #[arg(long, env = "DATESORT_ERROR_RATE_ALERT_PERCENT")]
    pub error_rate_alert_percent: Option<f64>,
    /// Rolling metrics window in seconds.
    #[arg(long, env = "DATESORT_METRICS_WINDOW_SECS")]
    pub metrics_window_secs: Option<u64>,
    /// Consecutive failed listings before the daemon exits.
    #[arg(long, env = "DATESORT_FATAL_LISTING_FAILURES")]
    pub fatal_listing_failures: Option<u32>,
    /// Serve `/metrics`, `/metrics/snapshot`, `/events` and `/health` on this address.
    #[arg(long, env = "DATESORT_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

impl Cli {
    /// Highest-precedence configuration layer built from flags and `DATESORT_*` variables.
    #[must_use]
    pub fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            source: self.source.clone(),
            destination: self.destination.clone(),
            quarantine: self.quarantine_folder.clone(),
            poll_interval: self.poll_interval,
            max_workers: self.max_workers,
            max_retries: self.max_retries,
            min_free_disk_ratio: self.min_free_disk_ratio,
            log_level: self.log_level,
            log_format: self.log_format,
            queue_capacity: self.queue_capacity,
            retry_base_delay_ms: self.retry_base_delay_ms,
            retry_max_delay_ms: self.retry_max_delay_ms,
            shutdown_grace_ms: self.shutdown_grace_ms,
            error_rate_alert_percent: self.error_rate_alert_percent,
            metrics_window_secs: self.metrics_window_secs,
            fatal_listing_failures: self.fatal_listing_failures,
            metrics_addr: self.metrics_addr,
        }
    }
}

fn parse_log_level(value: &str) -> Result<LogLevel, String> {
    value
        .parse()
        .map_err(|_| format!("unknown log level `{value}`"))
}

fn parse_log_style(value: &str) -> Result<LogStyle, String> {
    value
        .parse()
        .map_err(|_| format!("unknown log format `{value}`; expected json or pretty"))
}
