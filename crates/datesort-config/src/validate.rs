//! Validation helpers for resolved configuration values.

use std::path::Path;

use crate::error::{ConfigError, ConfigResult};
use crate::model::DatesortConfig;

/// Check every invariant of a resolved configuration.
///
/// # Errors
///
/// Returns the first violated invariant as [`ConfigError::InvalidField`].
pub fn validate(config: &DatesortConfig) -> ConfigResult<()> {
    ensure_path("source", &config.source)?;
    ensure_path("destination", &config.destination)?;
    ensure_path("quarantine_folder", &config.quarantine)?;

    if config.source == config.destination {
        return Err(ConfigError::invalid(
            "destination",
            "same_as_source",
            config.destination.display(),
        ));
    }
    if config.source == config.quarantine {
        return Err(ConfigError::invalid(
            "quarantine_folder",
            "same_as_source",
            config.quarantine.display(),
        ));
    }
    if config.poll_interval.is_zero() {
        return Err(ConfigError::invalid("poll_interval", "zero", 0));
    }
    if config.max_workers == 0 {
        return Err(ConfigError::invalid("max_workers", "zero", 0));
    }
    if config.max_retries == 0 {
        return Err(ConfigError::invalid("max_retries", "zero", 0));
    }
    if !(0.0..=1.0).contains(&config.min_free_disk_ratio) {
        return Err(ConfigError::invalid(
            "min_free_disk_ratio",
            "out_of_range",
            config.min_free_disk_ratio,
        ));
    }
    if config.queue_capacity == 0 {
        return Err(ConfigError::invalid("queue_capacity", "zero", 0));
    }
    if config.retry_base_delay > config.retry_max_delay {
        return Err(ConfigError::invalid(
            "retry_base_delay_ms",
            "exceeds_max_delay",
            config.retry_base_delay.as_millis(),
        ));
    }
    if !config.error_rate_alert_percent.is_finite() || config.error_rate_alert_percent < 0.0 {
        return Err(ConfigError::invalid(
            "error_rate_alert_percent",
            "out_of_range",
            config.error_rate_alert_percent,
        ));
    }
    if config.metrics_window.is_zero() {
        return Err(ConfigError::invalid("metrics_window_secs", "zero", 0));
    }
    if config.fatal_listing_failures == 0 {
        return Err(ConfigError::invalid("fatal_listing_failures", "zero", 0));
    }
    Ok(())
}

fn ensure_path(field: &'static str, path: &Path) -> ConfigResult<()> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::InvalidField {
            field,
            reason: "empty",
            value: None,
        });
    }
    Ok(())
}
