//! Daemon boot sequence.
//!
//! # Design
//! - Configuration resolves from the YAML file, the legacy `LOG_LEVEL`
//!   variable, then CLI flags (which carry `DATESORT_*` variables).
//! - Logging is installed before anything else that can log.
//! - SIGINT and SIGTERM request a graceful drain; the HTTP listener, when
//!   enabled, stops on the same signal.

use datesort_config::{DatesortConfig, LogStyle, legacy_env_layer, load_file, resolve};
use datesort_events::EventBus;
use datesort_fsops::DiskSpaceGuard;
use datesort_pipeline::{Pipeline, PipelineReport, ShutdownHandle};
use datesort_telemetry::{GlobalContextGuard, LogFormat, LoggingConfig, Metrics};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cli::Cli;
use crate::error::{AppError, AppResult};
use crate::http::{self, MetricsState};

/// Parse the command line and run the daemon until it is stopped.
///
/// # Errors
///
/// Returns an error if configuration or logging setup fails, or if the
/// pipeline stops because the source directory became unavailable.
pub async fn run_app() -> AppResult<()> {
    let cli = <Cli as clap::Parser>::parse();
    let config = load_config(&cli, |key| std::env::var(key).ok())?;
    init_telemetry(&config)?;
    let _context = GlobalContextGuard::new("daemon");
    let report = run_with(config, DiskSpaceGuard::statvfs(), spawn_signal_listener).await?;
    info!(
        dropped_at_shutdown = report.dropped_at_shutdown,
        "datesort stopped"
    );
    Ok(())
}

/// Resolve the configuration layers for `cli`.
///
/// # Errors
///
/// Returns an error if the config file cannot be read or the merged values are invalid.
pub fn load_config<F>(cli: &Cli, lookup: F) -> AppResult<DatesortConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let file = cli
        .config
        .as_deref()
        .map(load_file)
        .transpose()
        .map_err(|err| AppError::config("config.load_file", err))?
        .unwrap_or_default();
    let env = legacy_env_layer(lookup).map_err(|err| AppError::config("config.env", err))?;
    resolve([file, env, cli.layer()]).map_err(|err| AppError::config("config.resolve", err))
}

fn init_telemetry(config: &DatesortConfig) -> AppResult<()> {
    let format = match config.log_format {
        Some(LogStyle::Json) => LogFormat::Json,
        Some(LogStyle::Pretty) => LogFormat::Pretty,
        None => LogFormat::infer(),
    };
    datesort_telemetry::init_logging(&LoggingConfig {
        level: config.log_level.filter_directive(),
        format,
        build_sha: option_env!("DATESORT_BUILD_SHA").unwrap_or("dev"),
    })
    .map_err(|err| AppError::telemetry("telemetry.init", err))
}

/// Run the pipeline with injected services.
///
/// `signals` receives the shutdown handle and returns a task that requests
/// shutdown when the process is told to stop; it is aborted once the pipeline
/// has drained.
///
/// # Errors
///
/// Returns an error if metrics cannot be created, the metrics listener cannot
/// bind, or the pipeline fails.
pub async fn run_with<S>(
    config: DatesortConfig,
    guard: DiskSpaceGuard,
    signals: S,
) -> AppResult<PipelineReport>
where
    S: FnOnce(ShutdownHandle) -> JoinHandle<()>,
{
    let metrics = Metrics::new(config.metrics_window)
        .map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
    let events = EventBus::new();
    log_startup(&config);

    let listener = match config.metrics_addr {
        Some(addr) => {
            let listener = http::bind(addr).await.inspect_err(|err| {
                error!(error = %err, addr = %addr, "metrics listener could not bind");
            })?;
            Some((listener, addr))
        }
        None => None,
    };
    let pipeline = Pipeline::new(config, guard, metrics.clone(), events.clone())
        .map_err(|err| AppError::pipeline("pipeline.new", err))?;
    let shutdown = pipeline.shutdown_handle();
    let signal_task = signals(shutdown.clone());
    let http_task = listener.map(|(listener, addr)| {
        let state = MetricsState::new(metrics.clone(), events.clone());
        let shutdown = shutdown.clone();
        tokio::spawn(async move { http::serve(listener, addr, state, shutdown).await })
    });

    let result = pipeline.run().await;

    signal_task.abort();
    shutdown.request_shutdown();
    if let Some(task) = http_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "metrics listener stopped with an error"),
            Err(err) => warn!(error = %err, "metrics listener task failed"),
        }
    }

    result.map_err(|err| {
        error!(error = %err, fatal = err.is_fatal(), "pipeline stopped with an error");
        AppError::pipeline("pipeline.run", err)
    })
}

fn log_startup(config: &DatesortConfig) {
    info!(
        source = %config.source.display(),
        destination = %config.destination.display(),
        quarantine = %config.quarantine.display(),
        poll_interval_ms = u64::try_from(config.poll_interval.as_millis()).unwrap_or(u64::MAX),
        max_workers = config.max_workers,
        max_retries = config.max_retries,
        min_free_disk_ratio = config.min_free_disk_ratio,
        log_level = %config.log_level,
        metrics_addr = ?config.metrics_addr,
        "datesort starting"
    );
    if !config.source.is_dir() {
        warn!(source = %config.source.display(), "source directory is not readable yet");
    }
}

/// Request shutdown on SIGINT or SIGTERM.
#[must_use]
pub fn spawn_signal_listener(shutdown: ShutdownHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.request_shutdown();
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(error = %err, "failed to install SIGTERM handler; only SIGINT will stop the daemon");
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for SIGINT");
            }
            return;
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                warn!(error = %err, "failed to listen for SIGINT");
            }
            info!(signal = "SIGINT", "stop signal received");
        }
        _ = terminate.recv() => {
            info!(signal = "SIGTERM", "stop signal received");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use datesort_config::LogLevel;
    use std::fs;
    use std::path::Path;

    type TestResult<T> = anyhow::Result<T>;

    #[test]
    fn cli_flags_override_file_and_legacy_env() -> TestResult<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("datesort.yaml");
        fs::write(
            &file,
            "source: /from-file/inbox\ndestination: /from-file/archive\nquarantine: /from-file/quarantine\nmax_workers: 2\nlog_level: ERROR\n",
        )?;
        let file_arg = file.display().to_string();
        let cli = Cli::try_parse_from(["datesort", "--config", file_arg.as_str(), "--max-workers", "6"])?;

        let config = load_config(&cli, |key| (key == "LOG_LEVEL").then(|| "debug".to_string()))?;
        assert_eq!(config.source, Path::new("/from-file/inbox"));
        assert_eq!(config.max_workers, 6);
        assert_eq!(config.log_level, LogLevel::Debug);
        Ok(())
    }

    #[test]
    fn missing_paths_are_reported() {
        let cli = Cli::default();
        let result = load_config(&cli, |_| None);
        assert!(matches!(result, Err(AppError::Config { operation: "config.resolve", .. })));
    }

    #[test]
    fn unreadable_config_file_is_reported() {
        let cli = Cli {
            config: Some("/nonexistent/datesort.yaml".into()),
            ..Cli::default()
        };
        let result = load_config(&cli, |_| None);
        assert!(matches!(result, Err(AppError::Config { operation: "config.load_file", .. })));
    }
}
