//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Counters are monotonic for the life of the process; rolling figures
//!   (average latency, error rate, throughput) come from a bounded outcome window.
//! - One `Metrics` value is shared by cloning; clones observe the same registry.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use serde::Serialize;

use crate::error::{TelemetryError, TelemetryResult};

const MOVE_DURATION: &str = "datesort_move_duration_seconds";
const MOVE_DURATION_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0];

/// Prometheus-backed metrics registry shared by the poller and workers.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    processed_total: IntCounter,
    moved_total: IntCounter,
    failed_total: IntCounter,
    quarantined_total: IntCounter,
    quarantine_failures_total: IntCounter,
    retries_scheduled_total: IntCounter,
    admission_skips_total: IntCounter,
    enqueue_deferred_total: IntCounter,
    dropped_at_shutdown_total: IntCounter,
    unclassifiable_total: IntCounter,
    queue_depth: IntGauge,
    in_flight: IntGauge,
    move_duration: Histogram,
    window: Mutex<OutcomeWindow>,
}

/// Point-in-time view of pipeline counters and rolling aggregates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Items that reached a terminal outcome.
    pub processed_total: u64,
    /// Items moved into the destination tree.
    pub success_total: u64,
    /// Terminal outcomes other than success.
    pub failure_total: u64,
    /// Items moved into quarantine.
    pub quarantined_total: u64,
    /// Items dropped because the quarantine move itself failed.
    pub quarantine_failures_total: u64,
    /// Retries scheduled after a retriable failure.
    pub retries_scheduled_total: u64,
    /// Poll cycles skipped by disk-space admission control.
    pub admission_skips_total: u64,
    /// Stable files deferred because the queue was saturated.
    pub enqueue_deferred_total: u64,
    /// Items still queued or waiting on a retry timer when shutdown completed.
    pub dropped_at_shutdown_total: u64,
    /// Poll-cycle observations of files that could not be classified.
    pub unclassifiable_total: u64,
    /// Items currently waiting in the work queue.
    pub queue_depth: i64,
    /// Source paths currently enqueued or being processed.
    pub in_flight: i64,
    /// Cumulative time spent on successful moves, in milliseconds.
    pub sum_latency_ms: f64,
    /// Average successful move latency over the rolling window, in milliseconds.
    pub average_latency_ms: f64,
    /// Failures as a percentage of terminal outcomes over the rolling window.
    pub error_rate_percent: f64,
    /// Terminal outcomes per minute over the rolling window.
    pub throughput_per_minute: f64,
    /// Terminal outcomes currently inside the rolling window.
    pub window_processed: u64,
}

impl Metrics {
    /// Construct a registry whose rolling aggregates cover `window`.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// created or registered.
    pub fn new(window: Duration) -> TelemetryResult<Self> {
        let registry = Registry::new();

        let processed_total = counter(
            &registry,
            "datesort_files_processed_total",
            "Files that reached a terminal outcome",
        )?;
        let moved_total = counter(
            &registry,
            "datesort_files_moved_total",
            "Files moved into the destination tree",
        )?;
        let failed_total = counter(
            &registry,
            "datesort_files_failed_total",
            "Terminal outcomes other than a successful move",
        )?;
        let quarantined_total = counter(
            &registry,
            "datesort_files_quarantined_total",
            "Files moved into quarantine",
        )?;
        let quarantine_failures_total = counter(
            &registry,
            "datesort_quarantine_failures_total",
            "Files dropped because the quarantine move failed",
        )?;
        let retries_scheduled_total = counter(
            &registry,
            "datesort_retries_scheduled_total",
            "Retries scheduled after a retriable failure",
        )?;
        let admission_skips_total = counter(
            &registry,
            "datesort_admission_skips_total",
            "Poll cycles skipped for insufficient destination space",
        )?;
        let enqueue_deferred_total = counter(
            &registry,
            "datesort_enqueue_deferred_total",
            "Stable files deferred because the work queue was full",
        )?;
        let dropped_at_shutdown_total = counter(
            &registry,
            "datesort_dropped_at_shutdown_total",
            "Work items abandoned when shutdown completed",
        )?;
        let unclassifiable_total = counter(
            &registry,
            "datesort_unclassifiable_total",
            "Observations of files without a usable date",
        )?;
        let queue_depth = gauge(&registry, "datesort_queue_depth", "Work items waiting in the queue")?;
        let in_flight = gauge(
            &registry,
            "datesort_in_flight",
            "Source paths enqueued or being processed",
        )?;

        let move_duration = Histogram::with_opts(
            HistogramOpts::new(
                MOVE_DURATION,
                "Time taken by successful move attempts",
            )
            .buckets(MOVE_DURATION_BUCKETS.to_vec()),
        )
        .map_err(|source| TelemetryError::metric(MOVE_DURATION, "create", source))?;
        registry
            .register(Box::new(move_duration.clone()))
            .map_err(|source| TelemetryError::metric(MOVE_DURATION, "register", source))?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                processed_total,
                moved_total,
                failed_total,
                quarantined_total,
                quarantine_failures_total,
                retries_scheduled_total,
                admission_skips_total,
                enqueue_deferred_total,
                dropped_at_shutdown_total,
                unclassifiable_total,
                queue_depth,
                in_flight,
                move_duration,
                window: Mutex::new(OutcomeWindow::new(window, Instant::now())),
            }),
        })
    }

    /// Record a file moved into the destination tree.
    pub fn record_success(&self, elapsed: Duration) {
        self.inner.processed_total.inc();
        self.inner.moved_total.inc();
        self.inner.move_duration.observe(elapsed.as_secs_f64());
        self.push_outcome(Some(elapsed));
    }

    /// Record a source file that disappeared before it could be moved.
    pub fn record_source_vanished(&self) {
        self.record_failure();
    }

    /// Record a file moved into quarantine.
    pub fn record_quarantined(&self) {
        self.inner.quarantined_total.inc();
        self.record_failure();
    }

    /// Record a file dropped because its quarantine move failed.
    pub fn record_quarantine_failure(&self) {
        self.inner.quarantine_failures_total.inc();
        self.record_failure();
    }

    /// Record a retry scheduled for a later attempt.
    pub fn record_retry_scheduled(&self) {
        self.inner.retries_scheduled_total.inc();
    }

    /// Record one observation of a file that could not be classified.
    pub fn record_unclassifiable(&self) {
        self.inner.unclassifiable_total.inc();
    }

    /// Record a poll cycle skipped by admission control.
    pub fn record_admission_skip(&self) {
        self.inner.admission_skips_total.inc();
    }

    /// Record stable files left for the next cycle because the queue was full.
    pub fn record_enqueue_deferred(&self, count: usize) {
        self.inner
            .enqueue_deferred_total
            .inc_by(u64::try_from(count).unwrap_or(u64::MAX));
    }

    /// Record a work item abandoned at shutdown.
    pub fn record_dropped_at_shutdown(&self) {
        self.inner.dropped_at_shutdown_total.inc();
    }

    /// Set the queue depth gauge.
    pub fn set_queue_depth(&self, depth: usize) {
        self.inner.queue_depth.set(gauge_value(depth));
    }

    /// Set the in-flight gauge.
    pub fn set_in_flight(&self, count: usize) {
        self.inner.in_flight.set(gauge_value(count));
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::Exposition { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::ExpositionUtf8 { source })
    }

    /// Take a point-in-time snapshot of counters and rolling aggregates.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let rolling = self.lock_window().aggregate(Instant::now());
        let inner = &self.inner;
        MetricsSnapshot {
            processed_total: inner.processed_total.get(),
            success_total: inner.moved_total.get(),
            failure_total: inner.failed_total.get(),
            quarantined_total: inner.quarantined_total.get(),
            quarantine_failures_total: inner.quarantine_failures_total.get(),
            retries_scheduled_total: inner.retries_scheduled_total.get(),
            admission_skips_total: inner.admission_skips_total.get(),
            enqueue_deferred_total: inner.enqueue_deferred_total.get(),
            dropped_at_shutdown_total: inner.dropped_at_shutdown_total.get(),
            unclassifiable_total: inner.unclassifiable_total.get(),
            queue_depth: inner.queue_depth.get(),
            in_flight: inner.in_flight.get(),
            sum_latency_ms: inner.move_duration.get_sample_sum() * 1_000.0,
            average_latency_ms: rolling.average_latency_ms,
            error_rate_percent: rolling.error_rate_percent,
            throughput_per_minute: rolling.throughput_per_minute,
            window_processed: rolling.processed,
        }
    }

    fn record_failure(&self) {
        self.inner.processed_total.inc();
        self.inner.failed_total.inc();
        self.push_outcome(None);
    }

    fn push_outcome(&self, latency: Option<Duration>) {
        self.lock_window().push(Instant::now(), latency);
    }

    fn lock_window(&self) -> std::sync::MutexGuard<'_, OutcomeWindow> {
        self.inner
            .window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn counter(registry: &Registry, name: &'static str, help: &str) -> TelemetryResult<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::metric(name, "create", source))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|source| TelemetryError::metric(name, "register", source))?;
    Ok(counter)
}

fn gauge(registry: &Registry, name: &'static str, help: &str) -> TelemetryResult<IntGauge> {
    let gauge = IntGauge::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::metric(name, "create", source))?;
    registry
        .register(Box::new(gauge.clone()))
        .map_err(|source| TelemetryError::metric(name, "register", source))?;
    Ok(gauge)
}

fn gauge_value(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Terminal outcomes observed within the trailing window.
struct OutcomeWindow {
    span: Duration,
    started: Instant,
    entries: VecDeque<WindowEntry>,
}

struct WindowEntry {
    at: Instant,
    // `None` marks a failure.
    latency: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct RollingAggregate {
    processed: u64,
    average_latency_ms: f64,
    error_rate_percent: f64,
    throughput_per_minute: f64,
}

impl OutcomeWindow {
    const fn new(span: Duration, started: Instant) -> Self {
        Self {
            span,
            started,
            entries: VecDeque::new(),
        }
    }

    fn push(&mut self, at: Instant, latency: Option<Duration>) {
        self.evict(at);
        self.entries.push_back(WindowEntry { at, latency });
    }

    fn evict(&mut self, now: Instant) {
        while let Some(front) = self.entries.front() {
            if now.saturating_duration_since(front.at) <= self.span {
                break;
            }
            self.entries.pop_front();
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn aggregate(&mut self, now: Instant) -> RollingAggregate {
        self.evict(now);
        let processed = self.entries.len();
        let (successes, latency) = self
            .entries
            .iter()
            .filter_map(|entry| entry.latency)
            .fold((0_usize, Duration::ZERO), |(count, sum), latency| {
                (count + 1, sum + latency)
            });
        let failures = processed - successes;

        let average_latency_ms = if successes == 0 {
            0.0
        } else {
            latency.as_secs_f64() * 1_000.0 / successes as f64
        };
        let error_rate_percent = if processed == 0 {
            0.0
        } else {
            failures as f64 / processed as f64 * 100.0
        };
        let observed = now.saturating_duration_since(self.started).min(self.span);
        let throughput_per_minute = if observed.is_zero() {
            0.0
        } else {
            processed as f64 / observed.as_secs_f64() * 60.0
        };

        RollingAggregate {
            processed: u64::try_from(processed).unwrap_or(u64::MAX),
            average_latency_ms,
            error_rate_percent,
            throughput_per_minute,
        }
    }
}
