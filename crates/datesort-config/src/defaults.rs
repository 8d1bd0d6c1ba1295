//! Built-in defaults applied when no layer provides a value.
//!
//! # Design
//! - Keep every default in one place so the CLI help, YAML docs, and resolver agree.
//! - Durations are stored in the unit operators write them in (milliseconds or seconds).

/// Poll interval between source listings, in milliseconds.
pub const POLL_INTERVAL_MS: u64 = 5_000;
/// Number of concurrent move workers.
pub const MAX_WORKERS: usize = 4;
/// Attempts allowed per file before it is quarantined.
pub const MAX_RETRIES: u32 = 3;
/// Minimum free/total ratio required on the destination volume.
pub const MIN_FREE_DISK_RATIO: f64 = 0.10;
/// Work queue slots reserved per worker when no explicit capacity is set.
pub const QUEUE_SLOTS_PER_WORKER: usize = 16;
/// First retry delay, in milliseconds; doubled for every further attempt.
pub const RETRY_BASE_DELAY_MS: u64 = 2_000;
/// Upper bound for a single retry delay, in milliseconds.
pub const RETRY_MAX_DELAY_MS: u64 = 60_000;
/// Time allowed for queued work to drain after shutdown, in milliseconds.
pub const SHUTDOWN_GRACE_MS: u64 = 30_000;
/// Windowed error rate (percent) above which a high-error-rate warning is logged.
pub const ERROR_RATE_ALERT_PERCENT: f64 = 5.0;
/// Width of the rolling metrics window, in seconds.
pub const METRICS_WINDOW_SECS: u64 = 3_600;
/// Consecutive unreadable source listings tolerated before the poller gives up.
pub const FATAL_LISTING_FAILURES: u32 = 3;
