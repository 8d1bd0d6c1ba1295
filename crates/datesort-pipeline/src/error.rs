//! # Design
//!
//! - Per-file failures never surface here; they are contained in worker outcomes.
//! - `SourceUnavailable` is the only fatal condition and is distinguishable so the
//!   binary can exit non-zero for a supervisor to restart it.

use std::path::PathBuf;

use datesort_config::ConfigError;
use datesort_fsops::FsOpsError;
use thiserror::Error;

/// Result alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors that stop the pipeline as a whole.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The source directory could not be listed for too many consecutive cycles.
    #[error("pipeline source directory unavailable")]
    SourceUnavailable {
        /// Source directory being polled.
        path: PathBuf,
        /// Consecutive failed listings.
        failures: u32,
        /// Last listing failure.
        source: walkdir::Error,
    },
    /// A background task could not be joined.
    #[error("pipeline task failed")]
    Join {
        /// Task that failed.
        operation: &'static str,
        /// Underlying join error.
        source: tokio::task::JoinError,
    },
    /// The configuration handed to the pipeline breaks an invariant.
    #[error("pipeline configuration invalid")]
    Config {
        /// Violated invariant.
        source: ConfigError,
    },
    /// Building the pipeline components failed.
    #[error("pipeline setup failed")]
    Setup {
        /// Underlying filesystem component error.
        source: FsOpsError,
    },
}

impl PipelineError {
    /// Whether this error should terminate the process with a failure status.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::SourceUnavailable { .. })
    }
}
