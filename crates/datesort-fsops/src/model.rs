//! Domain models for move attempts.
//!
//! # Design
//! - Keep request types lightweight and copyable.
//! - Outcomes carry owned data so they can cross task boundaries.

use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::FsOpsError;

/// Calendar date a file is filed under. Recomputed on every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassifiedDestination {
    /// Four-digit year.
    pub year: i32,
    /// Month in `1..=12`.
    pub month: u32,
    /// Day in `1..=31`; not checked against the month length.
    pub day: u32,
}

impl ClassifiedDestination {
    /// Relative directory `YYYY/MM/DD` under the destination root.
    #[must_use]
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(format!("{:04}", self.year))
            .join(format!("{:02}", self.month))
            .join(format!("{:02}", self.day))
    }
}

impl Display for ClassifiedDestination {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{:04}/{:02}/{:02}",
            self.year, self.month, self.day
        )
    }
}

/// Immutable inputs for a single processing attempt.
#[derive(Debug, Copy, Clone)]
pub struct MoveRequest<'a> {
    /// Source file to relocate.
    pub source: &'a Path,
    /// Attempts already made for this file (starts at 0).
    pub attempt: u32,
    /// Poll cycles in which this file was previously found unclassifiable.
    pub unclassified_cycles: u32,
    /// Identity of the worker executing the attempt; used in collision suffixes.
    pub worker_id: usize,
}

/// Result of one attempt after the retry policy has been applied.
#[derive(Debug)]
pub enum ProcessingOutcome {
    /// The file now lives under the destination tree.
    Success {
        /// Final path of the relocated file.
        destination: PathBuf,
        /// Time spent on the attempt.
        elapsed: Duration,
    },
    /// A transient failure; the item should be re-enqueued after `delay`.
    RetriableFailure {
        /// Failure observed on this attempt.
        error: FsOpsError,
        /// Attempt count the re-enqueued item carries.
        attempt: u32,
        /// Backoff before the item becomes eligible again.
        delay: Duration,
    },
    /// The file cannot be processed and there is nothing to quarantine.
    TerminalFailure {
        /// Failure that ended processing.
        error: FsOpsError,
    },
    /// The file was moved into quarantine.
    Quarantined {
        /// Final path inside the quarantine directory.
        quarantine_path: PathBuf,
        /// Last error that led to quarantine.
        reason: String,
    },
    /// Quarantine was required but the quarantine move failed; the item is dropped.
    QuarantineFailed {
        /// Failure raised by the quarantine move.
        error: FsOpsError,
        /// Reason the file was headed for quarantine.
        reason: String,
    },
    /// No date could be derived; the file stays in place until a later cycle.
    Unclassified {
        /// Consecutive cycles the file has now been unclassifiable.
        cycles: u32,
    },
}

impl ProcessingOutcome {
    /// Whether the item is finished and may leave the in-flight set.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success { .. }
                | Self::TerminalFailure { .. }
                | Self::Quarantined { .. }
                | Self::QuarantineFailed { .. }
        )
    }

    /// Short label for log fields.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::RetriableFailure { .. } => "retriable_failure",
            Self::TerminalFailure { .. } => "terminal_failure",
            Self::Quarantined { .. } => "quarantined",
            Self::QuarantineFailed { .. } => "quarantine_failed",
            Self::Unclassified { .. } => "unclassified",
        }
    }
}
