//! # Design
//!
//! - Provide structured, constant-message errors for move attempts.
//! - Capture operation context (paths, fields, inputs) to make failures reproducible in tests.
//! - Preserve source errors without interpolating context into error messages.
//! - Classify failures into retriable and terminal so callers never inspect IO kinds.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for filesystem operations.
pub type FsOpsResult<T> = Result<T, FsOpsError>;

/// Errors produced while classifying, admitting, or relocating a file.
#[derive(Debug, Error)]
pub enum FsOpsError {
    /// IO failures while interacting with the filesystem.
    #[error("fsops io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The source file no longer exists.
    #[error("fsops source missing")]
    SourceMissing {
        /// Source path that vanished.
        path: PathBuf,
    },
    /// Neither the filename nor the modification time yielded a date.
    #[error("fsops unclassifiable file")]
    Unclassifiable {
        /// Source path that could not be classified.
        path: PathBuf,
    },
    /// The destination volume is below the free-space threshold.
    #[error("fsops insufficient disk space")]
    InsufficientSpace {
        /// Path whose volume was checked.
        path: PathBuf,
        /// Observed free ratio when the probe succeeded.
        free_ratio: Option<f64>,
        /// Required minimum free ratio.
        min_free_ratio: f64,
    },
    /// Input validation failures.
    #[error("fsops invalid input")]
    InvalidInput {
        /// Field that failed validation.
        field: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// Every disambiguated name for a target was already taken.
    #[error("fsops collision names exhausted")]
    CollisionsExhausted {
        /// Directory in which placement was attempted.
        directory: PathBuf,
        /// Number of candidate names tried.
        attempts: u32,
    },
    /// Statfs-style probe failures.
    #[error("fsops nix failure")]
    Nix {
        /// Operation that triggered the nix failure.
        operation: &'static str,
        /// Path involved in the nix failure.
        path: PathBuf,
        /// Underlying nix error.
        source: nix::Error,
    },
}

impl FsOpsError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Whether another attempt at the same file may succeed.
    ///
    /// A vanished source and an unclassifiable name are handled outside the
    /// retry chain; everything else is treated as transient.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        !matches!(
            self,
            Self::SourceMissing { .. } | Self::Unclassifiable { .. }
        )
    }

    /// Human-readable detail used as a quarantine reason and in events.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Io {
                operation, source, ..
            } => format!("{operation}: {source}"),
            Self::SourceMissing { .. } => "source missing".to_string(),
            Self::Unclassifiable { .. } => "unclassifiable".to_string(),
            Self::InsufficientSpace {
                free_ratio,
                min_free_ratio,
                ..
            } => free_ratio.map_or_else(
                || format!("disk space unknown (required {min_free_ratio:.4})"),
                |ratio| format!("disk space {ratio:.4} below {min_free_ratio:.4}"),
            ),
            Self::InvalidInput { field, reason, .. } => format!("invalid {field}: {reason}"),
            Self::CollisionsExhausted { attempts, .. } => {
                format!("no free name after {attempts} attempts")
            }
            Self::Nix {
                operation, source, ..
            } => format!("{operation}: {source}"),
        }
    }
}
