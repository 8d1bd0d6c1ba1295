//! Free-space admission control for the destination volume.
//!
//! # Design
//! - Probing is behind [`SpaceProbe`] so tests can pin the observed ratio.
//! - The guard fails closed: a probe error counts as insufficient space.
//! - The ratio comparison is inclusive (`free / total >= min`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::sys::statvfs::statvfs;
use tracing::warn;

use crate::error::{FsOpsError, FsOpsResult};

pub use nix::Error as NixError;

/// Free and total capacity of a filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceUsage {
    /// Bytes available to unprivileged writers.
    pub free_bytes: u64,
    /// Total size of the filesystem in bytes.
    pub total_bytes: u64,
}

impl SpaceUsage {
    /// Fraction of the filesystem that is free, or `None` for an empty filesystem.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn free_ratio(&self) -> Option<f64> {
        (self.total_bytes > 0).then(|| self.free_bytes as f64 / self.total_bytes as f64)
    }

    /// Whether the free ratio meets `min_free_ratio`.
    #[must_use]
    pub fn admits(&self, min_free_ratio: f64) -> bool {
        self.free_ratio()
            .is_some_and(|ratio| ratio >= min_free_ratio)
    }
}

/// Source of filesystem capacity figures.
pub trait SpaceProbe: Send + Sync {
    /// Report capacity of the filesystem containing `path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the filesystem cannot be queried.
    fn usage(&self, path: &Path) -> FsOpsResult<SpaceUsage>;
}

/// Probe backed by `statvfs(3)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatvfsProbe;

impl SpaceProbe for StatvfsProbe {
    #[allow(clippy::useless_conversion)]
    fn usage(&self, path: &Path) -> FsOpsResult<SpaceUsage> {
        // The destination tree may not exist yet; its nearest ancestor shares the volume.
        let target = existing_ancestor(path);
        let stats = statvfs(&target).map_err(|source| FsOpsError::Nix {
            operation: "space.statvfs",
            path: target.clone(),
            source,
        })?;
        let fragment = u64::from(stats.fragment_size());
        Ok(SpaceUsage {
            free_bytes: u64::from(stats.blocks_available()).saturating_mul(fragment),
            total_bytes: u64::from(stats.blocks()).saturating_mul(fragment),
        })
    }
}

fn existing_ancestor(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|candidate| !candidate.as_os_str().is_empty() && candidate.exists())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpaceVerdict {
    /// Whether work may proceed.
    pub admitted: bool,
    /// Observed free ratio; `None` when the probe failed.
    pub free_ratio: Option<f64>,
}

/// Admission-control check shared by the poller and workers.
#[derive(Clone)]
pub struct DiskSpaceGuard {
    probe: Arc<dyn SpaceProbe>,
}

impl DiskSpaceGuard {
    /// Build a guard around the given probe.
    #[must_use]
    pub fn new(probe: Arc<dyn SpaceProbe>) -> Self {
        Self { probe }
    }

    /// Guard backed by the real filesystem.
    #[must_use]
    pub fn statvfs() -> Self {
        Self::new(Arc::new(StatvfsProbe))
    }

    /// Whether the volume holding `path` has at least `min_free_ratio` free.
    #[must_use]
    pub fn has_sufficient_space(&self, path: &Path, min_free_ratio: f64) -> bool {
        self.evaluate(path, min_free_ratio).admitted
    }

    /// Probe the volume holding `path` and report the verdict with the observed ratio.
    #[must_use]
    pub fn evaluate(&self, path: &Path, min_free_ratio: f64) -> SpaceVerdict {
        match self.probe.usage(path) {
            Ok(usage) => SpaceVerdict {
                admitted: usage.admits(min_free_ratio),
                free_ratio: usage.free_ratio(),
            },
            Err(err) => {
                warn!(path = %path.display(), error = %err.detail(), "disk space probe failed");
                SpaceVerdict {
                    admitted: false,
                    free_ratio: None,
                }
            }
        }
    }

    /// Fail with [`FsOpsError::InsufficientSpace`] unless the volume is admitted.
    ///
    /// # Errors
    ///
    /// Returns an error when the free ratio is below the threshold or unknown.
    pub fn ensure(&self, path: &Path, min_free_ratio: f64) -> FsOpsResult<()> {
        let verdict = self.evaluate(path, min_free_ratio);
        if verdict.admitted {
            return Ok(());
        }
        Err(FsOpsError::InsufficientSpace {
            path: path.to_path_buf(),
            free_ratio: verdict.free_ratio,
            min_free_ratio,
        })
    }
}
