//! Deterministic disk-space probes.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use datesort_fsops::space::NixError;
use datesort_fsops::{FsOpsError, FsOpsResult, SpaceProbe, SpaceUsage};

/// Probe reporting an adjustable free/total pair.
#[derive(Debug)]
pub struct FixedSpaceProbe {
    free_bytes: AtomicU64,
    total_bytes: u64,
}

impl FixedSpaceProbe {
    /// Probe reporting `free_bytes` out of `total_bytes`.
    #[must_use]
    pub const fn new(free_bytes: u64, total_bytes: u64) -> Self {
        Self {
            free_bytes: AtomicU64::new(free_bytes),
            total_bytes,
        }
    }

    /// Probe with 90% free space.
    #[must_use]
    pub fn roomy() -> Arc<Self> {
        Arc::new(Self::new(900, 1_000))
    }

    /// Probe with 1% free space.
    #[must_use]
    pub fn nearly_full() -> Arc<Self> {
        Arc::new(Self::new(10, 1_000))
    }

    /// Change the reported free bytes.
    pub fn set_free_bytes(&self, free_bytes: u64) {
        self.free_bytes.store(free_bytes, Ordering::SeqCst);
    }
}

impl SpaceProbe for FixedSpaceProbe {
    fn usage(&self, _path: &Path) -> FsOpsResult<SpaceUsage> {
        Ok(SpaceUsage {
            free_bytes: self.free_bytes.load(Ordering::SeqCst),
            total_bytes: self.total_bytes,
        })
    }
}

/// Roomy probe that blocks the caller for `delay` on every query.
///
/// Each move checks destination space, so this paces the worker pool.
#[derive(Debug)]
pub struct SlowSpaceProbe {
    delay: Duration,
}

impl SlowSpaceProbe {
    /// Probe with 90% free space answering after `delay`.
    #[must_use]
    pub fn roomy(delay: Duration) -> Arc<Self> {
        Arc::new(Self { delay })
    }
}

impl SpaceProbe for SlowSpaceProbe {
    fn usage(&self, _path: &Path) -> FsOpsResult<SpaceUsage> {
        std::thread::sleep(self.delay);
        Ok(SpaceUsage {
            free_bytes: 900,
            total_bytes: 1_000,
        })
    }
}

/// Probe whose every query fails.
#[derive(Debug, Default)]
pub struct FailingSpaceProbe;

impl SpaceProbe for FailingSpaceProbe {
    fn usage(&self, path: &Path) -> FsOpsResult<SpaceUsage> {
        Err(FsOpsError::Nix {
            operation: "space.statvfs",
            path: path.to_path_buf(),
            source: NixError::EIO,
        })
    }
}
