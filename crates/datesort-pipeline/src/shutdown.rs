//! Cooperative shutdown trigger.

use std::path::Path;

use datesort_events::{Event, EventBus};
use datesort_telemetry::Metrics;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cloneable handle that asks a running pipeline to stop.
///
/// Once requested, the poller stops listing immediately and queued work drains
/// through the workers for up to the configured grace period.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    /// New, untriggered handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a graceful shutdown. Repeated calls are no-ops.
    pub fn request_shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("shutdown requested");
        }
        self.token.cancel();
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolve once shutdown has been requested.
    pub async fn requested(&self) {
        self.token.cancelled().await;
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Account for a work item that will never be processed.
pub(crate) fn record_dropped(metrics: &Metrics, events: &EventBus, path: &Path) {
    warn!(source = %path.display(), "dropped at shutdown");
    metrics.record_dropped_at_shutdown();
    events.publish(Event::DroppedAtShutdown {
        source: path.display().to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn request_wakes_waiters() -> anyhow::Result<()> {
        let handle = ShutdownHandle::new();
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.requested().await });

        assert!(!handle.is_shutdown_requested());
        handle.request_shutdown();
        handle.request_shutdown();
        tokio::time::timeout(Duration::from_secs(1), task).await??;
        assert!(handle.is_shutdown_requested());
        Ok(())
    }
}
