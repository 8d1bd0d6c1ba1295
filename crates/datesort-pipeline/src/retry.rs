//! Delayed re-enqueue of failed items.
//!
//! Each retry is a tracked timer task, so no worker ever sleeps through a
//! backoff. Timers abandon their item once shutdown is requested.

use std::time::Duration;

use datesort_events::EventBus;
use datesort_telemetry::Metrics;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::item::WorkItem;
use crate::queue::WorkSender;
use crate::shutdown::record_dropped;

/// Schedules items back onto the work queue after a delay.
#[derive(Clone)]
pub struct RetryScheduler {
    queue: WorkSender,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    metrics: Metrics,
    events: EventBus,
}

impl RetryScheduler {
    /// Build a scheduler feeding `queue`.
    #[must_use]
    pub fn new(
        queue: WorkSender,
        shutdown: CancellationToken,
        metrics: Metrics,
        events: EventBus,
    ) -> Self {
        Self {
            queue,
            tracker: TaskTracker::new(),
            shutdown,
            metrics,
            events,
        }
    }

    /// Re-enqueue `item` once `delay` has elapsed.
    pub fn schedule(&self, item: WorkItem, delay: Duration) {
        let this = self.clone();
        self.tracker.spawn(async move { this.deliver(item, delay).await });
    }

    /// Items currently waiting in the work queue.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    /// Timers still pending.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every pending timer to deliver or give up.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    async fn deliver(self, item: WorkItem, delay: Duration) {
        let path = item.path.clone();
        let delivered = tokio::select! {
            () = tokio::time::sleep(delay) => {
                tokio::select! {
                    sent = self.queue.enqueue(item) => sent.is_ok(),
                    () = self.shutdown.cancelled() => false,
                }
            }
            () = self.shutdown.cancelled() => false,
        };
        if delivered {
            debug!(source = %path.display(), "retry re-enqueued");
        } else {
            record_dropped(&self.metrics, &self.events, &path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::work_queue;
    use std::path::PathBuf;

    type TestResult<T> = anyhow::Result<T>;

    fn scheduler(
        capacity: usize,
    ) -> TestResult<(RetryScheduler, crate::queue::WorkReceiver, CancellationToken, Metrics)> {
        let (sender, receiver) = work_queue(capacity);
        let shutdown = CancellationToken::new();
        let metrics = Metrics::new(Duration::from_secs(60))?;
        let scheduler = RetryScheduler::new(
            sender,
            shutdown.clone(),
            metrics.clone(),
            EventBus::with_capacity(8),
        );
        Ok((scheduler, receiver, shutdown, metrics))
    }

    #[tokio::test]
    async fn delivers_after_delay() -> TestResult<()> {
        let (scheduler, receiver, _shutdown, _metrics) = scheduler(4)?;
        let item = WorkItem::new(PathBuf::from("/inbox/a.txt"), 0).for_retry(1);
        scheduler.schedule(item, Duration::from_millis(20));
        assert_eq!(scheduler.queue_depth(), 0);

        let idle = CancellationToken::new();
        let delivered =
            tokio::time::timeout(Duration::from_secs(2), receiver.next(&idle)).await?;
        assert_eq!(delivered.map(|item| item.attempt), Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn shutdown_drops_pending_timers() -> TestResult<()> {
        let (scheduler, receiver, shutdown, metrics) = scheduler(4)?;
        scheduler.schedule(
            WorkItem::new(PathBuf::from("/inbox/a.txt"), 0),
            Duration::from_secs(60),
        );
        assert_eq!(scheduler.pending(), 1);
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), scheduler.wait()).await?;

        assert_eq!(metrics.snapshot().dropped_at_shutdown_total, 1);
        assert!(receiver.drain().await.is_empty());
        Ok(())
    }
}
