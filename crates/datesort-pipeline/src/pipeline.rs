//! Pipeline wiring and shutdown drain.
//!
//! # Design
//! - `run` owns every task it starts and returns only after all of them have
//!   exited, so nothing touches the filesystem after it resolves.
//! - Shutdown order: the poller stops, workers finish queued items within the
//!   grace period, retry timers give up, and whatever is still queued is
//!   counted as dropped.

use std::sync::Arc;

use datesort_config::DatesortConfig;
use datesort_config::validate::validate;
use datesort_events::EventBus;
use datesort_fsops::{DiskSpaceGuard, FileMover, MoverSettings, RetryPolicy};
use datesort_telemetry::Metrics;
use tokio::sync::mpsc::unbounded_channel;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::poller::{DirectoryPoller, PollerSettings};
use crate::queue::work_queue;
use crate::retry::RetryScheduler;
use crate::shutdown::{ShutdownHandle, record_dropped};
use crate::worker::{WorkerContext, WorkerPool};

/// Summary returned after a clean stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineReport {
    /// Items abandoned by the shutdown drain.
    pub dropped_at_shutdown: u64,
}

/// A configured pipeline ready to run.
pub struct Pipeline {
    config: DatesortConfig,
    guard: DiskSpaceGuard,
    metrics: Metrics,
    events: EventBus,
    shutdown: ShutdownHandle,
}

impl Pipeline {
    /// Assemble a pipeline from resolved configuration and shared services.
    ///
    /// The configuration is validated again here and is immutable afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] when `config` breaks an invariant,
    /// e.g. a zero poll interval.
    pub fn new(
        config: DatesortConfig,
        guard: DiskSpaceGuard,
        metrics: Metrics,
        events: EventBus,
    ) -> PipelineResult<Self> {
        validate(&config).map_err(|source| PipelineError::Config { source })?;
        Ok(Self {
            config,
            guard,
            metrics,
            events,
            shutdown: ShutdownHandle::new(),
        })
    }

    /// Handle used to request a graceful stop while `run` is in progress.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Run until shutdown is requested or the source becomes unavailable.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Setup`] if the mover cannot be built and
    /// [`PipelineError::SourceUnavailable`] when the poller gives up. In the
    /// latter case workers are still drained before returning.
    pub async fn run(self) -> PipelineResult<PipelineReport> {
        let config = &self.config;
        let mover = FileMover::new(
            MoverSettings {
                destination_root: config.destination.clone(),
                quarantine_root: config.quarantine.clone(),
                min_free_ratio: config.min_free_disk_ratio,
                retry: RetryPolicy::new(
                    config.max_retries,
                    config.retry_base_delay,
                    config.retry_max_delay,
                ),
            },
            self.guard.clone(),
        )
        .map_err(|source| PipelineError::Setup { source })?;

        let shutdown = self.shutdown.token();
        let stop = CancellationToken::new();
        let (sender, receiver) = work_queue(config.queue_capacity);
        let (completions, completion_rx) = unbounded_channel();
        let scheduler = RetryScheduler::new(
            sender.clone(),
            shutdown.clone(),
            self.metrics.clone(),
            self.events.clone(),
        );
        let context = Arc::new(WorkerContext {
            mover: Arc::new(mover),
            receiver: receiver.clone(),
            scheduler: scheduler.clone(),
            completions,
            shutdown: shutdown.clone(),
            stop: stop.clone(),
            metrics: self.metrics.clone(),
            events: self.events.clone(),
        });
        let mut pool = WorkerPool::spawn(config.max_workers, &context);
        drop(context);
        info!(
            source = %config.source.display(),
            destination = %config.destination.display(),
            quarantine = %config.quarantine.display(),
            workers = pool.len(),
            queue_capacity = config.queue_capacity,
            "pipeline started"
        );

        let poller = DirectoryPoller::new(
            PollerSettings::from(config),
            self.guard.clone(),
            sender,
            completion_rx,
            self.metrics.clone(),
            self.events.clone(),
        );
        let polled = poller.run(shutdown.clone()).await;
        if polled.is_err() {
            self.shutdown.request_shutdown();
        }

        if tokio::time::timeout(config.shutdown_grace, pool.join())
            .await
            .is_err()
        {
            warn!(
                remaining_workers = pool.len(),
                grace_ms = u64::try_from(config.shutdown_grace.as_millis()).unwrap_or(u64::MAX),
                "shutdown grace period elapsed; stopping workers after current item"
            );
            stop.cancel();
            pool.join().await;
        }
        scheduler.wait().await;

        for item in receiver.drain().await {
            record_dropped(&self.metrics, &self.events, &item.path);
        }
        self.metrics.set_queue_depth(0);
        self.metrics.set_in_flight(0);

        polled?;
        let report = PipelineReport {
            dropped_at_shutdown: self.metrics.snapshot().dropped_at_shutdown_total,
        };
        info!(
            dropped_at_shutdown = report.dropped_at_shutdown,
            "pipeline stopped"
        );
        Ok(report)
    }
}
