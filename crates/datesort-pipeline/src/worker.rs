//! Fixed-size worker pool.
//!
//! # Design
//! - Each worker loops: dequeue, run one blocking move attempt, record the outcome.
//! - Move attempts run on the blocking pool and are awaited to completion; a
//!   hard stop is only observed between items.
//! - Outcomes are reported to metrics and events here, then to the poller as a
//!   [`Completion`] so it can release the path from its in-flight set.

use std::path::PathBuf;
use std::sync::Arc;

use datesort_events::{Event, EventBus};
use datesort_fsops::{FileMover, ProcessingOutcome};
use datesort_telemetry::Metrics;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::item::WorkItem;
use crate::queue::WorkReceiver;
use crate::retry::RetryScheduler;

/// What a worker tells the poller once an item leaves its hands for good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Terminal outcome recorded; the path may be enqueued again if it reappears.
    Resolved {
        /// Source path of the item.
        path: PathBuf,
    },
    /// No date could be derived; re-evaluate on a later cycle.
    Unclassified {
        /// Source path of the item.
        path: PathBuf,
        /// Consecutive cycles without a date.
        cycles: u32,
    },
    /// The item was dropped with the file still in place; do not retry it
    /// unless the file changes.
    Abandoned {
        /// Source path of the item.
        path: PathBuf,
    },
}

/// Shared dependencies of every worker.
pub(crate) struct WorkerContext {
    pub(crate) mover: Arc<FileMover>,
    pub(crate) receiver: WorkReceiver,
    pub(crate) scheduler: RetryScheduler,
    pub(crate) completions: UnboundedSender<Completion>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) stop: CancellationToken,
    pub(crate) metrics: Metrics,
    pub(crate) events: EventBus,
}

/// Handle to the running workers.
pub struct WorkerPool {
    workers: JoinSet<()>,
}

impl WorkerPool {
    pub(crate) fn spawn(count: usize, context: &Arc<WorkerContext>) -> Self {
        let mut workers = JoinSet::new();
        for worker_id in 0..count.max(1) {
            let context = Arc::clone(context);
            workers.spawn(async move { run_worker(worker_id, &context).await });
        }
        Self { workers }
    }

    /// Wait for every worker to exit. Cancel-safe.
    pub async fn join(&mut self) {
        while let Some(result) = self.workers.join_next().await {
            if let Err(err) = result {
                error!(error = %err, "worker task failed");
            }
        }
    }

    /// Workers still running.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether every worker has exited.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

async fn run_worker(worker_id: usize, context: &WorkerContext) {
    debug!(worker_id, "worker started");
    loop {
        let next = tokio::select! {
            biased;
            () = context.stop.cancelled() => None,
            item = context.receiver.next(&context.shutdown) => item,
        };
        let Some(item) = next else {
            break;
        };
        context
            .metrics
            .set_queue_depth(context.scheduler.queue_depth());
        handle(worker_id, item, context).await;
    }
    debug!(worker_id, "worker stopped");
}

async fn handle(worker_id: usize, item: WorkItem, context: &WorkerContext) {
    let mover = Arc::clone(&context.mover);
    let job = item.clone();
    let outcome =
        tokio::task::spawn_blocking(move || mover.process(job.request(worker_id))).await;
    match outcome {
        Ok(outcome) => record(worker_id, item, outcome, context),
        Err(err) => {
            error!(
                worker_id,
                source = %item.path.display(),
                error = %err,
                "move attempt task failed"
            );
            complete(context, Completion::Abandoned { path: item.path });
        }
    }
}

fn record(worker_id: usize, item: WorkItem, outcome: ProcessingOutcome, context: &WorkerContext) {
    let source = item.path.display().to_string();
    match outcome {
        ProcessingOutcome::Success {
            destination,
            elapsed,
        } => {
            let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
            context.metrics.record_success(elapsed);
            info!(
                worker_id,
                source = %source,
                destination = %destination.display(),
                attempt = item.attempt,
                elapsed_ms,
                "file moved"
            );
            context.events.publish(Event::FileMoved {
                source,
                destination: destination.display().to_string(),
                attempt: item.attempt,
                elapsed_ms,
            });
            complete(context, Completion::Resolved { path: item.path });
        }
        ProcessingOutcome::RetriableFailure {
            error,
            attempt,
            delay,
        } => {
            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            context.metrics.record_retry_scheduled();
            warn!(
                worker_id,
                source = %source,
                attempt,
                delay_ms,
                error = %error.detail(),
                "retry scheduled"
            );
            context.events.publish(Event::RetryScheduled {
                source,
                attempt,
                delay_ms,
                error: error.detail(),
            });
            context.scheduler.schedule(item.for_retry(attempt), delay);
        }
        ProcessingOutcome::TerminalFailure { error } => {
            context.metrics.record_source_vanished();
            warn!(
                worker_id,
                source = %source,
                error = %error.detail(),
                "source vanished before move"
            );
            context.events.publish(Event::SourceVanished { source });
            complete(context, Completion::Resolved { path: item.path });
        }
        ProcessingOutcome::Quarantined {
            quarantine_path,
            reason,
        } => {
            context.metrics.record_quarantined();
            warn!(
                worker_id,
                source = %source,
                quarantine_path = %quarantine_path.display(),
                reason = %reason,
                "file quarantined"
            );
            context.events.publish(Event::Quarantined {
                source,
                quarantine_path: quarantine_path.display().to_string(),
                reason,
            });
            complete(context, Completion::Resolved { path: item.path });
        }
        ProcessingOutcome::QuarantineFailed { error, reason } => {
            context.metrics.record_quarantine_failure();
            error!(
                severity = "critical",
                worker_id,
                source = %source,
                reason = %reason,
                error = %error.detail(),
                "quarantine move failed; dropping item"
            );
            context.events.publish(Event::QuarantineFailed {
                source,
                error: error.detail(),
            });
            complete(context, Completion::Abandoned { path: item.path });
        }
        ProcessingOutcome::Unclassified { cycles } => {
            context.metrics.record_unclassifiable();
            info!(
                worker_id,
                source = %source,
                cycles,
                "no date found; leaving file for a later cycle"
            );
            context
                .events
                .publish(Event::Unclassifiable { source, cycles });
            complete(
                context,
                Completion::Unclassified {
                    path: item.path,
                    cycles,
                },
            );
        }
    }
}

fn complete(context: &WorkerContext, completion: Completion) {
    // The poller is gone during the shutdown drain; nothing is tracking in-flight paths.
    let _ = context.completions.send(completion);
}
