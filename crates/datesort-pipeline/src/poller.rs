//! Directory polling control loop.
//!
//! # Design
//! - One cycle: apply worker completions, check destination space, list the
//!   source, select stable files, enqueue without blocking, publish a summary.
//! - A file is stable when its size and mtime match the previous listing or
//!   its mtime is older than one poll interval. First sightings of fresh
//!   files are only remembered.
//! - The poller is the only writer of the in-flight set: paths are added
//!   before enqueue and removed when a worker reports a completion.
//! - A denied admission check skips the whole cycle, including the listing.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use datesort_config::DatesortConfig;
use datesort_events::{Event, EventBus};
use datesort_fsops::DiskSpaceGuard;
use datesort_telemetry::Metrics;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::error::{PipelineError, PipelineResult};
use crate::item::WorkItem;
use crate::queue::{EnqueueError, WorkSender};
use crate::worker::Completion;

/// Poller configuration derived from the resolved config.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// Directory to watch.
    pub source: PathBuf,
    /// Destination root; checked for free space and never enqueued.
    pub destination: PathBuf,
    /// Quarantine directory; never enqueued.
    pub quarantine: PathBuf,
    /// Sleep between cycles and the stability age threshold.
    pub poll_interval: Duration,
    /// Minimum free ratio on the destination volume.
    pub min_free_ratio: f64,
    /// Windowed error rate (percent) above which a warning is logged.
    pub error_rate_alert_percent: f64,
    /// Consecutive listing failures that stop the pipeline.
    pub fatal_listing_failures: u32,
}

impl From<&DatesortConfig> for PollerSettings {
    fn from(config: &DatesortConfig) -> Self {
        Self {
            source: config.source.clone(),
            destination: config.destination.clone(),
            quarantine: config.quarantine.clone(),
            poll_interval: config.poll_interval,
            min_free_ratio: config.min_free_disk_ratio,
            error_rate_alert_percent: config.error_rate_alert_percent,
            fatal_listing_failures: config.fatal_listing_failures,
        }
    }
}

/// What a single poll cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleReport {
    /// Admission control denied the cycle; nothing was listed.
    AdmissionSkipped,
    /// The source could not be listed; below the fatal threshold.
    ListingFailed {
        /// Consecutive failures so far.
        failures: u32,
    },
    /// The source was listed and stable files were offered to the queue.
    Listed {
        /// Items enqueued this cycle.
        enqueued: usize,
        /// Stable files left for the next cycle because the queue was full.
        deferred: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileSignature {
    len: u64,
    modified: Option<SystemTime>,
}

impl FileSignature {
    fn older_than(&self, age: Duration) -> bool {
        self.modified
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|elapsed| elapsed > age)
    }
}

type Listing = HashMap<PathBuf, FileSignature>;

/// Control loop producing work items.
pub struct DirectoryPoller {
    settings: PollerSettings,
    guard: DiskSpaceGuard,
    queue: WorkSender,
    completions: UnboundedReceiver<Completion>,
    metrics: Metrics,
    events: EventBus,
    previous: Listing,
    in_flight: HashSet<PathBuf>,
    unclassified: HashMap<PathBuf, u32>,
    abandoned: Listing,
    listing_failures: u32,
}

impl DirectoryPoller {
    /// Build a poller feeding `queue` and listening for worker completions.
    #[must_use]
    pub fn new(
        settings: PollerSettings,
        guard: DiskSpaceGuard,
        queue: WorkSender,
        completions: UnboundedReceiver<Completion>,
        metrics: Metrics,
        events: EventBus,
    ) -> Self {
        Self {
            settings,
            guard,
            queue,
            completions,
            metrics,
            events,
            previous: HashMap::new(),
            in_flight: HashSet::new(),
            unclassified: HashMap::new(),
            abandoned: HashMap::new(),
            listing_failures: 0,
        }
    }

    /// Paths currently enqueued or being processed.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Run cycles until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SourceUnavailable`] once the source directory
    /// has failed to list `fatal_listing_failures` times in a row.
    pub async fn run(mut self, shutdown: CancellationToken) -> PipelineResult<()> {
        info!(
            source = %self.settings.source.display(),
            poll_interval_ms = u64::try_from(self.settings.poll_interval.as_millis()).unwrap_or(u64::MAX),
            "poller started"
        );
        while !shutdown.is_cancelled() {
            let report = self.cycle().await?;
            debug!(?report, "poll cycle finished");
            tokio::select! {
                () = tokio::time::sleep(self.settings.poll_interval) => {}
                () = shutdown.cancelled() => {}
            }
        }
        info!(in_flight = self.in_flight.len(), "poller stopped");
        Ok(())
    }

    /// Run a single poll cycle.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SourceUnavailable`] when the listing failure
    /// threshold is reached, or [`PipelineError::Join`] if the listing task dies.
    pub async fn cycle(&mut self) -> PipelineResult<CycleReport> {
        self.apply_completions();

        let verdict = self
            .guard
            .evaluate(&self.settings.destination, self.settings.min_free_ratio);
        if !verdict.admitted {
            warn!(
                destination = %self.settings.destination.display(),
                free_ratio = ?verdict.free_ratio,
                min_free_ratio = self.settings.min_free_ratio,
                "insufficient disk space; skipping poll cycle"
            );
            self.metrics.record_admission_skip();
            self.events.publish(Event::AdmissionSkipped {
                free_ratio: verdict.free_ratio,
                min_free_ratio: self.settings.min_free_ratio,
            });
            self.publish_summary();
            return Ok(CycleReport::AdmissionSkipped);
        }

        let listing = match self.list_source().await? {
            Ok(listing) => {
                self.listing_failures = 0;
                listing
            }
            Err(err) => return self.listing_failed(err),
        };

        let candidates = self.select_candidates(&listing);
        let (enqueued, deferred) = self.enqueue(candidates);
        self.unclassified.retain(|path, _| listing.contains_key(path));
        self.abandoned.retain(|path, _| listing.contains_key(path));
        self.previous = listing;

        self.metrics.set_queue_depth(self.queue.depth());
        self.metrics.set_in_flight(self.in_flight.len());
        self.publish_summary();
        Ok(CycleReport::Listed { enqueued, deferred })
    }

    fn apply_completions(&mut self) {
        while let Ok(completion) = self.completions.try_recv() {
            match completion {
                Completion::Resolved { path } => {
                    self.in_flight.remove(&path);
                    self.unclassified.remove(&path);
                }
                Completion::Unclassified { path, cycles } => {
                    self.in_flight.remove(&path);
                    self.unclassified.insert(path, cycles);
                }
                Completion::Abandoned { path } => {
                    self.in_flight.remove(&path);
                    self.unclassified.remove(&path);
                    if let Some(signature) = self.previous.get(&path) {
                        self.abandoned.insert(path, *signature);
                    }
                }
            }
        }
    }

    async fn list_source(&self) -> PipelineResult<Result<Listing, walkdir::Error>> {
        let source = self.settings.source.clone();
        let excluded = [
            self.settings.destination.clone(),
            self.settings.quarantine.clone(),
        ];
        tokio::task::spawn_blocking(move || scan(&source, &excluded))
            .await
            .map_err(|source| PipelineError::Join {
                operation: "poller.list_source",
                source,
            })
    }

    fn listing_failed(&mut self, err: walkdir::Error) -> PipelineResult<CycleReport> {
        self.listing_failures = self.listing_failures.saturating_add(1);
        if self.listing_failures >= self.settings.fatal_listing_failures {
            error!(
                source = %self.settings.source.display(),
                failures = self.listing_failures,
                error = %err,
                "source directory unavailable; stopping"
            );
            self.events.publish(Event::PollerFatal {
                error: err.to_string(),
            });
            return Err(PipelineError::SourceUnavailable {
                path: self.settings.source.clone(),
                failures: self.listing_failures,
                source: err,
            });
        }
        warn!(
            source = %self.settings.source.display(),
            failures = self.listing_failures,
            error = %err,
            "failed to list source directory"
        );
        Ok(CycleReport::ListingFailed {
            failures: self.listing_failures,
        })
    }

    fn select_candidates(&mut self, listing: &Listing) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        for (path, signature) in listing {
            if self.in_flight.contains(path) {
                continue;
            }
            if let Some(abandoned) = self.abandoned.get(path) {
                if abandoned == signature {
                    continue;
                }
                self.abandoned.remove(path);
            }
            let unchanged = self.previous.get(path) == Some(signature);
            if unchanged || signature.older_than(self.settings.poll_interval) {
                candidates.push(path.clone());
            }
        }
        candidates.sort();
        candidates
    }

    fn enqueue(&mut self, candidates: Vec<PathBuf>) -> (usize, usize) {
        let total = candidates.len();
        let mut enqueued = 0;
        for (index, path) in candidates.into_iter().enumerate() {
            let cycles = self.unclassified.get(&path).copied().unwrap_or(0);
            self.in_flight.insert(path.clone());
            if let Err(err) = self.queue.try_enqueue(WorkItem::new(path, cycles)) {
                let closed = matches!(err, EnqueueError::Closed(_));
                let item = err.into_item();
                self.in_flight.remove(&item.path);
                let deferred = total - index;
                if closed {
                    warn!(deferred, "work queue closed; deferring");
                } else {
                    info!(deferred, "work queue saturated; deferring to next cycle");
                }
                self.metrics.record_enqueue_deferred(deferred);
                self.events.publish(Event::EnqueueDeferred { count: deferred });
                return (enqueued, deferred);
            }
            enqueued += 1;
        }
        (enqueued, 0)
    }

    fn publish_summary(&self) {
        let snapshot = self.metrics.snapshot();
        info!(
            processed = snapshot.processed_total,
            success = snapshot.success_total,
            failure = snapshot.failure_total,
            quarantined = snapshot.quarantined_total,
            average_latency_ms = snapshot.average_latency_ms,
            error_rate_percent = snapshot.error_rate_percent,
            throughput_per_minute = snapshot.throughput_per_minute,
            queue_depth = snapshot.queue_depth,
            in_flight = snapshot.in_flight,
            "pipeline summary"
        );
        if snapshot.window_processed > 0
            && snapshot.error_rate_percent > self.settings.error_rate_alert_percent
        {
            warn!(
                error_rate_percent = snapshot.error_rate_percent,
                threshold_percent = self.settings.error_rate_alert_percent,
                "high error rate"
            );
        }
        self.events.publish(Event::MetricsSummary {
            processed: snapshot.processed_total,
            success: snapshot.success_total,
            failure: snapshot.failure_total,
            average_latency_ms: snapshot.average_latency_ms,
            error_rate_percent: snapshot.error_rate_percent,
            throughput_per_minute: snapshot.throughput_per_minute,
        });
    }
}

/// List regular files directly inside `source`.
///
/// Only a failure to read `source` itself is an error; entries that vanish
/// mid-listing are skipped.
fn scan(source: &Path, excluded: &[PathBuf]) -> Result<Listing, walkdir::Error> {
    let mut listing = HashMap::new();
    for entry in WalkDir::new(source).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => return Err(err),
            Err(err) => {
                debug!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || excluded.iter().any(|root| entry.path() == root) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        listing.insert(
            entry.into_path(),
            FileSignature {
                len: metadata.len(),
                modified: metadata.modified().ok(),
            },
        );
    }
    Ok(listing)
}
