//! Units of work passed from the poller to the worker pool.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use datesort_fsops::MoveRequest;
use uuid::Uuid;

/// A source file scheduled for relocation.
///
/// Exactly one holder owns an item at a time: the queue, a worker, or a retry timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Stable identifier across the item's retry chain.
    pub id: Uuid,
    /// Source file path.
    pub path: PathBuf,
    /// When the item last entered the queue.
    pub enqueued_at: DateTime<Utc>,
    /// Attempts already made (starts at 0).
    pub attempt: u32,
    /// Previous poll cycles in which the file could not be classified.
    pub unclassified_cycles: u32,
}

impl WorkItem {
    /// Fresh item for a newly stable file.
    #[must_use]
    pub fn new(path: PathBuf, unclassified_cycles: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            path,
            enqueued_at: Utc::now(),
            attempt: 0,
            unclassified_cycles,
        }
    }

    /// The same item carrying an updated attempt count for re-enqueue.
    #[must_use]
    pub fn for_retry(self, attempt: u32) -> Self {
        Self {
            attempt,
            enqueued_at: Utc::now(),
            ..self
        }
    }

    /// Mover request for this item executed by `worker_id`.
    #[must_use]
    pub fn request(&self, worker_id: usize) -> MoveRequest<'_> {
        MoveRequest {
            source: self.path.as_path(),
            attempt: self.attempt,
            unclassified_cycles: self.unclassified_cycles,
            worker_id,
        }
    }
}
