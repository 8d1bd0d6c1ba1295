//! Bounded FIFO between the poller and the worker pool.
//!
//! # Design
//! - The poller enqueues with `try_enqueue` and never waits on a full queue.
//! - Workers share one receiver behind an async mutex; whichever worker holds
//!   the lock takes the next item, so an item has a single owner.
//! - After shutdown is requested, dequeue stops waiting and only drains what
//!   is already queued.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::item::WorkItem;

/// Build a queue holding at most `capacity` items (minimum one).
#[must_use]
pub fn work_queue(capacity: usize) -> (WorkSender, WorkReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        WorkSender { inner: sender },
        WorkReceiver {
            inner: Arc::new(Mutex::new(receiver)),
        },
    )
}

/// Non-blocking enqueue failure; the rejected item is handed back.
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// The queue is at capacity.
    #[error("work queue full")]
    Full(WorkItem),
    /// Every receiver is gone.
    #[error("work queue closed")]
    Closed(WorkItem),
}

impl EnqueueError {
    /// Recover the rejected item.
    #[must_use]
    pub fn into_item(self) -> WorkItem {
        match self {
            Self::Full(item) | Self::Closed(item) => item,
        }
    }
}

/// Producer half.
#[derive(Debug, Clone)]
pub struct WorkSender {
    inner: mpsc::Sender<WorkItem>,
}

impl WorkSender {
    /// Enqueue without waiting.
    ///
    /// # Errors
    ///
    /// Returns the item when the queue is full or closed.
    pub fn try_enqueue(&self, item: WorkItem) -> Result<(), EnqueueError> {
        self.inner.try_send(item).map_err(|err| match err {
            TrySendError::Full(item) => EnqueueError::Full(item),
            TrySendError::Closed(item) => EnqueueError::Closed(item),
        })
    }

    /// Enqueue, waiting for a free slot.
    ///
    /// # Errors
    ///
    /// Returns the item when the queue is closed.
    pub async fn enqueue(&self, item: WorkItem) -> Result<(), WorkItem> {
        self.inner.send(item).await.map_err(|err| err.0)
    }

    /// Items currently waiting in the queue.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.inner.max_capacity() - self.inner.capacity()
    }
}

/// Consumer half shared by every worker.
#[derive(Debug, Clone)]
pub struct WorkReceiver {
    inner: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
}

impl WorkReceiver {
    /// Take the next item.
    ///
    /// Waits while `shutdown` is not cancelled; afterwards returns only items
    /// already queued and `None` once the queue is empty.
    pub async fn next(&self, shutdown: &CancellationToken) -> Option<WorkItem> {
        let mut receiver = self.inner.lock().await;
        if shutdown.is_cancelled() {
            return receiver.try_recv().ok();
        }
        tokio::select! {
            item = receiver.recv() => item,
            () = shutdown.cancelled() => receiver.try_recv().ok(),
        }
    }

    /// Remove and return everything still queued.
    pub async fn drain(&self) -> Vec<WorkItem> {
        let mut receiver = self.inner.lock().await;
        let mut items = Vec::new();
        while let Ok(item) = receiver.try_recv() {
            items.push(item);
        }
        items
    }
}
