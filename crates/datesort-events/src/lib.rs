//! Domain event bus for the datesort pipeline.
//!
//! Every externally interesting pipeline transition (a file moved, a retry
//! scheduled, a quarantine, an admission-control skip, the per-cycle summary)
//! is published as a typed [`Event`]. The bus assigns sequential identifiers,
//! fans events out over `tokio::broadcast`, and keeps a bounded replay ring so
//! late readers (the HTTP `/events` endpoint, tests) can inspect recent history.
//! When the channel overflows, the oldest events are dropped; publishers never
//! block.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::{Receiver, Sender};

/// Identifier assigned to each published event.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Typed pipeline events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    FileMoved {
        source: String,
        destination: String,
        attempt: u32,
        elapsed_ms: u64,
    },
    RetryScheduled {
        source: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    Quarantined {
        source: String,
        quarantine_path: String,
        reason: String,
    },
    QuarantineFailed {
        source: String,
        error: String,
    },
    SourceVanished {
        source: String,
    },
    Unclassifiable {
        source: String,
        cycles: u32,
    },
    AdmissionSkipped {
        free_ratio: Option<f64>,
        min_free_ratio: f64,
    },
    EnqueueDeferred {
        count: usize,
    },
    DroppedAtShutdown {
        source: String,
    },
    MetricsSummary {
        processed: u64,
        success: u64,
        failure: u64,
        average_latency_ms: f64,
        error_rate_percent: f64,
        throughput_per_minute: f64,
    },
    PollerFatal {
        error: String,
    },
}

impl Event {
    /// Machine-friendly discriminator for log fields and filters.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::FileMoved { .. } => "file_moved",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::Quarantined { .. } => "quarantined",
            Self::QuarantineFailed { .. } => "quarantine_failed",
            Self::SourceVanished { .. } => "source_vanished",
            Self::Unclassifiable { .. } => "unclassifiable",
            Self::AdmissionSkipped { .. } => "admission_skipped",
            Self::EnqueueDeferred { .. } => "enqueue_deferred",
            Self::DroppedAtShutdown { .. } => "dropped_at_shutdown",
            Self::MetricsSummary { .. } => "metrics_summary",
            Self::PollerFatal { .. } => "poller_fatal",
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub event: Event,
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    buffer: Arc<Mutex<VecDeque<EventEnvelope>>>,
    next_id: Arc<AtomicU64>,
    replay_capacity: usize,
}

impl EventBus {
    /// Construct a new bus with the provided broadcast capacity.
    ///
    /// The broadcast channel uses the same capacity as the in-memory replay
    /// buffer. A zero capacity is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            next_id: Arc::new(AtomicU64::new(1)),
            replay_capacity: capacity,
        }
    }

    /// Construct a bus with the default in-memory buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish a new event to the bus, assigning it a sequential identifier.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };

        {
            let mut buffer = self.lock_buffer();
            if buffer.len() == self.replay_capacity {
                buffer.pop_front();
            }
            buffer.push_back(envelope.clone());
        }

        // No live subscribers is not an error; the replay ring still has it.
        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to the bus, replaying any buffered events newer than `since_id`.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        let backlog = since_id.map_or_else(VecDeque::new, |since| {
            self.lock_buffer()
                .iter()
                .filter(|item| item.id > since)
                .cloned()
                .collect()
        });
        let receiver = self.sender.subscribe();
        EventStream { backlog, receiver }
    }

    /// Return up to `limit` of the most recent buffered events, oldest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<EventEnvelope> {
        let buffer = self.lock_buffer();
        let skip = buffer.len().saturating_sub(limit);
        buffer.iter().skip(skip).cloned().collect()
    }

    /// Returns the last assigned identifier, if any events have been published.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.lock_buffer().back().map(|event| event.id)
    }

    fn lock_buffer(&self) -> MutexGuard<'_, VecDeque<EventEnvelope>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream wrapper that yields events either from the replay backlog or from the
/// live broadcast channel.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
}

impl EventStream {
    /// Receive the next event, respecting the replay backlog first.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }

        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    type TestResult<T> = anyhow::Result<T>;

    const RECV_TIMEOUT: Duration = Duration::from_secs(1);

    fn vanished(index: usize) -> Event {
        Event::SourceVanished {
            source: format!("/inbox/file-{index}.txt"),
        }
    }

    #[tokio::test]
    async fn sequential_ids_and_replay() -> TestResult<()> {
        let bus = EventBus::with_capacity(16);

        let mut last_id = 0;
        for i in 0..5 {
            last_id = bus.publish(vanished(i));
        }
        assert_eq!(last_id, 5);
        assert_eq!(bus.last_event_id(), Some(5));

        let mut stream = bus.subscribe(Some(2));
        let mut received = Vec::new();
        for _ in 0..3 {
            if let Some(event) = timeout(RECV_TIMEOUT, stream.next()).await? {
                received.push(event.id);
            }
        }
        assert_eq!(received, vec![3, 4, 5]);
        Ok(())
    }

    #[tokio::test]
    async fn live_subscribers_receive_new_events() -> TestResult<()> {
        let bus = EventBus::with_capacity(8);
        let mut stream = bus.subscribe(None);
        bus.publish(Event::EnqueueDeferred { count: 2 });

        let envelope = timeout(RECV_TIMEOUT, stream.next()).await?;
        assert_eq!(
            envelope.map(|item| item.event),
            Some(Event::EnqueueDeferred { count: 2 })
        );
        Ok(())
    }

    #[test]
    fn recent_returns_bounded_tail() {
        let bus = EventBus::with_capacity(4);
        for i in 0..6 {
            bus.publish(vanished(i));
        }
        let ids: Vec<_> = bus.recent(3).into_iter().map(|item| item.id).collect();
        assert_eq!(ids, vec![4, 5, 6]);

        let all: Vec<_> = bus.recent(100).into_iter().map(|item| item.id).collect();
        assert_eq!(all, vec![3, 4, 5, 6]);
        assert!(bus.recent(0).is_empty());
    }

    #[test]
    fn events_serialise_with_type_tag() -> TestResult<()> {
        let event = Event::Quarantined {
            source: "/inbox/a.txt".to_string(),
            quarantine_path: "/quarantine/a.txt".to_string(),
            reason: "permission denied".to_string(),
        };
        let value = serde_json::to_value(&event)?;
        assert_eq!(value["type"], event.kind());
        assert_eq!(value["reason"], "permission denied");
        Ok(())
    }
}
