//! Concurrent reorganization pipeline: a directory poller feeding a bounded
//! work queue consumed by a fixed worker pool, with non-blocking retries and a
//! cooperative shutdown drain.
#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Layout: `item.rs` (work items), `queue.rs` (bounded queue halves),
//! `poller.rs` (listing, stability, admission, enqueue), `worker.rs` (pool and
//! outcome recording), `retry.rs` (delayed re-enqueue), `shutdown.rs`,
//! `pipeline.rs` (wiring and drain), `error.rs`.

pub mod error;
pub mod item;
pub mod pipeline;
pub mod poller;
pub mod queue;
pub mod retry;
pub mod shutdown;
pub mod worker;

pub use error::{PipelineError, PipelineResult};
pub use item::WorkItem;
pub use pipeline::{Pipeline, PipelineReport};
pub use poller::{CycleReport, DirectoryPoller, PollerSettings};
pub use queue::{EnqueueError, WorkReceiver, WorkSender, work_queue};
pub use retry::RetryScheduler;
pub use shutdown::ShutdownHandle;
pub use worker::{Completion, WorkerPool};
