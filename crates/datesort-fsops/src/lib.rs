//! Filesystem operations for the date-partitioning pipeline: classification,
//! disk-space admission, collision-free relocation, and retry decisions.
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

//! Layout: `classify.rs` (date extraction), `space.rs` (free-space guard and
//! probes), `mover.rs` (move attempts and quarantine), `retry.rs` (backoff
//! policy), `model.rs` (outcomes and destinations), `error.rs`.

pub mod classify;
pub mod error;
pub mod model;
pub mod mover;
pub mod retry;
pub mod space;

pub use classify::DateClassifier;
pub use error::{FsOpsError, FsOpsResult};
pub use model::{ClassifiedDestination, MoveRequest, ProcessingOutcome};
pub use mover::{FileMover, MoverSettings};
pub use retry::{RetryDecision, RetryPolicy};
pub use space::{DiskSpaceGuard, SpaceProbe, SpaceUsage, SpaceVerdict, StatvfsProbe};
