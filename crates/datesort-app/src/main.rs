#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Binary entrypoint for the datesort daemon.

use datesort_app::{AppResult, run_app};

/// Run the daemon until it is stopped by a signal or a fatal pipeline error.
#[tokio::main]
async fn main() -> AppResult<()> {
    run_app().await
}
