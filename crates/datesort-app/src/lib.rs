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

//! datesort daemon wiring.
//!
//! Layout: `cli.rs` (flags and `DATESORT_*` variables), `bootstrap.rs`
//! (config resolution, logging, signals, pipeline run), `http.rs` (optional
//! metrics listener), `error.rs`.

/// Application bootstrap and configuration loading.
pub mod bootstrap;
/// Command-line definition.
pub mod cli;
/// Application error type.
pub mod error;
/// Optional HTTP metrics listener.
pub mod http;

pub use bootstrap::{load_config, run_app, run_with, spawn_signal_listener};
pub use cli::Cli;
pub use error::{AppError, AppResult};
