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

//! Run configuration for the datesort daemon.
//!
//! Layout: `model.rs` (resolved config value and override layers), `loader.rs`
//! (YAML file and environment layers, resolution), `validate.rs` (invariants),
//! `defaults.rs` (built-in values), `error.rs` (typed failures).

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{legacy_env_layer, load_file, resolve};
pub use model::{ConfigLayer, DatesortConfig, LogLevel, LogStyle};
