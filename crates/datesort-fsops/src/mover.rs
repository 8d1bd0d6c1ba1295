//! Single move attempts into the date tree, and quarantine.
//!
//! # Design
//! - Placement never overwrites: the file is hard-linked (or copied with
//!   `create_new`) to a free name, then the source is unlinked.
//! - A taken name is disambiguated with `~<worker>-<nanos>` before the
//!   extension, so concurrent workers never share a lock.
//! - Hard links fall back to copy-and-remove when they cannot be created, such
//!   as across volumes.
//! - Directory creation uses `create_dir_all`, which tolerates concurrent creators.

use std::ffi::{OsStr, OsString};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::classify::DateClassifier;
use crate::error::{FsOpsError, FsOpsResult};
use crate::model::{MoveRequest, ProcessingOutcome};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::space::DiskSpaceGuard;

/// Upper bound on disambiguated names tried for one placement.
const MAX_COLLISION_ATTEMPTS: u32 = 16;

/// Roots and thresholds a mover works with.
#[derive(Debug, Clone)]
pub struct MoverSettings {
    /// Root of the `YYYY/MM/DD` tree.
    pub destination_root: PathBuf,
    /// Flat directory receiving files that exhausted their attempts.
    pub quarantine_root: PathBuf,
    /// Minimum free ratio required on the destination volume before each move.
    pub min_free_ratio: f64,
    /// Retry policy applied to retriable failures.
    pub retry: RetryPolicy,
}

/// Performs move attempts and applies the retry policy to their results.
#[derive(Clone)]
pub struct FileMover {
    settings: MoverSettings,
    classifier: DateClassifier,
    space: DiskSpaceGuard,
}

enum Placement {
    Placed,
    Taken,
}

impl FileMover {
    /// Build a mover.
    ///
    /// # Errors
    ///
    /// Returns an error when the date classifier cannot be built.
    pub fn new(settings: MoverSettings, space: DiskSpaceGuard) -> FsOpsResult<Self> {
        Ok(Self {
            settings,
            classifier: DateClassifier::new()?,
            space,
        })
    }

    /// Retry policy used by [`FileMover::process`].
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.settings.retry
    }

    /// Run one attempt for `request` and fold in the retry policy.
    ///
    /// Unclassifiable files are quarantined once they have been seen in
    /// `max_retries` cycles; retriable failures are quarantined once attempts
    /// are exhausted.
    #[must_use]
    pub fn process(&self, request: MoveRequest<'_>) -> ProcessingOutcome {
        let started = Instant::now();
        match self.attempt_move(request.source, request.worker_id) {
            Ok(destination) => ProcessingOutcome::Success {
                destination,
                elapsed: started.elapsed(),
            },
            Err(FsOpsError::Unclassifiable { .. }) => {
                let cycles = request.unclassified_cycles.saturating_add(1);
                if self.settings.retry.is_exhausted(cycles) {
                    self.quarantine_outcome(request, format!("unclassifiable after {cycles} cycles"))
                } else {
                    ProcessingOutcome::Unclassified { cycles }
                }
            }
            Err(error) if !error.is_retriable() => ProcessingOutcome::TerminalFailure { error },
            Err(error) => match self.settings.retry.decide(request.attempt) {
                RetryDecision::Retry { attempt, delay } => ProcessingOutcome::RetriableFailure {
                    error,
                    attempt,
                    delay,
                },
                RetryDecision::Quarantine { .. } => {
                    self.quarantine_outcome(request, error.detail())
                }
            },
        }
    }

    /// Classify `source`, check destination space, and move it into the date tree.
    ///
    /// # Errors
    ///
    /// Returns the classification, admission, or IO failure that stopped the move.
    pub fn attempt_move(&self, source: &Path, worker_id: usize) -> FsOpsResult<PathBuf> {
        let date = self.classifier.classify_path(source)?;
        self.space
            .ensure(&self.settings.destination_root, self.settings.min_free_ratio)?;
        let directory = self.settings.destination_root.join(date.relative_path());
        let placed = place(source, &directory, worker_id)?;
        debug!(
            source = %source.display(),
            destination = %placed.display(),
            date = %date,
            "file placed"
        );
        Ok(placed)
    }

    /// Move `source` into the quarantine directory.
    ///
    /// # Errors
    ///
    /// Returns the IO failure that prevented the quarantine move.
    pub fn quarantine(&self, source: &Path, worker_id: usize) -> FsOpsResult<PathBuf> {
        place(source, &self.settings.quarantine_root, worker_id)
    }

    fn quarantine_outcome(&self, request: MoveRequest<'_>, reason: String) -> ProcessingOutcome {
        match self.quarantine(request.source, request.worker_id) {
            Ok(quarantine_path) => ProcessingOutcome::Quarantined {
                quarantine_path,
                reason,
            },
            Err(error @ FsOpsError::SourceMissing { .. }) => {
                ProcessingOutcome::TerminalFailure { error }
            }
            Err(error) => ProcessingOutcome::QuarantineFailed { error, reason },
        }
    }
}

/// Move `source` into `directory` under its own name or a disambiguated one.
fn place(source: &Path, directory: &Path, worker_id: usize) -> FsOpsResult<PathBuf> {
    let file_name = source.file_name().ok_or_else(|| FsOpsError::InvalidInput {
        field: "source_path",
        reason: "no_file_name",
        value: Some(source.display().to_string()),
    })?;
    fs::create_dir_all(directory)
        .map_err(|err| FsOpsError::io("mover.create_dir", directory, err))?;

    for index in 0..MAX_COLLISION_ATTEMPTS {
        let candidate = if index == 0 {
            directory.join(file_name)
        } else {
            directory.join(disambiguated_name(Path::new(file_name), worker_id))
        };
        match claim(source, &candidate)? {
            Placement::Placed => return Ok(candidate),
            Placement::Taken => {
                debug!(candidate = %candidate.display(), "target name taken");
            }
        }
    }

    Err(FsOpsError::CollisionsExhausted {
        directory: directory.to_path_buf(),
        attempts: MAX_COLLISION_ATTEMPTS,
    })
}

/// Try to move `source` onto `candidate` without replacing anything there.
fn claim(source: &Path, candidate: &Path) -> FsOpsResult<Placement> {
    match fs::hard_link(source, candidate) {
        Ok(()) => {
            release_source(source, candidate)?;
            Ok(Placement::Placed)
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(Placement::Taken),
        Err(err) if err.kind() == io::ErrorKind::NotFound && !source.exists() => {
            Err(FsOpsError::SourceMissing {
                path: source.to_path_buf(),
            })
        }
        Err(link_err) => {
            debug!(
                source = %source.display(),
                error = %link_err,
                "hard link unavailable; copying"
            );
            copy_exclusive(source, candidate)
        }
    }
}

/// Unlink the source after a successful hard link, undoing the link on failure.
fn release_source(source: &Path, candidate: &Path) -> FsOpsResult<()> {
    match fs::remove_file(source) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            if let Err(undo_err) = fs::remove_file(candidate) {
                warn!(
                    candidate = %candidate.display(),
                    error = %undo_err,
                    "failed to remove link after source unlink failure"
                );
            }
            Err(FsOpsError::io("mover.remove_source", source, err))
        }
    }
}

fn copy_exclusive(source: &Path, candidate: &Path) -> FsOpsResult<Placement> {
    let mut reader = match File::open(source) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(FsOpsError::SourceMissing {
                path: source.to_path_buf(),
            });
        }
        Err(err) => return Err(FsOpsError::io("mover.open_source", source, err)),
    };
    let mut writer = match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(candidate)
    {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(Placement::Taken),
        Err(err) => return Err(FsOpsError::io("mover.create_target", candidate, err)),
    };

    let copied = io::copy(&mut reader, &mut writer)
        .and_then(|_| writer.sync_all())
        .and_then(|()| {
            let modified = reader.metadata()?.modified()?;
            writer.set_modified(modified)
        });
    if let Err(err) = copied {
        discard_copy(candidate, "partial copy left after copy failure");
        return Err(FsOpsError::io("mover.copy", candidate, err));
    }

    match fs::remove_file(source) {
        Ok(()) => Ok(Placement::Placed),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Placement::Placed),
        Err(err) => {
            discard_copy(candidate, "duplicate copy left after source unlink failure");
            Err(FsOpsError::io("mover.remove_source", source, err))
        }
    }
}

/// Remove a copy that must not stay in the destination tree.
///
/// Returns `false` and logs `what` when the copy could not be removed.
fn discard_copy(candidate: &Path, what: &'static str) -> bool {
    match fs::remove_file(candidate) {
        Ok(()) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => true,
        Err(err) => {
            warn!(
                candidate = %candidate.display(),
                error = %err,
                "{what}"
            );
            false
        }
    }
}

/// `<stem>~<worker>-<nanos>[.<ext>]`
fn disambiguated_name(file_name: &Path, worker_id: usize) -> OsString {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_nanos());
    let stem = file_name.file_stem().unwrap_or_else(|| OsStr::new("file"));
    let mut name = stem.to_os_string();
    name.push(format!("~{worker_id}-{nanos}"));
    if let Some(extension) = file_name.extension() {
        name.push(".");
        name.push(extension);
    }
    name
}
