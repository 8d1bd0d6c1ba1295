//! Date extraction from filenames with a modification-time fallback.
//!
//! # Design
//! - A `YYYY-MM-DD` or `YYYY_MM_DD` token anywhere in the name wins over mtime.
//!   The token must not touch other digits on either side.
//! - Month and day are range-checked only (`1..=12`, `1..=31`); an out-of-range
//!   token is ignored and the mtime fallback applies.
//! - Modification times are interpreted in the local timezone.

use std::fs;
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Datelike, Local};
use regex::Regex;

use crate::error::{FsOpsError, FsOpsResult};
use crate::model::ClassifiedDestination;

const DATE_TOKEN_PATTERN: &str = r"(\d{4})([-_])(\d{2})([-_])(\d{2})";

/// Maps a file to the calendar date it should be filed under.
#[derive(Debug, Clone)]
pub struct DateClassifier {
    token: Regex,
}

impl DateClassifier {
    /// Compile the date-token matcher.
    ///
    /// # Errors
    ///
    /// Returns an error if the token pattern fails to compile.
    pub fn new() -> FsOpsResult<Self> {
        let token = Regex::new(DATE_TOKEN_PATTERN).map_err(|err| FsOpsError::InvalidInput {
            field: "date_token_pattern",
            reason: "regex_compile",
            value: Some(err.to_string()),
        })?;
        Ok(Self { token })
    }

    /// Classify a file from its name and (optionally) its modification time.
    ///
    /// Returns `None` when the name has no valid date token and no mtime is available.
    #[must_use]
    pub fn classify(
        &self,
        file_name: &str,
        mtime: Option<SystemTime>,
    ) -> Option<ClassifiedDestination> {
        self.from_name(file_name)
            .or_else(|| mtime.map(from_mtime))
    }

    /// Classify a file on disk, reading its modification time when needed.
    ///
    /// # Errors
    ///
    /// Returns [`FsOpsError::SourceMissing`] when the file vanished before a
    /// date could be derived and [`FsOpsError::Unclassifiable`] when it exists
    /// but yields no date.
    pub fn classify_path(&self, path: &Path) -> FsOpsResult<ClassifiedDestination> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default();
        if let Some(date) = self.from_name(&name) {
            return Ok(date);
        }

        match fs::metadata(path) {
            Ok(metadata) => metadata
                .modified()
                .ok()
                .map(from_mtime)
                .ok_or_else(|| FsOpsError::Unclassifiable {
                    path: path.to_path_buf(),
                }),
            // The entry itself may still exist, e.g. a dangling symlink.
            Err(_) if fs::symlink_metadata(path).is_ok() => Err(FsOpsError::Unclassifiable {
                path: path.to_path_buf(),
            }),
            Err(_) => Err(FsOpsError::SourceMissing {
                path: path.to_path_buf(),
            }),
        }
    }

    fn from_name(&self, file_name: &str) -> Option<ClassifiedDestination> {
        self.token.captures_iter(file_name).find_map(|caps| {
            let whole = caps.get(0)?;
            if touches_digit(file_name, whole.start(), whole.end())
                || caps.get(2)?.as_str() != caps.get(4)?.as_str()
            {
                return None;
            }
            let year = caps.get(1)?.as_str().parse().ok()?;
            let month = caps.get(3)?.as_str().parse().ok()?;
            let day = caps.get(5)?.as_str().parse().ok()?;
            ((1..=12).contains(&month) && (1..=31).contains(&day))
                .then_some(ClassifiedDestination { year, month, day })
        })
    }
}

fn touches_digit(name: &str, start: usize, end: usize) -> bool {
    let before = name[..start].chars().next_back();
    let after = name[end..].chars().next();
    before.is_some_and(|ch| ch.is_ascii_digit()) || after.is_some_and(|ch| ch.is_ascii_digit())
}

fn from_mtime(mtime: SystemTime) -> ClassifiedDestination {
    let local: DateTime<Local> = mtime.into();
    ClassifiedDestination {
        year: local.year(),
        month: local.month(),
        day: local.day(),
    }
}
