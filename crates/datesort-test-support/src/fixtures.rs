//! Scratch directory layouts and filesystem helpers.

use std::fs::{self, File};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Result, bail};
use tempfile::TempDir;

/// Temporary `inbox` / `archive` / `quarantine` trees removed on drop.
pub struct TempLayout {
    _root: TempDir,
    /// Directory watched for incoming files (created).
    pub source: PathBuf,
    /// Root of the date tree (not created).
    pub destination: PathBuf,
    /// Quarantine directory (not created).
    pub quarantine: PathBuf,
}

impl TempLayout {
    /// Create a fresh layout with an existing, empty source directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary directory cannot be created.
    pub fn new() -> Result<Self> {
        let root = tempfile::tempdir()?;
        let source = root.path().join("inbox");
        let destination = root.path().join("archive");
        let quarantine = root.path().join("quarantine");
        fs::create_dir_all(&source)?;
        Ok(Self {
            _root: root,
            source,
            destination,
            quarantine,
        })
    }

    /// Write `contents` to `name` inside the source directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_source(&self, name: &str, contents: &[u8]) -> Result<PathBuf> {
        let path = self.source.join(name);
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Write a source file whose modification time lies `age` in the past.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or its mtime set.
    pub fn write_aged_source(&self, name: &str, contents: &[u8], age: Duration) -> Result<PathBuf> {
        let path = self.write_source(name, contents)?;
        let mtime = SystemTime::now()
            .checked_sub(age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        set_mtime(&path, mtime)?;
        Ok(path)
    }

    /// Path of `name` under the destination date directory `YYYY/MM/DD`.
    #[must_use]
    pub fn dated(&self, relative_dir: &str, name: &str) -> PathBuf {
        self.destination.join(relative_dir).join(name)
    }

    /// Make the destination root unusable by occupying it with a regular file.
    ///
    /// Directory creation beneath it then fails even for privileged users.
    ///
    /// # Errors
    ///
    /// Returns an error if the placeholder cannot be written.
    pub fn block_destination(&self) -> Result<()> {
        fs::write(&self.destination, b"not a directory")?;
        Ok(())
    }

    /// Same as [`TempLayout::block_destination`] for the quarantine directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the placeholder cannot be written.
    pub fn block_quarantine(&self) -> Result<()> {
        fs::write(&self.quarantine, b"not a directory")?;
        Ok(())
    }
}

/// Set the modification time of `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or updated.
pub fn set_mtime(path: &Path, mtime: SystemTime) -> Result<()> {
    let file = File::options().write(true).open(path)?;
    file.set_modified(mtime)?;
    Ok(())
}

/// Number of regular files anywhere beneath `root` (zero when it does not exist).
#[must_use]
pub fn count_files(root: &Path) -> usize {
    let Ok(entries) = fs::read_dir(root) else {
        return 0;
    };
    entries
        .filter_map(std::result::Result::ok)
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                count_files(&path)
            } else {
                usize::from(path.is_file())
            }
        })
        .sum()
}

/// Poll `check` every few milliseconds until it returns `true` or `timeout` elapses.
///
/// # Errors
///
/// Returns an error naming `what` when the condition is not met in time.
pub async fn wait_until<F, Fut>(timeout: Duration, what: &str, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_creates_only_source() -> Result<()> {
        let layout = TempLayout::new()?;
        assert!(layout.source.is_dir());
        assert!(!layout.destination.exists());
        assert!(!layout.quarantine.exists());
        Ok(())
    }

    #[test]
    fn aged_files_have_old_mtime() -> Result<()> {
        let layout = TempLayout::new()?;
        let path = layout.write_aged_source("old.txt", b"x", Duration::from_secs(3_600))?;
        let age = SystemTime::now().duration_since(fs::metadata(&path)?.modified()?)?;
        assert!(age >= Duration::from_secs(3_500));
        Ok(())
    }

    #[test]
    fn count_files_recurses() -> Result<()> {
        let layout = TempLayout::new()?;
        let nested = layout.destination.join("2025/03/01");
        fs::create_dir_all(&nested)?;
        fs::write(nested.join("a"), b"a")?;
        fs::write(nested.join("b"), b"b")?;
        assert_eq!(count_files(&layout.destination), 2);
        assert_eq!(count_files(&layout.quarantine), 0);
        Ok(())
    }

    #[tokio::test]
    async fn wait_until_times_out() {
        let result = wait_until(Duration::from_millis(30), "never", || async { false }).await;
        assert!(result.is_err());
    }
}
