//! Temp-directory file layout and sweeper (`spec.md` §6).
//!
//! Inputs are read from, and outputs written alongside, a configured temp
//! directory; a background sweeper deletes anything older than a TTL.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::fs;

/// Errors raised by [`FileLayout`] operations.
#[derive(Debug, Error)]
pub enum FileLayoutError {
    /// The underlying filesystem operation failed.
    #[error("file layout io error: {message}")]
    Io {
        /// Detail from the originating `std::io::Error`.
        message: String,
    },
}

impl From<std::io::Error> for FileLayoutError {
    fn from(err: std::io::Error) -> Self {
        Self::Io { message: err.to_string() }
    }
}

/// Resolves output paths alongside a configured temp directory and runs a
/// periodic sweep for stale files.
#[derive(Debug, Clone)]
pub struct FileLayout {
    root: PathBuf,
}

impl FileLayout {
    /// Point the layout at `root` (`files.temp_dir`).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root temp directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for a result sidecar file, e.g. `{stem}_result.txt`.
    #[must_use]
    pub fn result_path(&self, stem: &str) -> PathBuf {
        self.root.join(format!("{stem}_result.txt"))
    }

    /// Path for a processed sidecar file, e.g. `{stem}_processed.{ext}`.
    #[must_use]
    pub fn processed_path(&self, stem: &str, ext: &str) -> PathBuf {
        self.root.join(format!("{stem}_processed.{ext}"))
    }

    /// Delete every entry under the root older than `ttl`. Returns the
    /// number of files removed.
    pub async fn sweep(&self, ttl: Duration) -> Result<u64, FileLayoutError> {
        let mut removed = 0u64;
        let mut entries = fs::read_dir(&self.root).await?;
        let now = std::time::SystemTime::now();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified()?;
            let age = now.duration_since(modified).unwrap_or_default();
            if age > ttl {
                fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Run [`Self::sweep`] on `interval` until the returned task is aborted.
    pub fn spawn_sweeper(self, interval: Duration, ttl: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(err) = self.sweep(ttl).await {
                    tracing::warn!(error = %err, "file sweeper pass failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as std_fs;
    use tempfile::tempdir;

    #[test]
    fn result_and_processed_paths_use_expected_suffixes() {
        let layout = FileLayout::new("/tmp/docflow");
        assert_eq!(layout.result_path("job-1").to_str().unwrap(), "/tmp/docflow/job-1_result.txt");
        assert_eq!(
            layout.processed_path("job-1", "pdf").to_str().unwrap(),
            "/tmp/docflow/job-1_processed.pdf"
        );
    }

    #[tokio::test]
    async fn sweep_removes_only_stale_files() {
        let dir = tempdir().expect("tempdir");
        let stale = dir.path().join("stale.txt");
        let fresh = dir.path().join("fresh.txt");
        std_fs::write(&stale, b"old").unwrap();
        std_fs::write(&fresh, b"new").unwrap();

        let old_time = std::time::SystemTime::now() - Duration::from_secs(3600);
        let stale_file = std_fs::File::open(&stale).unwrap();
        stale_file.set_modified(old_time).unwrap();

        let layout = FileLayout::new(dir.path());
        let removed = layout.sweep(Duration::from_secs(60)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!stale.exists());
        assert!(fresh.exists());
    }
}
