use std::{
    io,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::TEMP_PREFIX;

/// Outcome of a purge. Failures are reported, never escalated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub removed: usize,
    pub missing: usize,
    pub failed: usize,
}

impl PurgeReport {
    pub fn attempted(&self) -> usize {
        self.removed + self.missing + self.failed
    }
}

/// Per-request ledger of temp paths.
///
/// Paths are recorded when they are reserved, before anything is written,
/// so a failure between creating a file and using it cannot leak it. Each
/// recorded path is removed at most once: purging drains the ledger. If
/// the owning request is abandoned without purging, `Drop` removes what is
/// left synchronously.
#[derive(Debug)]
pub struct RequestScratch {
    dir: PathBuf,
    paths: Mutex<Vec<PathBuf>>,
}

impl RequestScratch {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            paths: Mutex::new(Vec::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Allocate a fresh path in the work directory and record it.
    pub fn reserve(&self, label: &str, extension: &str) -> PathBuf {
        let name = format!(
            "{TEMP_PREFIX}{label}-{}.{extension}",
            Uuid::new_v4().simple()
        );
        let path = self.dir.join(name);
        self.record(path.clone());
        path
    }

    /// Record a path created elsewhere. Duplicates are ignored.
    pub fn record(&self, path: PathBuf) {
        let mut paths = self.paths.lock();
        if !paths.contains(&path) {
            paths.push(path);
        }
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths.lock().clone()
    }

    /// Delete every recorded path. Missing files (reserved but never
    /// written) are counted separately from real failures.
    pub async fn purge(&self) -> PurgeReport {
        let drained = std::mem::take(&mut *self.paths.lock());
        let mut report = PurgeReport::default();

        for path in drained {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), "removed temp file");
                    report.removed += 1;
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    report.missing += 1;
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to remove temp file"
                    );
                    report.failed += 1;
                }
            }
        }

        report
    }
}

impl Drop for RequestScratch {
    fn drop(&mut self) {
        let remaining = std::mem::take(self.paths.get_mut());
        for path in remaining {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "removed abandoned temp file")
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to remove abandoned temp file"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn purge_removes_each_path_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let scratch = RequestScratch::new(dir.path());

        let written = scratch.reserve("video", "bin");
        tokio::fs::write(&written, b"data").await.expect("write");
        let _never_written = scratch.reserve("frame", "jpg");

        let report = scratch.purge().await;
        assert_eq!(report.removed, 1);
        assert_eq!(report.missing, 1);
        assert!(!written.exists());

        let again = scratch.purge().await;
        assert_eq!(again.attempted(), 0);
    }

    #[tokio::test]
    async fn deletion_failure_is_reported_not_raised() {
        let dir = tempfile::tempdir().expect("tempdir");
        let scratch = RequestScratch::new(dir.path());

        // A non-empty directory cannot be removed with remove_file.
        let stubborn = dir.path().join("vigil-stubborn");
        std::fs::create_dir(&stubborn).expect("mkdir");
        std::fs::write(stubborn.join("inner"), b"x").expect("write");
        scratch.record(stubborn.clone());

        let report = scratch.purge().await;
        assert_eq!(report.failed, 1);
        assert!(stubborn.exists());
    }

    #[test]
    fn drop_cleans_up_unpurged_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = {
            let scratch = RequestScratch::new(dir.path());
            let path = scratch.reserve("frame", "jpg");
            std::fs::write(&path, b"frame").expect("write");
            path
        };
        assert!(!path.exists());
    }

    #[test]
    fn reserved_names_carry_prefix_and_extension() {
        let scratch = RequestScratch::new("/tmp/work");
        let path = scratch.reserve("frame", "jpg");
        let name = path.file_name().and_then(|n| n.to_str()).expect("name");
        assert!(name.starts_with("vigil-frame-"));
        assert!(name.ends_with(".jpg"));
        assert_eq!(scratch.paths(), vec![path]);
        // Nothing was written, so dropping is a no-op.
    }
}
