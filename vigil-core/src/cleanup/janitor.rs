use std::{
    io,
    path::PathBuf,
    time::{Duration, SystemTime},
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::TEMP_PREFIX;

/// Periodically removes stale `vigil-*` files from the work directory.
///
/// Live requests clean up after themselves; this only catches files
/// orphaned by a crash or a killed process.
#[derive(Debug, Clone)]
pub struct TempJanitor {
    dir: PathBuf,
    interval: Duration,
    max_age: Duration,
}

impl TempJanitor {
    pub fn new(dir: impl Into<PathBuf>, interval: Duration, max_age: Duration) -> Self {
        Self {
            dir: dir.into(),
            interval,
            max_age,
        }
    }

    /// Run sweeps until `shutdown` fires.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                dir = %self.dir.display(),
                interval = ?self.interval,
                max_age = ?self.max_age,
                "temp janitor started"
            );
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(
                tokio::time::MissedTickBehavior::Delay,
            );
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        match self.sweep().await {
                            Ok(0) => {}
                            Ok(removed) => info!(removed, "temp janitor removed stale files"),
                            Err(err) => warn!(error = %err, "temp janitor sweep failed"),
                        }
                    }
                }
            }
            debug!("temp janitor stopped");
        })
    }

    /// One pass over the work directory. Returns how many files were
    /// removed.
    pub async fn sweep(&self) -> io::Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err),
        };
        let now = SystemTime::now();
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(TEMP_PREFIX) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                _ => continue,
            };
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < self.max_age {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!(
                    path = %entry.path().display(),
                    error = %err,
                    "failed to remove stale temp file"
                ),
            }
        }

        Ok(removed)
    }
}
