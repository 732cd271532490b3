//! Periodic reconciliation between object storage and the processing log.
//!
//! The sweep runs in three phases: return stale `processing` locks to
//! `pending`, register files under the watched prefixes that the log has
//! never seen, and re-queue failed entries with retries remaining. The
//! returned report carries the paths the caller should now process.

use tracing::{debug, info, warn};

use raster_common::RasterResult;
use storage::{parse_incoming, IngestLog, IngestLogEntry, ObjectStorage, WATCHED_PREFIXES};

/// Failed entries re-queued per sweep.
const RETRY_BATCH: i64 = 50;

/// What one sweep pass found.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    /// Stale processing locks returned to pending.
    pub stale_reset: u64,
    /// Newly registered paths, ready for a first attempt.
    pub discovered: Vec<String>,
    /// Previously failed paths with retries remaining.
    pub retried: Vec<String>,
    /// Entries out of retries, left for manual intervention.
    pub permanently_failed: u64,
}

impl SweepReport {
    /// All paths the caller should process, discoveries first.
    pub fn work(&self) -> impl Iterator<Item = &String> {
        self.discovered.iter().chain(self.retried.iter())
    }
}

/// Reconcile the log against storage and collect processable work.
pub async fn sweep(storage: &ObjectStorage, log: &IngestLog) -> RasterResult<SweepReport> {
    let stale_reset = log.reset_stale_locks().await?;
    if stale_reset > 0 {
        warn!(count = stale_reset, "Reset stale processing locks");
    }

    let mut discovered = Vec::new();
    for prefix in WATCHED_PREFIXES {
        for path in storage.list(prefix).await? {
            if is_hidden(&path) {
                continue;
            }
            let parsed = match parse_incoming(&path) {
                Ok(parsed) => parsed,
                Err(e) => {
                    debug!(path = %path, error = %e, "Skipping invalid source path");
                    continue;
                }
            };
            if log.is_known(&parsed.bucket, &path).await? {
                continue;
            }
            if log.register(&parsed.bucket, &path).await? {
                info!(path = %path, "Discovered new source file");
                discovered.push(path);
            }
        }
    }

    let mut retried = Vec::new();
    for entry in log.get_retryable(RETRY_BATCH).await? {
        info!(
            path = %entry.file_path,
            retry = entry.retry_count,
            max_retries = storage::MAX_RETRIES,
            error = %error_excerpt(&entry),
            "Re-queueing failed file"
        );
        retried.push(entry.file_path);
    }

    let permanently_failed = log.get_permanently_failed().await?.len() as u64;

    info!(
        stale_reset,
        discovered = discovered.len(),
        retried = retried.len(),
        permanently_failed,
        "Sweep complete"
    );

    Ok(SweepReport {
        stale_reset,
        discovered,
        retried,
        permanently_failed,
    })
}

/// Paths with a dot-prefixed segment are placeholders (`.keep`) or hidden
/// files and never enter the log.
fn is_hidden(path: &str) -> bool {
    path.split('/').any(|segment| segment.starts_with('.'))
}

fn error_excerpt(entry: &IngestLogEntry) -> String {
    entry
        .last_error
        .as_deref()
        .unwrap_or("")
        .chars()
        .take(100)
        .collect()
}
