//! Engine configuration shared by the dispatcher, worker and CLI.

use crate::defaults;
use std::path::PathBuf;
use std::time::Duration;

/// Canonical engine configuration. Plain data; binaries build one from CLI
/// flags and pass it down.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// State store URL (sqlite:...)
    pub db_url: String,
    /// Directory uploaded files are stored under.
    pub upload_dir: PathBuf,
    /// Field delimiter for delimited-text files.
    pub csv_delimiter: u8,
    /// Rows per chunk for delimited-text files.
    pub csv_chunk_rows: usize,
    /// Rows per chunk for workbook files.
    pub workbook_chunk_rows: usize,
    /// Job lock TTL.
    pub lock_ttl: Duration,
    /// Requeue delay after a failed lock acquisition.
    pub lock_retry_delay: Duration,
    /// Attempts per job before permanent failure.
    pub max_attempts: u32,
    /// Backoff schedule between attempts.
    pub retry_backoff: [Duration; 3],
    /// No retries scheduled past this window from the first start.
    pub retry_window: Duration,
    /// Wall-clock cap for a single attempt.
    pub attempt_timeout: Duration,
    /// Upload size cap in bytes.
    pub max_upload_bytes: u64,
    /// Upload row-count cap.
    pub max_rows: u64,
    /// Progress fast-read cache TTL.
    pub progress_cache_ttl: Duration,
    /// Worker concurrency per size-class queue (small, medium, large).
    pub queue_workers: [usize; 3],
    /// Idle dispatcher poll interval.
    pub dispatch_poll: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_url: defaults::DEFAULT_DB_URL.to_string(),
            upload_dir: PathBuf::from("uploads"),
            csv_delimiter: defaults::CSV_DELIMITER,
            csv_chunk_rows: defaults::CSV_CHUNK_ROWS,
            workbook_chunk_rows: defaults::WORKBOOK_CHUNK_ROWS,
            lock_ttl: Duration::from_secs(defaults::LOCK_TTL_SECS),
            lock_retry_delay: Duration::from_secs(defaults::LOCK_RETRY_DELAY_SECS),
            max_attempts: defaults::MAX_ATTEMPTS,
            retry_backoff: defaults::RETRY_BACKOFF_SECS.map(Duration::from_secs),
            retry_window: Duration::from_secs(defaults::RETRY_WINDOW_SECS),
            attempt_timeout: Duration::from_secs(defaults::ATTEMPT_TIMEOUT_SECS),
            max_upload_bytes: defaults::MAX_UPLOAD_BYTES,
            max_rows: defaults::MAX_ROWS,
            progress_cache_ttl: Duration::from_secs(defaults::PROGRESS_CACHE_TTL_SECS),
            queue_workers: [
                defaults::SMALL_QUEUE_WORKERS,
                defaults::MEDIUM_QUEUE_WORKERS,
                defaults::LARGE_QUEUE_WORKERS,
            ],
            dispatch_poll: Duration::from_millis(defaults::DISPATCH_POLL_MS),
        }
    }
}

impl EngineConfig {
    /// Backoff before the next attempt, given how many attempts have run.
    /// Saturates at the last entry of the schedule.
    pub fn backoff_after(&self, attempts_so_far: u32) -> Duration {
        let idx = (attempts_so_far.saturating_sub(1) as usize).min(self.retry_backoff.len() - 1);
        self.retry_backoff[idx]
    }

    /// Chunk size for the given file extension.
    pub fn chunk_rows_for(&self, is_workbook: bool) -> usize {
        if is_workbook {
            self.workbook_chunk_rows
        } else {
            self.csv_chunk_rows
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_saturates() {
        let config = EngineConfig::default();
        assert_eq!(config.backoff_after(1), Duration::from_secs(30));
        assert_eq!(config.backoff_after(2), Duration::from_secs(60));
        assert_eq!(config.backoff_after(3), Duration::from_secs(120));
        assert_eq!(config.backoff_after(9), Duration::from_secs(120));
    }
}
