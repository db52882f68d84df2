//! Canonical default values shared across the engine.

/// Default state store location.
pub const DEFAULT_DB_URL: &str = "sqlite:rollcall.db?mode=rwc";

/// Field delimiter for delimited-text files.
pub const CSV_DELIMITER: u8 = b',';
/// Rows per chunk for delimited-text files.
pub const CSV_CHUNK_ROWS: usize = 100;
/// Rows per chunk for workbook files.
pub const WORKBOOK_CHUNK_ROWS: usize = 50;

/// Job lock time-to-live. Renewal must happen at least every TTL/2.
pub const LOCK_TTL_SECS: u64 = 90;
/// Delay before a job that lost the lock race is retried.
pub const LOCK_RETRY_DELAY_SECS: u64 = 30;

/// Attempts per job before it fails permanently.
pub const MAX_ATTEMPTS: u32 = 3;
/// Backoff between attempts, indexed by the attempt that just failed.
pub const RETRY_BACKOFF_SECS: [u64; 3] = [30, 60, 120];
/// No retries are scheduled past this window from the first start.
pub const RETRY_WINDOW_SECS: u64 = 2 * 60 * 60;
/// Hard wall-clock cap for a single attempt.
pub const ATTEMPT_TIMEOUT_SECS: u64 = 3_600;

/// Upload caps enforced before a job is created.
pub const MAX_UPLOAD_BYTES: u64 = 20 * 1024 * 1024;
pub const MAX_ROWS: u64 = 50_000;

/// Progress fast-read cache TTL.
pub const PROGRESS_CACHE_TTL_SECS: u64 = 3_600;

/// Per-queue worker concurrency.
pub const SMALL_QUEUE_WORKERS: usize = 4;
pub const MEDIUM_QUEUE_WORKERS: usize = 2;
pub const LARGE_QUEUE_WORKERS: usize = 1;

/// Idle dispatcher poll interval in milliseconds.
pub const DISPATCH_POLL_MS: u64 = 500;

/// Columns every import file must carry (after header folding).
pub const REQUIRED_COLUMNS: [&str; 4] = ["employee_number", "first_name", "last_name", "email"];
