//! Progress snapshots and the fast-read cache.
//!
//! The durable counters on `import_jobs` are the source of truth; the cache
//! only ever holds values that were just committed. A miss falls back to the
//! database and repopulates.

use crate::error::Result;
use crate::RollcallDb;
use chrono::{DateTime, Utc};
use rollcall_protocol::http_types::JobProgress;
use rollcall_protocol::types::{JobId, JobStatus};
use serde::Serialize;
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Read model for per-job progress.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub id: JobId,
    pub status: JobStatus,
    pub total_rows: u64,
    pub processed_rows: u64,
    pub successful_rows: u64,
    pub error_rows: u64,
    pub last_processed_row: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProgressSnapshot {
    /// Completion percentage, rounded to two fraction digits.
    pub fn percentage(&self) -> f64 {
        if self.total_rows == 0 {
            return 0.0;
        }
        let raw = self.processed_rows as f64 / self.total_rows as f64 * 100.0;
        (raw * 100.0).round() / 100.0
    }

    pub fn to_http(&self) -> JobProgress {
        JobProgress {
            id: self.id,
            status: self.status,
            total_rows: self.total_rows,
            processed_rows: self.processed_rows,
            successful_rows: self.successful_rows,
            error_rows: self.error_rows,
            percentage: self.percentage(),
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

impl RollcallDb {
    /// Durable progress read, straight from `import_jobs`.
    pub async fn load_progress(&self, job: &JobId) -> Result<Option<ProgressSnapshot>> {
        let row = sqlx::query(
            r#"SELECT status, total_rows, processed_rows, successful_rows, error_rows,
                      last_processed_row, started_at, completed_at
               FROM import_jobs WHERE id = ?"#,
        )
        .bind(job.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let status_str: String = row.get("status");
            let status = JobStatus::parse(&status_str).ok_or_else(|| {
                crate::DbError::invalid_state(format!("Unknown job status: {status_str}"))
            })?;
            Ok(ProgressSnapshot {
                id: *job,
                status,
                total_rows: row.get::<i64, _>("total_rows") as u64,
                processed_rows: row.get::<i64, _>("processed_rows") as u64,
                successful_rows: row.get::<i64, _>("successful_rows") as u64,
                error_rows: row.get::<i64, _>("error_rows") as u64,
                last_processed_row: row.get::<i64, _>("last_processed_row") as u64,
                started_at: row.get("started_at"),
                completed_at: row.get("completed_at"),
            })
        })
        .transpose()
    }
}

struct CacheSlot {
    cached_at: Instant,
    snapshot: ProgressSnapshot,
}

/// In-process TTL cache in front of the durable counters.
///
/// Writers call [`ProgressCache::put`] right after a chunk commit, never
/// before; readers treat an expired or missing slot as a plain durable read.
pub struct ProgressCache {
    ttl: Duration,
    slots: Mutex<HashMap<JobId, CacheSlot>>,
}

impl ProgressCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Write-through entry point; call only with just-committed values.
    pub fn put(&self, snapshot: ProgressSnapshot) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.insert(
            snapshot.id,
            CacheSlot {
                cached_at: Instant::now(),
                snapshot,
            },
        );
    }

    pub fn invalidate(&self, job: &JobId) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.remove(job);
    }

    /// Cached read with durable fallback and repopulation.
    pub async fn get(&self, db: &RollcallDb, job: &JobId) -> Result<Option<ProgressSnapshot>> {
        {
            let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(slot) = slots.get(job) {
                if slot.cached_at.elapsed() < self.ttl {
                    return Ok(Some(slot.snapshot.clone()));
                }
            }
        }

        let snapshot = db.load_progress(job).await?;
        if let Some(snapshot) = &snapshot {
            self.put(snapshot.clone());
        } else {
            self.invalidate(job);
        }
        Ok(snapshot)
    }
}
