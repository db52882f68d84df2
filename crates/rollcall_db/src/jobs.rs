//! Import job operations: creation, queue claims, transitions and the
//! transactional chunk commit.

use crate::error::{DbError, Result};
use crate::{errors, ledger, RollcallDb};
use chrono::{DateTime, Utc};
use rollcall_protocol::types::{
    ErrorCategory, FileFingerprint, JobId, JobStatus, LedgerStatus, QueueClass,
};
use serde::Serialize;
use sqlx::Row;

/// A persisted import job.
#[derive(Debug, Clone, Serialize)]
pub struct ImportJob {
    pub id: JobId,
    pub filename: String,
    pub file_path: String,
    pub status: JobStatus,
    pub queue_class: QueueClass,
    pub total_rows: u64,
    pub processed_rows: u64,
    pub successful_rows: u64,
    pub error_rows: u64,
    pub last_processed_row: u64,
    pub fingerprint: FileFingerprint,
    pub attempts: u32,
    /// Unix seconds; the job is due when `next_attempt_at <= now`.
    pub next_attempt_at: i64,
    /// Unix seconds; no retry is scheduled past this point.
    pub retry_until: Option<i64>,
    pub resumption_metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

/// Input for job creation (the upload collaborator's side of the contract).
#[derive(Debug, Clone)]
pub struct NewJob {
    pub filename: String,
    pub file_path: String,
    pub fingerprint: FileFingerprint,
    /// Approximate row count reported by the uploader; used for queue
    /// routing only. The worker recomputes the exact count while streaming.
    pub reported_rows: u64,
}

/// One ledger write inside a chunk commit. Emails are case-folded by the
/// caller before they reach the store.
#[derive(Debug, Clone)]
pub struct LedgerWrite {
    pub row_number: u64,
    pub employee_number: Option<String>,
    pub email: Option<String>,
    pub status: LedgerStatus,
}

/// One error write inside a chunk commit.
#[derive(Debug, Clone)]
pub struct RowErrorWrite {
    pub row_number: u64,
    pub category: ErrorCategory,
    pub row_data: Option<serde_json::Value>,
}

/// Everything one chunk contributes, applied in a single transaction.
///
/// `successful_delta` is signed: a later in-file duplicate retroactively
/// reclassifies an earlier successful row, which subtracts one while the
/// winning row adds one.
#[derive(Debug, Clone, Default)]
pub struct ChunkCommit {
    pub processed_delta: u64,
    pub successful_delta: i64,
    pub error_delta: u64,
    pub last_processed_row: u64,
    /// Set on the final chunk once the exact row count is known.
    pub total_rows: Option<u64>,
    /// Free-form reader state (stream position, source format) carried for
    /// the next attempt. `None` leaves the stored value untouched.
    pub resumption_metadata: Option<serde_json::Value>,
    /// Earlier rows superseded by in-file duplicates, flipped to `skipped`.
    pub flip_to_skipped: Vec<u64>,
    pub ledger: Vec<LedgerWrite>,
    pub errors: Vec<RowErrorWrite>,
}

/// Store-wide job counts, by status.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobStats {
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl RollcallDb {
    /// Create a job in `pending`, routed to its size-class queue.
    pub async fn create_job(&self, new_job: NewJob) -> Result<ImportJob> {
        let id = JobId::generate();
        let queue_class = QueueClass::for_row_count(new_job.reported_rows);
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO import_jobs (
                id, filename, file_path, status, queue_class, total_rows,
                file_size, file_hash, file_last_modified, created_at
            ) VALUES (?, ?, ?, 'pending', ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&new_job.filename)
        .bind(&new_job.file_path)
        .bind(queue_class.as_str())
        .bind(new_job.reported_rows as i64)
        .bind(new_job.fingerprint.file_size as i64)
        .bind(&new_job.fingerprint.file_hash)
        .bind(new_job.fingerprint.file_last_modified)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.require_job(&id).await
    }

    pub async fn get_job(&self, id: &JobId) -> Result<Option<ImportJob>> {
        let row = sqlx::query("SELECT * FROM import_jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_job).transpose()
    }

    pub async fn require_job(&self, id: &JobId) -> Result<ImportJob> {
        self.get_job(id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("import job {id}")))
    }

    /// Atomically claim the next due job on a queue.
    ///
    /// The claim bumps `attempts` and pushes `next_attempt_at` past the
    /// attempt timeout, so a crashed worker's job (left `processing`)
    /// becomes due again on its own once the lease runs out. First claims
    /// stamp `started_at` and the retry window.
    pub async fn claim_due_job(
        &self,
        queue: QueueClass,
        now: i64,
        lease_secs: i64,
        retry_window_secs: i64,
    ) -> Result<Option<ImportJob>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id FROM import_jobs
            WHERE queue_class = ?
              AND status IN ('pending', 'processing')
              AND next_attempt_at <= ?
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(queue.as_str())
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let job_id: String = match row {
            Some(row) => row.get("id"),
            None => {
                tx.rollback().await?;
                return Ok(None);
            }
        };

        sqlx::query(
            r#"
            UPDATE import_jobs SET
                attempts = attempts + 1,
                next_attempt_at = ?,
                started_at = COALESCE(started_at, ?),
                retry_until = COALESCE(retry_until, ?)
            WHERE id = ?
            "#,
        )
        .bind(now + lease_secs)
        .bind(Utc::now())
        .bind(now + retry_window_secs)
        .bind(&job_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let id: JobId = job_id
            .parse()
            .map_err(|_| DbError::corrupt_row(format!("bad job id '{job_id}'")))?;
        Ok(Some(self.require_job(&id).await?))
    }

    pub async fn mark_processing(&self, id: &JobId) -> Result<()> {
        sqlx::query("UPDATE import_jobs SET status = 'processing' WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Return a job to the queue after a failed lock acquisition.
    /// Does not consume an attempt.
    pub async fn defer_job(&self, id: &JobId, now: i64, delay_secs: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE import_jobs SET
                status = 'pending',
                attempts = CASE WHEN attempts > 0 THEN attempts - 1 ELSE 0 END,
                next_attempt_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now + delay_secs)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Schedule a retry after a transient failure.
    pub async fn requeue_job(&self, id: &JobId, now: i64, backoff_secs: i64) -> Result<()> {
        sqlx::query(
            "UPDATE import_jobs SET status = 'pending', next_attempt_at = ? WHERE id = ?",
        )
        .bind(now + backoff_secs)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn complete_job(&self, id: &JobId) -> Result<()> {
        sqlx::query(
            "UPDATE import_jobs SET status = 'completed', completed_at = ? WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fail_job(&self, id: &JobId, reason: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE import_jobs SET
                status = 'failed',
                completed_at = ?,
                failure_reason = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(reason)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Wipe progress after a fingerprint mismatch: counters back to zero,
    /// fingerprint replaced by the recomputed one, stale ledger and error
    /// rows dropped so the fresh pass starts from a clean slate.
    pub async fn reset_progress(&self, id: &JobId, fingerprint: &FileFingerprint) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let job_id = id.to_string();

        sqlx::query(
            r#"
            UPDATE import_jobs SET
                processed_rows = 0,
                successful_rows = 0,
                error_rows = 0,
                last_processed_row = 0,
                resumption_metadata = NULL,
                file_size = ?,
                file_hash = ?,
                file_last_modified = ?
            WHERE id = ?
            "#,
        )
        .bind(fingerprint.file_size as i64)
        .bind(&fingerprint.file_hash)
        .bind(fingerprint.file_last_modified)
        .bind(&job_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM import_processed_records WHERE import_job_id = ?")
            .bind(&job_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM import_errors WHERE import_job_id = ?")
            .bind(&job_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Apply one chunk's worth of work atomically: duplicate flips first
    /// (freeing the per-key ledger slots), then ledger rows, then errors,
    /// then the counter update. Nothing is visible until commit.
    pub async fn commit_chunk(&self, id: &JobId, chunk: &ChunkCommit) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let job_id = id.to_string();
        let now = Utc::now();

        if !chunk.flip_to_skipped.is_empty() {
            ledger::flip_rows_to_skipped(&mut tx, &job_id, &chunk.flip_to_skipped).await?;
        }
        for write in &chunk.ledger {
            ledger::insert_entry(&mut tx, &job_id, write, now).await?;
        }
        for error in &chunk.errors {
            errors::insert_error(&mut tx, &job_id, error, now).await?;
        }

        let metadata = chunk
            .resumption_metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        sqlx::query(
            r#"
            UPDATE import_jobs SET
                processed_rows = processed_rows + ?,
                successful_rows = successful_rows + ?,
                error_rows = error_rows + ?,
                last_processed_row = ?,
                total_rows = COALESCE(?, total_rows),
                resumption_metadata = COALESCE(?, resumption_metadata)
            WHERE id = ?
            "#,
        )
        .bind(chunk.processed_delta as i64)
        .bind(chunk.successful_delta)
        .bind(chunk.error_delta as i64)
        .bind(chunk.last_processed_row as i64)
        .bind(chunk.total_rows.map(|t| t as i64))
        .bind(metadata)
        .bind(&job_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Delete a terminal job and, by cascade, its ledger, errors, resumption
    /// log and lock. Refused while the job could still be picked up.
    pub async fn delete_job(&self, id: &JobId) -> Result<()> {
        let job = self.require_job(id).await?;
        if !job.status.is_terminal() {
            return Err(DbError::invalid_state(format!(
                "job {id} is {}; only completed or failed jobs can be deleted",
                job.status
            )));
        }
        sqlx::query("DELETE FROM import_jobs WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn job_stats(&self) -> Result<JobStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) as total,
                SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END) as pending,
                SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END) as processing,
                SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END) as completed,
                SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) as failed
            FROM import_jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(JobStats {
            total: row.get::<i64, _>("total") as u64,
            pending: row.get::<Option<i64>, _>("pending").unwrap_or(0) as u64,
            processing: row.get::<Option<i64>, _>("processing").unwrap_or(0) as u64,
            completed: row.get::<Option<i64>, _>("completed").unwrap_or(0) as u64,
            failed: row.get::<Option<i64>, _>("failed").unwrap_or(0) as u64,
        })
    }
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<ImportJob> {
    let raw_id: String = row.get("id");
    let id: JobId = raw_id
        .parse()
        .map_err(|_| DbError::corrupt_row(format!("bad job id '{raw_id}'")))?;

    let status_str: String = row.get("status");
    let status = JobStatus::parse(&status_str)
        .ok_or_else(|| DbError::invalid_state(format!("Unknown job status: {status_str}")))?;

    let queue_str: String = row.get("queue_class");
    let queue_class = QueueClass::parse(&queue_str)
        .ok_or_else(|| DbError::invalid_state(format!("Unknown queue class: {queue_str}")))?;

    let resumption_metadata = row
        .get::<Option<String>, _>("resumption_metadata")
        .map(|raw| serde_json::from_str(&raw))
        .transpose()?;

    Ok(ImportJob {
        id,
        filename: row.get("filename"),
        file_path: row.get("file_path"),
        status,
        queue_class,
        total_rows: row.get::<i64, _>("total_rows") as u64,
        processed_rows: row.get::<i64, _>("processed_rows") as u64,
        successful_rows: row.get::<i64, _>("successful_rows") as u64,
        error_rows: row.get::<i64, _>("error_rows") as u64,
        last_processed_row: row.get::<i64, _>("last_processed_row") as u64,
        fingerprint: FileFingerprint {
            file_size: row.get::<i64, _>("file_size") as u64,
            file_hash: row.get("file_hash"),
            file_last_modified: row.get("file_last_modified"),
        },
        attempts: row.get::<i64, _>("attempts") as u32,
        next_attempt_at: row.get("next_attempt_at"),
        retry_until: row.get("retry_until"),
        resumption_metadata,
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        failure_reason: row.get("failure_reason"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use rollcall_protocol::types::DuplicateKey;

    fn fingerprint() -> FileFingerprint {
        FileFingerprint {
            file_size: 128,
            file_hash: "ab".repeat(32),
            file_last_modified: Utc::now()
                .with_nanosecond(0)
                .expect("zeroing nanos is infallible"),
        }
    }

    fn new_job(rows: u64) -> NewJob {
        NewJob {
            filename: "staff.csv".to_string(),
            file_path: "/tmp/staff.csv".to_string(),
            fingerprint: fingerprint(),
            reported_rows: rows,
        }
    }

    #[tokio::test]
    async fn create_routes_by_reported_rows() {
        let db = RollcallDb::open_memory().await.unwrap();
        let small = db.create_job(new_job(10)).await.unwrap();
        let large = db.create_job(new_job(20_000)).await.unwrap();

        assert_eq!(small.queue_class, QueueClass::Small);
        assert_eq!(small.status, JobStatus::Pending);
        assert_eq!(large.queue_class, QueueClass::Large);
        assert_eq!(small.fingerprint, fingerprint());
    }

    #[tokio::test]
    async fn claim_is_exclusive_and_leases() {
        let db = RollcallDb::open_memory().await.unwrap();
        let job = db.create_job(new_job(10)).await.unwrap();
        let now = Utc::now().timestamp();

        let claimed = db
            .claim_due_job(QueueClass::Small, now, 3_600, 7_200)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.attempts, 1);
        assert!(claimed.started_at.is_some());
        assert_eq!(claimed.retry_until, Some(now + 7_200));

        // Leased: not due again until the lease expires.
        let second = db
            .claim_due_job(QueueClass::Small, now, 3_600, 7_200)
            .await
            .unwrap();
        assert!(second.is_none());

        // ...but due after it.
        let later = db
            .claim_due_job(QueueClass::Small, now + 3_601, 3_600, 7_200)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(later.attempts, 2);
    }

    #[tokio::test]
    async fn defer_returns_attempt() {
        let db = RollcallDb::open_memory().await.unwrap();
        let job = db.create_job(new_job(10)).await.unwrap();
        let now = Utc::now().timestamp();

        db.claim_due_job(QueueClass::Small, now, 3_600, 7_200)
            .await
            .unwrap()
            .unwrap();
        db.defer_job(&job.id, now, 30).await.unwrap();

        let reloaded = db.require_job(&job.id).await.unwrap();
        assert_eq!(reloaded.attempts, 0);
        assert_eq!(reloaded.next_attempt_at, now + 30);
        assert_eq!(reloaded.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn chunk_commit_is_atomic_and_cumulative() {
        let db = RollcallDb::open_memory().await.unwrap();
        let job = db.create_job(new_job(10)).await.unwrap();

        let chunk = ChunkCommit {
            processed_delta: 3,
            successful_delta: 2,
            error_delta: 1,
            last_processed_row: 3,
            ledger: vec![
                LedgerWrite {
                    row_number: 1,
                    employee_number: Some("E1".into()),
                    email: Some("a@x.co".into()),
                    status: LedgerStatus::Processed,
                },
                LedgerWrite {
                    row_number: 2,
                    employee_number: Some("E2".into()),
                    email: Some("b@x.co".into()),
                    status: LedgerStatus::Processed,
                },
                LedgerWrite {
                    row_number: 3,
                    employee_number: None,
                    email: None,
                    status: LedgerStatus::Error,
                },
            ],
            errors: vec![RowErrorWrite {
                row_number: 3,
                category: ErrorCategory::Validation {
                    field: "salary".into(),
                    message: "not a number".into(),
                },
                row_data: None,
            }],
            ..Default::default()
        };
        db.commit_chunk(&job.id, &chunk).await.unwrap();

        let reloaded = db.require_job(&job.id).await.unwrap();
        assert_eq!(reloaded.processed_rows, 3);
        assert_eq!(reloaded.successful_rows, 2);
        assert_eq!(reloaded.error_rows, 1);
        assert_eq!(reloaded.last_processed_row, 3);
        assert!(db
            .was_employee_number_processed(&job.id, "E1")
            .await
            .unwrap());

        // Second chunk flips row 1 to skipped (duplicate superseded by row 4)
        // and reclassifies it: successful 2 -> 2 (new win replaces the flip).
        let chunk2 = ChunkCommit {
            processed_delta: 1,
            successful_delta: 0,
            error_delta: 1,
            last_processed_row: 4,
            total_rows: Some(4),
            flip_to_skipped: vec![1],
            ledger: vec![LedgerWrite {
                row_number: 4,
                employee_number: Some("E1".into()),
                email: Some("a2@x.co".into()),
                status: LedgerStatus::Processed,
            }],
            errors: vec![RowErrorWrite {
                row_number: 1,
                category: ErrorCategory::Duplicate {
                    key: DuplicateKey::EmployeeNumber,
                    superseded_by_row: 4,
                },
                row_data: None,
            }],
            ..Default::default()
        };
        db.commit_chunk(&job.id, &chunk2).await.unwrap();

        let reloaded = db.require_job(&job.id).await.unwrap();
        assert_eq!(reloaded.processed_rows, 4);
        assert_eq!(reloaded.successful_rows, 2);
        assert_eq!(reloaded.error_rows, 2);
        assert_eq!(reloaded.total_rows, 4);
        assert_eq!(
            reloaded.processed_rows,
            reloaded.successful_rows + reloaded.error_rows
        );
    }

    #[tokio::test]
    async fn reset_progress_clears_children_and_counters() {
        let db = RollcallDb::open_memory().await.unwrap();
        let job = db.create_job(new_job(10)).await.unwrap();

        let chunk = ChunkCommit {
            processed_delta: 1,
            successful_delta: 1,
            error_delta: 0,
            last_processed_row: 1,
            ledger: vec![LedgerWrite {
                row_number: 1,
                employee_number: Some("E1".into()),
                email: Some("a@x.co".into()),
                status: LedgerStatus::Processed,
            }],
            ..Default::default()
        };
        db.commit_chunk(&job.id, &chunk).await.unwrap();

        let mut changed = fingerprint();
        changed.file_hash = "cd".repeat(32);
        db.reset_progress(&job.id, &changed).await.unwrap();

        let reloaded = db.require_job(&job.id).await.unwrap();
        assert_eq!(reloaded.processed_rows, 0);
        assert_eq!(reloaded.last_processed_row, 0);
        assert_eq!(reloaded.fingerprint.file_hash, changed.file_hash);
        assert!(!db
            .was_employee_number_processed(&job.id, "E1")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn delete_refuses_active_jobs_and_cascades() {
        let db = RollcallDb::open_memory().await.unwrap();
        let job = db.create_job(new_job(10)).await.unwrap();

        assert!(matches!(
            db.delete_job(&job.id).await,
            Err(DbError::InvalidState(_))
        ));

        db.complete_job(&job.id).await.unwrap();
        db.delete_job(&job.id).await.unwrap();
        assert!(db.get_job(&job.id).await.unwrap().is_none());
    }
}
