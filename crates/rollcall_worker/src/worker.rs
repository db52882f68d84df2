//! The import worker: drives one job attempt through the whole pipeline.
//!
//! Attempt shape: idempotency gate, lock, integrity, resume pre-scan, then
//! sequential chunks of validate -> dedupe -> upsert with one transactional
//! commit per chunk, a progress-cache write-through and a lock renewal after
//! each. Row-local faults are recorded and the stream continues; persistence
//! faults abort the chunk and surface as a retryable attempt.

use crate::cancel::CancellationToken;
use crate::dedupe::DuplicateDetector;
use crate::integrity::{compute_fingerprint, verify_fingerprint, IntegrityOutcome};
use crate::reader::{is_workbook_path, open_reader, ReadError, RowItem};
use crate::validate::validate_row;
use chrono::Utc;
use rollcall_db::{
    ChunkCommit, DbError, LedgerWrite, ProgressCache, ResumptionEvent, RollcallDb, RowErrorWrite,
};
use rollcall_protocol::types::{
    ErrorCategory, JobId, LedgerStatus, RawRow, ResumptionEventType,
};
use rollcall_protocol::EngineConfig;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How one attempt ended, as seen by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// EOF reached; the job is `completed`.
    Completed,
    /// The job was already terminal (or unknown); nothing was done.
    AlreadyTerminal,
    /// The job lock was held elsewhere; redeliver after a short delay.
    Deferred,
    /// Transient failure; the dispatcher decides between backoff and
    /// permanent failure.
    Retry(String),
    /// Permanent failure; the job is already `failed`.
    Failed(String),
}

enum AttemptError {
    Transient(String),
    Permanent(String),
}

fn db_transient(e: DbError) -> AttemptError {
    AttemptError::Transient(format!("state store failure: {e}"))
}

fn classify_read(e: ReadError) -> AttemptError {
    if e.is_transient() {
        AttemptError::Transient(e.to_string())
    } else {
        AttemptError::Permanent(e.to_string())
    }
}

/// Worker bound to one state store and configuration. Cheap to clone per
/// queue task.
#[derive(Clone)]
pub struct ImportWorker {
    db: RollcallDb,
    cache: Arc<ProgressCache>,
    config: EngineConfig,
    owner: String,
}

impl ImportWorker {
    pub fn new(
        db: RollcallDb,
        cache: Arc<ProgressCache>,
        config: EngineConfig,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            db,
            cache,
            config,
            owner: owner.into(),
        }
    }

    /// Run one attempt for a claimed job. Never panics the caller's loop:
    /// every failure mode folds into an [`AttemptOutcome`].
    pub async fn run_attempt(&self, job_id: &JobId, cancel: &CancellationToken) -> AttemptOutcome {
        match self.attempt(job_id, cancel).await {
            Ok(outcome) => outcome,
            Err(AttemptError::Transient(message)) => {
                warn!(%job_id, %message, "attempt failed; retryable");
                self.log_event(
                    job_id,
                    ResumptionEventType::Failure,
                    None,
                    format!("retryable: {message}"),
                )
                .await;
                AttemptOutcome::Retry(message)
            }
            Err(AttemptError::Permanent(message)) => {
                warn!(%job_id, %message, "attempt failed permanently");
                if let Err(e) = fail_permanently(&self.db, job_id, &message).await {
                    warn!(%job_id, "could not record permanent failure: {e}");
                }
                self.cache.invalidate(job_id);
                AttemptOutcome::Failed(message)
            }
        }
    }

    async fn attempt(
        &self,
        job_id: &JobId,
        cancel: &CancellationToken,
    ) -> Result<AttemptOutcome, AttemptError> {
        // Idempotency gate: terminal jobs are never reworked.
        let job = match self.db.get_job(job_id).await.map_err(db_transient)? {
            Some(job) => job,
            None => {
                warn!(%job_id, "claimed job no longer exists");
                return Ok(AttemptOutcome::AlreadyTerminal);
            }
        };
        if job.status.is_terminal() {
            debug!(%job_id, status = %job.status, "job already terminal");
            return Ok(AttemptOutcome::AlreadyTerminal);
        }

        let attempt = job.attempts.max(1);
        self.log_event(
            job_id,
            ResumptionEventType::Attempt,
            Some(job.last_processed_row + 1),
            format!("attempt {attempt} starting"),
        )
        .await;

        let ttl = self.config.lock_ttl.as_secs() as i64;
        let token = match self
            .db
            .try_acquire_job_lock(job_id, &self.owner, ttl)
            .await
            .map_err(db_transient)?
        {
            Some(token) => token,
            None => {
                self.log_event(
                    job_id,
                    ResumptionEventType::Failure,
                    None,
                    "job lock held by another worker".to_string(),
                )
                .await;
                return Ok(AttemptOutcome::Deferred);
            }
        };

        // Guaranteed-release scope: whatever happens inside, the lock goes
        // back before the outcome propagates.
        let result = self.locked_attempt(&job.id, &token, cancel).await;
        if let Err(e) = self.db.release_job_lock(job_id, &token).await {
            warn!(%job_id, "failed to release job lock: {e}");
        }
        result
    }

    async fn locked_attempt(
        &self,
        job_id: &JobId,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<AttemptOutcome, AttemptError> {
        let mut job = self.db.require_job(job_id).await.map_err(db_transient)?;
        let path = Path::new(&job.file_path).to_path_buf();

        // Integrity gate.
        match verify_fingerprint(&path, &job.fingerprint) {
            Ok(IntegrityOutcome::Match) => {
                self.log_event(
                    job_id,
                    ResumptionEventType::IntegrityCheck,
                    Some(job.last_processed_row + 1),
                    "fingerprint verified".to_string(),
                )
                .await;
            }
            Ok(IntegrityOutcome::Mismatch { fields, actual }) => {
                self.log_event(
                    job_id,
                    ResumptionEventType::Failure,
                    None,
                    format!("resumption refused; fingerprint changed: {}", fields.join(", ")),
                )
                .await;

                // Start fresh only if the new fingerprint holds still.
                let recheck = compute_fingerprint(&path).map_err(|e| {
                    AttemptError::Transient(format!("could not re-fingerprint file: {e}"))
                })?;
                if recheck != actual {
                    return Err(AttemptError::Permanent(
                        "file is still changing; refusing to import".to_string(),
                    ));
                }
                self.db
                    .reset_progress(job_id, &actual)
                    .await
                    .map_err(db_transient)?;
                self.cache.invalidate(job_id);
                job = self.db.require_job(job_id).await.map_err(db_transient)?;
                info!(%job_id, "progress reset; starting fresh from row 1");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AttemptError::Permanent(format!(
                    "source file missing: {}",
                    path.display()
                )));
            }
            Err(e) => {
                return Err(AttemptError::Transient(format!(
                    "could not read source file: {e}"
                )));
            }
        }

        self.db.mark_processing(job_id).await.map_err(db_transient)?;

        let workbook = is_workbook_path(&path);
        let chunk_rows = self.config.chunk_rows_for(workbook);
        let mut reader = open_reader(&path, self.config.csv_delimiter).map_err(classify_read)?;
        let today = Utc::now().date_naive();
        let source = if workbook { "workbook" } else { "delimited" };

        // Resume pre-scan: read-and-discard the committed prefix, rebuilding
        // in-file duplicate state from its valid rows so last-wins holds
        // across the checkpoint.
        let resume_from = job.last_processed_row + 1;
        let mut detector = DuplicateDetector::new();
        while reader.rows_produced() + 1 < resume_from {
            match reader.next_item().map_err(classify_read)? {
                None => break,
                Some(RowItem::Malformed { .. }) => {}
                Some(RowItem::Row(raw)) => {
                    if let Ok(record) = validate_row(&raw, reader.header(), today) {
                        detector.observe(
                            raw.row_number,
                            &record.employee_number,
                            &record.email_lower(),
                        );
                    }
                }
            }
        }
        if job.last_processed_row > 0 {
            info!(%job_id, resume_from, "resuming mid-file");
        }

        let mut last_row = job.last_processed_row;

        loop {
            // Cancellation and the attempt deadline are only observed here,
            // between chunks.
            if cancel.is_cancelled() {
                let reason = if cancel.deadline_exceeded() {
                    "attempt timed out"
                } else {
                    "cancelled"
                };
                return Err(AttemptError::Transient(reason.to_string()));
            }

            let items = reader.next_chunk(chunk_rows).map_err(classify_read)?;
            if items.is_empty() {
                break;
            }

            let mut commit = ChunkCommit {
                last_processed_row: last_row,
                ..Default::default()
            };

            for item in items {
                match item {
                    RowItem::Malformed {
                        row_number,
                        message,
                    } => {
                        if self
                            .db
                            .was_row_processed(job_id, row_number)
                            .await
                            .map_err(db_transient)?
                        {
                            continue;
                        }
                        commit.errors.push(RowErrorWrite {
                            row_number,
                            category: ErrorCategory::Format { message },
                            row_data: None,
                        });
                        commit.ledger.push(LedgerWrite {
                            row_number,
                            employee_number: None,
                            email: None,
                            status: LedgerStatus::Error,
                        });
                        commit.processed_delta += 1;
                        commit.error_delta += 1;
                        last_row = row_number;
                    }
                    RowItem::Row(raw) => {
                        let row_number = raw.row_number;
                        if self
                            .db
                            .was_row_processed(job_id, row_number)
                            .await
                            .map_err(db_transient)?
                        {
                            // Replay of a committed row: already counted.
                            continue;
                        }
                        self.process_row(job_id, &raw, reader.header(), today, &mut detector, &mut commit)
                            .await?;
                        last_row = row_number;
                    }
                }
            }

            commit.last_processed_row = last_row;
            commit.resumption_metadata = Some(serde_json::json!({
                "source": source,
                "rows_streamed": reader.rows_produced(),
            }));
            self.db
                .commit_chunk(job_id, &commit)
                .await
                .map_err(db_transient)?;

            // Cache is written only with just-committed values.
            if let Some(snapshot) = self.db.load_progress(job_id).await.map_err(db_transient)? {
                self.cache.put(snapshot);
            }

            let renewed = self
                .db
                .renew_job_lock(job_id, token, ttl_secs(&self.config))
                .await
                .map_err(db_transient)?;
            self.log_event(
                job_id,
                ResumptionEventType::LockRenewal,
                None,
                if renewed {
                    "lock renewed".to_string()
                } else {
                    "lock lost".to_string()
                },
            )
            .await;
            if !renewed {
                return Err(AttemptError::Transient(
                    "job lock lost; yielding to the next attempt".to_string(),
                ));
            }
        }

        // EOF: the streamed count is the exact total.
        let final_commit = ChunkCommit {
            last_processed_row: last_row,
            total_rows: Some(reader.rows_produced()),
            ..Default::default()
        };
        self.db
            .commit_chunk(job_id, &final_commit)
            .await
            .map_err(db_transient)?;
        self.db.complete_job(job_id).await.map_err(db_transient)?;

        self.cache.invalidate(job_id);
        if let Some(snapshot) = self.db.load_progress(job_id).await.map_err(db_transient)? {
            self.cache.put(snapshot);
        }

        self.log_event(
            job_id,
            ResumptionEventType::Success,
            None,
            format!("import completed at row {last_row}"),
        )
        .await;
        info!(%job_id, rows = last_row, "import completed");

        Ok(AttemptOutcome::Completed)
    }

    /// One decoded row through validate -> dedupe -> upsert, accumulating
    /// into the pending chunk commit.
    async fn process_row(
        &self,
        job_id: &JobId,
        raw: &RawRow,
        header: &crate::reader::Header,
        today: chrono::NaiveDate,
        detector: &mut DuplicateDetector,
        commit: &mut ChunkCommit,
    ) -> Result<(), AttemptError> {
        let row_number = raw.row_number;

        let record = match validate_row(raw, header, today) {
            Err(field_errors) => {
                for field_error in field_errors {
                    commit.errors.push(RowErrorWrite {
                        row_number,
                        category: ErrorCategory::Validation {
                            field: field_error.field,
                            message: field_error.message,
                        },
                        row_data: Some(raw.to_json()),
                    });
                }
                commit.ledger.push(LedgerWrite {
                    row_number,
                    employee_number: None,
                    email: None,
                    status: LedgerStatus::Error,
                });
                commit.processed_delta += 1;
                commit.error_delta += 1;
                return Ok(());
            }
            Ok(record) => record,
        };

        let email_lower = record.email_lower();
        let priors = detector.observe(row_number, &record.employee_number, &email_lower);

        if !priors.is_empty() {
            // Last wins: earlier occurrences become duplicate errors, one
            // per conflicting key; their rows flip to skipped.
            let mut flipped: Vec<u64> = priors.iter().map(|p| p.prior_row).collect();
            flipped.sort_unstable();
            flipped.dedup();

            for prior in &priors {
                commit.errors.push(RowErrorWrite {
                    row_number: prior.prior_row,
                    category: ErrorCategory::Duplicate {
                        key: prior.key,
                        superseded_by_row: row_number,
                    },
                    row_data: None,
                });
            }
            for prior_row in flipped {
                if let Some(pending) = commit
                    .ledger
                    .iter_mut()
                    .find(|w| w.row_number == prior_row)
                {
                    pending.status = LedgerStatus::Skipped;
                } else {
                    commit.flip_to_skipped.push(prior_row);
                }
                // The earlier row's success becomes an error.
                commit.successful_delta -= 1;
                commit.error_delta += 1;
            }
        } else {
            // At-most-once per employee key across attempts: a key already
            // persisted by this job (and not superseded in-file) means this
            // row was effectively applied; count it without re-upserting.
            let number_done = self
                .db
                .was_employee_number_processed(job_id, &record.employee_number)
                .await
                .map_err(db_transient)?;
            let email_done = self
                .db
                .was_email_processed(job_id, &email_lower)
                .await
                .map_err(db_transient)?;
            if number_done || email_done {
                commit.processed_delta += 1;
                commit.successful_delta += 1;
                return Ok(());
            }
        }

        match self.db.upsert_employee(&record).await {
            Ok(_) => {
                commit.ledger.push(LedgerWrite {
                    row_number,
                    employee_number: Some(record.employee_number.clone()),
                    email: Some(email_lower),
                    status: LedgerStatus::Processed,
                });
                commit.processed_delta += 1;
                commit.successful_delta += 1;
            }
            Err(DbError::Constraint(message)) => {
                commit.errors.push(RowErrorWrite {
                    row_number,
                    category: ErrorCategory::BusinessRule { message },
                    row_data: Some(raw.to_json()),
                });
                commit.ledger.push(LedgerWrite {
                    row_number,
                    employee_number: Some(record.employee_number.clone()),
                    email: Some(email_lower),
                    status: LedgerStatus::Error,
                });
                commit.processed_delta += 1;
                commit.error_delta += 1;
            }
            Err(e) => {
                // Persistence failure: the whole chunk aborts uncommitted.
                return Err(AttemptError::Transient(format!(
                    "persistence failure at row {row_number}: {e}"
                )));
            }
        }
        Ok(())
    }

    async fn log_event(
        &self,
        job_id: &JobId,
        event_type: ResumptionEventType,
        resumed_from_row: Option<u64>,
        details: String,
    ) {
        let attempt_number = match self.db.get_job(job_id).await {
            Ok(Some(job)) => job.attempts,
            _ => 0,
        };
        let event = ResumptionEvent {
            event_type,
            attempt_number,
            resumed_from_row,
            details: Some(details),
            metadata: None,
        };
        if let Err(e) = self.db.append_resumption_event(job_id, event).await {
            warn!(%job_id, "could not append resumption event: {e}");
        }
    }
}

fn ttl_secs(config: &EngineConfig) -> i64 {
    config.lock_ttl.as_secs() as i64
}

/// Permanently fail a job: a single system error appended at
/// `last_processed_row + 1`, the terminal transition, and a failure event.
/// Shared with the dispatcher for the retries-exhausted path.
pub async fn fail_permanently(
    db: &RollcallDb,
    job_id: &JobId,
    reason: &str,
) -> Result<(), DbError> {
    let job = db.require_job(job_id).await?;
    let commit = ChunkCommit {
        last_processed_row: job.last_processed_row,
        errors: vec![RowErrorWrite {
            row_number: job.last_processed_row + 1,
            category: ErrorCategory::System {
                message: reason.to_string(),
            },
            row_data: None,
        }],
        ..Default::default()
    };
    db.commit_chunk(&job.id, &commit).await?;
    db.fail_job(&job.id, reason).await?;
    db.append_resumption_event(
        &job.id,
        ResumptionEvent {
            event_type: ResumptionEventType::Failure,
            attempt_number: job.attempts,
            resumed_from_row: None,
            details: Some(reason.to_string()),
            metadata: None,
        },
    )
    .await?;
    Ok(())
}
