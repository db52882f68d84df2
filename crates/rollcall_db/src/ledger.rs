//! Idempotency ledger: which rows and employee keys a job has already
//! applied. Gates re-application on replay; enforces at-most-once per
//! `(job, employee_number)` and `(job, email)` while a key's entry is
//! `processed`.

use crate::error::Result;
use crate::jobs::LedgerWrite;
use crate::RollcallDb;
use chrono::{DateTime, Utc};
use rollcall_protocol::types::{JobId, LedgerStatus};
use sqlx::{Row, Sqlite, Transaction};

/// One ledger row, as read back.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub row_number: u64,
    pub employee_number: Option<String>,
    pub email: Option<String>,
    pub status: LedgerStatus,
    pub processed_at: DateTime<Utc>,
}

impl RollcallDb {
    /// Any entry for this row, regardless of status.
    pub async fn was_row_processed(&self, job: &JobId, row_number: u64) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 AS hit FROM import_processed_records WHERE import_job_id = ? AND row_number = ?",
        )
        .bind(job.to_string())
        .bind(row_number as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// True when this employee number was already persisted by the job.
    pub async fn was_employee_number_processed(&self, job: &JobId, number: &str) -> Result<bool> {
        let row = sqlx::query(
            r#"SELECT 1 AS hit FROM import_processed_records
               WHERE import_job_id = ? AND employee_number = ? AND status = 'processed'"#,
        )
        .bind(job.to_string())
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// True when this (case-folded) email was already persisted by the job.
    pub async fn was_email_processed(&self, job: &JobId, email: &str) -> Result<bool> {
        let row = sqlx::query(
            r#"SELECT 1 AS hit FROM import_processed_records
               WHERE import_job_id = ? AND email = ? AND status = 'processed'"#,
        )
        .bind(job.to_string())
        .bind(email.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    pub async fn ledger_entry_for_row(
        &self,
        job: &JobId,
        row_number: u64,
    ) -> Result<Option<LedgerEntry>> {
        let row = sqlx::query(
            "SELECT * FROM import_processed_records WHERE import_job_id = ? AND row_number = ?",
        )
        .bind(job.to_string())
        .bind(row_number as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let status_str: String = row.get("status");
            let status = LedgerStatus::parse(&status_str).ok_or_else(|| {
                crate::DbError::invalid_state(format!("Unknown ledger status: {status_str}"))
            })?;
            Ok(LedgerEntry {
                row_number: row.get::<i64, _>("row_number") as u64,
                employee_number: row.get("employee_number"),
                email: row.get("email"),
                status,
                processed_at: row.get("processed_at"),
            })
        })
        .transpose()
    }

    pub async fn ledger_count(&self, job: &JobId) -> Result<u64> {
        let row =
            sqlx::query("SELECT COUNT(*) AS n FROM import_processed_records WHERE import_job_id = ?")
                .bind(job.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    /// Drop every ledger entry for the job (fingerprint reset path).
    pub async fn clear_ledger_for_job(&self, job: &JobId) -> Result<()> {
        sqlx::query("DELETE FROM import_processed_records WHERE import_job_id = ?")
            .bind(job.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Flip earlier duplicate rows to `skipped`, freeing their per-key slots for
/// the later winner. Runs inside the chunk-commit transaction, before the
/// winner's insert.
pub(crate) async fn flip_rows_to_skipped(
    tx: &mut Transaction<'_, Sqlite>,
    job_id: &str,
    rows: &[u64],
) -> Result<()> {
    for row_number in rows {
        sqlx::query(
            r#"UPDATE import_processed_records SET status = 'skipped'
               WHERE import_job_id = ? AND row_number = ?"#,
        )
        .bind(job_id)
        .bind(*row_number as i64)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Insert one ledger row inside the chunk-commit transaction. `OR IGNORE`
/// makes replays of an already-committed row a no-op instead of a constraint
/// failure.
pub(crate) async fn insert_entry(
    tx: &mut Transaction<'_, Sqlite>,
    job_id: &str,
    write: &LedgerWrite,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO import_processed_records (
            import_job_id, row_number, employee_number, email, status, processed_at
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(job_id)
    .bind(write.row_number as i64)
    .bind(&write.employee_number)
    .bind(&write.email)
    .bind(write.status.as_str())
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
