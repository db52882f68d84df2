//! Cooperative per-job locks.
//!
//! One lease row per job: a single owner token with a TTL. Acquisition is a
//! single atomic upsert that only steals an expired lease; renewal and
//! release are token-gated so a worker that lost its lease cannot clobber
//! the new owner.

use crate::error::Result;
use crate::RollcallDb;
use chrono::Utc;
use rollcall_protocol::types::JobId;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

impl RollcallDb {
    /// Try to take the job's lock for `ttl_secs`.
    ///
    /// Returns the owner token on success, `None` when another live lease
    /// holds the job. Non-blocking.
    pub async fn try_acquire_job_lock(
        &self,
        job: &JobId,
        owner: &str,
        ttl_secs: i64,
    ) -> Result<Option<String>> {
        let token = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO import_job_locks (import_job_id, token, owner, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(import_job_id) DO UPDATE SET
                token = excluded.token,
                owner = excluded.owner,
                expires_at = excluded.expires_at
            WHERE import_job_locks.expires_at <= ?
            "#,
        )
        .bind(job.to_string())
        .bind(&token)
        .bind(owner)
        .bind(now + ttl_secs)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!(%job, owner, "acquired job lock");
            Ok(Some(token))
        } else {
            debug!(%job, "job lock held by another worker");
            Ok(None)
        }
    }

    /// Extend the lease. Fails (false) when the token no longer owns it.
    pub async fn renew_job_lock(&self, job: &JobId, token: &str, ttl_secs: i64) -> Result<bool> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE import_job_locks SET expires_at = ? WHERE import_job_id = ? AND token = ?",
        )
        .bind(now + ttl_secs)
        .bind(job.to_string())
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Drop the lease iff the token still owns it.
    pub async fn release_job_lock(&self, job: &JobId, token: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM import_job_locks WHERE import_job_id = ? AND token = ?")
                .bind(job.to_string())
                .bind(token)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Current lease holder, if any lease row exists (possibly expired).
    pub async fn job_lock_owner(&self, job: &JobId) -> Result<Option<(String, i64)>> {
        let row = sqlx::query(
            "SELECT owner, expires_at FROM import_job_locks WHERE import_job_id = ?",
        )
        .bind(job.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| (row.get("owner"), row.get("expires_at"))))
    }
}
