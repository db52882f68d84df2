//! Database schema creation for all Rollcall tables.
//!
//! All CREATE TABLE statements live here - single source of truth.

use crate::error::Result;
use crate::RollcallDb;
use tracing::info;

impl RollcallDb {
    /// Ensure all tables exist. Connection pragmas (WAL, foreign keys) are
    /// part of the connect options, not run here.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        self.create_employee_tables().await?;
        self.create_job_tables().await?;

        info!("Database schema verified");
        Ok(())
    }

    async fn create_employee_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS employees (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                employee_number TEXT NOT NULL,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                email TEXT NOT NULL,
                email_lower TEXT NOT NULL,
                department TEXT,
                salary TEXT,
                currency TEXT,
                country_code TEXT,
                start_date TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_employees_number ON employees(employee_number)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_employees_email ON employees(email_lower)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_job_tables(&self) -> Result<()> {
        // Import jobs. Comparison-involved timestamps (next_attempt_at,
        // retry_until) are unix seconds; display timestamps are RFC3339 text.
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS import_jobs (
                id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                file_path TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                queue_class TEXT NOT NULL,
                total_rows INTEGER NOT NULL DEFAULT 0,
                processed_rows INTEGER NOT NULL DEFAULT 0,
                successful_rows INTEGER NOT NULL DEFAULT 0,
                error_rows INTEGER NOT NULL DEFAULT 0,
                last_processed_row INTEGER NOT NULL DEFAULT 0,
                file_size INTEGER NOT NULL,
                file_hash TEXT NOT NULL,
                file_last_modified TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                next_attempt_at INTEGER NOT NULL DEFAULT 0,
                retry_until INTEGER,
                resumption_metadata TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                failure_reason TEXT
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Idempotency ledger. The per-key uniqueness is partial: a row
        // flipped to 'skipped' frees its keys for the later winner while its
        // own entry stays behind.
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS import_processed_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                import_job_id TEXT NOT NULL REFERENCES import_jobs(id) ON DELETE CASCADE,
                row_number INTEGER NOT NULL,
                employee_number TEXT,
                email TEXT,
                status TEXT NOT NULL,
                processed_at TEXT NOT NULL,
                UNIQUE(import_job_id, row_number)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_ledger_job_number
               ON import_processed_records(import_job_id, employee_number)
               WHERE status = 'processed' AND employee_number IS NOT NULL"#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_ledger_job_email
               ON import_processed_records(import_job_id, email)
               WHERE status = 'processed' AND email IS NOT NULL"#,
        )
        .execute(&self.pool)
        .await?;

        // Row errors, append-only.
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS import_errors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                import_job_id TEXT NOT NULL REFERENCES import_jobs(id) ON DELETE CASCADE,
                row_number INTEGER NOT NULL,
                error_type TEXT NOT NULL,
                message TEXT NOT NULL,
                row_data TEXT,
                created_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Resumption observability log.
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS import_resumption_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                import_job_id TEXT NOT NULL REFERENCES import_jobs(id) ON DELETE CASCADE,
                event_type TEXT NOT NULL,
                attempt_number INTEGER NOT NULL,
                resumed_from_row INTEGER,
                details TEXT,
                metadata TEXT,
                created_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Cooperative job locks (token leases). expires_at is unix seconds.
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS import_job_locks (
                import_job_id TEXT PRIMARY KEY REFERENCES import_jobs(id) ON DELETE CASCADE,
                token TEXT NOT NULL,
                owner TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Indexes
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON import_jobs(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_jobs_queue ON import_jobs(queue_class, status, next_attempt_at)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_ledger_job_row ON import_processed_records(import_job_id, row_number)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_errors_job_type ON import_errors(import_job_id, error_type)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_errors_job_row ON import_errors(import_job_id, row_number)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_resumption_job ON import_resumption_logs(import_job_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
