//! Per-job row errors: append-only writes, filtered listing, histogram.

use crate::error::{DbError, Result};
use crate::jobs::RowErrorWrite;
use crate::RollcallDb;
use chrono::{DateTime, Utc};
use rollcall_protocol::types::{ErrorType, JobId};
use serde::Serialize;
use sqlx::{QueryBuilder, Row, Sqlite, Transaction};
use std::collections::BTreeMap;

/// One recorded row error, as read back.
#[derive(Debug, Clone, Serialize)]
pub struct ImportError {
    pub id: i64,
    pub row_number: u64,
    pub error_type: ErrorType,
    pub message: String,
    pub row_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Listing filter. `page` is 1-based; `per_page` is clamped to 100.
#[derive(Debug, Clone)]
pub struct ErrorFilter {
    pub error_type: Option<ErrorType>,
    pub row_start: Option<u64>,
    pub row_end: Option<u64>,
    pub search: Option<String>,
    pub page: u32,
    pub per_page: u32,
}

impl Default for ErrorFilter {
    fn default() -> Self {
        Self {
            error_type: None,
            row_start: None,
            row_end: None,
            search: None,
            page: 1,
            per_page: 50,
        }
    }
}

/// A page of results plus pagination bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub total_pages: u32,
}

impl RollcallDb {
    /// List a job's errors, filtered and paginated.
    pub async fn list_errors(
        &self,
        job: &JobId,
        filter: &ErrorFilter,
    ) -> Result<Page<ImportError>> {
        let per_page = filter.per_page.clamp(1, 100);
        let page = filter.page.max(1);
        let job_id = job.to_string();

        let push_conditions = |qb: &mut QueryBuilder<Sqlite>| {
            qb.push(" WHERE import_job_id = ").push_bind(job_id.clone());
            if let Some(error_type) = filter.error_type {
                qb.push(" AND error_type = ").push_bind(error_type.as_str());
            }
            if let Some(start) = filter.row_start {
                qb.push(" AND row_number >= ").push_bind(start as i64);
            }
            if let Some(end) = filter.row_end {
                qb.push(" AND row_number <= ").push_bind(end as i64);
            }
            if let Some(search) = filter.search.as_deref() {
                qb.push(" AND message LIKE ")
                    .push_bind(format!("%{search}%"));
            }
        };

        let mut count_qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) AS n FROM import_errors");
        push_conditions(&mut count_qb);
        let total = count_qb
            .build()
            .fetch_one(&self.pool)
            .await?
            .get::<i64, _>("n") as u64;

        let mut list_qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM import_errors");
        push_conditions(&mut list_qb);
        list_qb
            .push(" ORDER BY row_number ASC, id ASC LIMIT ")
            .push_bind(per_page as i64)
            .push(" OFFSET ")
            .push_bind(((page - 1) * per_page) as i64);

        let rows = list_qb.build().fetch_all(&self.pool).await?;
        let items = rows
            .iter()
            .map(row_to_error)
            .collect::<Result<Vec<_>>>()?;

        let total_pages = if total == 0 {
            0
        } else {
            total.div_ceil(per_page as u64) as u32
        };

        Ok(Page {
            items,
            page,
            per_page,
            total,
            total_pages,
        })
    }

    /// Counts by wire `error_type` for one job.
    pub async fn error_histogram(&self, job: &JobId) -> Result<BTreeMap<String, u64>> {
        let rows = sqlx::query(
            r#"SELECT error_type, COUNT(*) AS n FROM import_errors
               WHERE import_job_id = ? GROUP BY error_type"#,
        )
        .bind(job.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                (
                    row.get::<String, _>("error_type"),
                    row.get::<i64, _>("n") as u64,
                )
            })
            .collect())
    }

    pub async fn error_count(&self, job: &JobId) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM import_errors WHERE import_job_id = ?")
            .bind(job.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }
}

/// Append one error inside the chunk-commit transaction.
pub(crate) async fn insert_error(
    tx: &mut Transaction<'_, Sqlite>,
    job_id: &str,
    write: &RowErrorWrite,
    now: DateTime<Utc>,
) -> Result<()> {
    let row_data = write
        .row_data
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    sqlx::query(
        r#"
        INSERT INTO import_errors (
            import_job_id, row_number, error_type, message, row_data, created_at
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(job_id)
    .bind(write.row_number as i64)
    .bind(write.category.error_type().as_str())
    .bind(write.category.message())
    .bind(row_data)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn row_to_error(row: &sqlx::sqlite::SqliteRow) -> Result<ImportError> {
    let type_str: String = row.get("error_type");
    let error_type = ErrorType::parse(&type_str)
        .ok_or_else(|| DbError::invalid_state(format!("Unknown error type: {type_str}")))?;
    let row_data = row
        .get::<Option<String>, _>("row_data")
        .map(|raw| serde_json::from_str(&raw))
        .transpose()?;

    Ok(ImportError {
        id: row.get("id"),
        row_number: row.get::<i64, _>("row_number") as u64,
        error_type,
        message: row.get("message"),
        row_data,
        created_at: row.get("created_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{ChunkCommit, NewJob};
    use rollcall_protocol::types::{ErrorCategory, FileFingerprint};

    async fn seeded_job(db: &RollcallDb) -> JobId {
        let job = db
            .create_job(NewJob {
                filename: "staff.csv".into(),
                file_path: "/tmp/staff.csv".into(),
                fingerprint: FileFingerprint {
                    file_size: 1,
                    file_hash: "00".repeat(32),
                    file_last_modified: Utc::now(),
                },
                reported_rows: 10,
            })
            .await
            .unwrap();

        let errors = vec![
            RowErrorWrite {
                row_number: 1,
                category: ErrorCategory::Validation {
                    field: "salary".into(),
                    message: "not a number".into(),
                },
                row_data: Some(serde_json::json!({"values": ["E1", "50k"]})),
            },
            RowErrorWrite {
                row_number: 2,
                category: ErrorCategory::Format {
                    message: "wrong column count".into(),
                },
                row_data: None,
            },
            RowErrorWrite {
                row_number: 7,
                category: ErrorCategory::Validation {
                    field: "email".into(),
                    message: "invalid email".into(),
                },
                row_data: None,
            },
        ];
        let chunk = ChunkCommit {
            processed_delta: 3,
            error_delta: 3,
            last_processed_row: 7,
            errors,
            ..Default::default()
        };
        db.commit_chunk(&job.id, &chunk).await.unwrap();
        job.id
    }

    #[tokio::test]
    async fn filter_by_type_and_row_range() {
        let db = RollcallDb::open_memory().await.unwrap();
        let job = seeded_job(&db).await;

        let all = db.list_errors(&job, &ErrorFilter::default()).await.unwrap();
        assert_eq!(all.total, 3);
        assert_eq!(all.items.len(), 3);
        assert_eq!(all.items[0].row_number, 1);

        let validation = db
            .list_errors(
                &job,
                &ErrorFilter {
                    error_type: Some(ErrorType::Validation),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(validation.total, 2);

        let ranged = db
            .list_errors(
                &job,
                &ErrorFilter {
                    row_start: Some(2),
                    row_end: Some(7),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(ranged.total, 2);
        assert_eq!(ranged.items[0].row_number, 2);
    }

    #[tokio::test]
    async fn search_and_pagination() {
        let db = RollcallDb::open_memory().await.unwrap();
        let job = seeded_job(&db).await;

        let searched = db
            .list_errors(
                &job,
                &ErrorFilter {
                    search: Some("email".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(searched.total, 1);
        assert_eq!(searched.items[0].row_number, 7);

        let page2 = db
            .list_errors(
                &job,
                &ErrorFilter {
                    page: 2,
                    per_page: 2,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page2.total, 3);
        assert_eq!(page2.total_pages, 2);
        assert_eq!(page2.items.len(), 1);
        assert_eq!(page2.items[0].row_number, 7);

        // per_page is clamped to the API cap.
        let clamped = db
            .list_errors(
                &job,
                &ErrorFilter {
                    per_page: 5_000,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(clamped.per_page, 100);
    }

    #[tokio::test]
    async fn histogram_counts_by_type() {
        let db = RollcallDb::open_memory().await.unwrap();
        let job = seeded_job(&db).await;

        let histogram = db.error_histogram(&job).await.unwrap();
        assert_eq!(histogram.get("validation"), Some(&2));
        assert_eq!(histogram.get("format"), Some(&1));
        assert_eq!(histogram.get("system"), None);
    }
}
