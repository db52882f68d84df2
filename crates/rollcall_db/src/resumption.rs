//! Resumption observability log: every attempt, integrity check and lock
//! event a job sees, in order.

use crate::error::Result;
use crate::RollcallDb;
use chrono::{DateTime, Utc};
use rollcall_protocol::types::{JobId, ResumptionEventType};
use serde::Serialize;
use sqlx::Row;

/// One event to append.
#[derive(Debug, Clone)]
pub struct ResumptionEvent {
    pub event_type: ResumptionEventType,
    pub attempt_number: u32,
    pub resumed_from_row: Option<u64>,
    pub details: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// One event, as read back.
#[derive(Debug, Clone, Serialize)]
pub struct ResumptionLogEntry {
    pub id: i64,
    pub event_type: ResumptionEventType,
    pub attempt_number: u32,
    pub resumed_from_row: Option<u64>,
    pub details: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl RollcallDb {
    pub async fn append_resumption_event(
        &self,
        job: &JobId,
        event: ResumptionEvent,
    ) -> Result<()> {
        let metadata = event
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        sqlx::query(
            r#"
            INSERT INTO import_resumption_logs (
                import_job_id, event_type, attempt_number, resumed_from_row,
                details, metadata, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.to_string())
        .bind(event.event_type.as_str())
        .bind(event.attempt_number as i64)
        .bind(event.resumed_from_row.map(|r| r as i64))
        .bind(&event.details)
        .bind(metadata)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_resumption_events(&self, job: &JobId) -> Result<Vec<ResumptionLogEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM import_resumption_logs WHERE import_job_id = ? ORDER BY id ASC",
        )
        .bind(job.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let type_str: String = row.get("event_type");
                let event_type = ResumptionEventType::parse(&type_str).ok_or_else(|| {
                    crate::DbError::invalid_state(format!("Unknown event type: {type_str}"))
                })?;
                let metadata = row
                    .get::<Option<String>, _>("metadata")
                    .map(|raw| serde_json::from_str(&raw))
                    .transpose()?;
                Ok(ResumptionLogEntry {
                    id: row.get("id"),
                    event_type,
                    attempt_number: row.get::<i64, _>("attempt_number") as u32,
                    resumed_from_row: row
                        .get::<Option<i64>, _>("resumed_from_row")
                        .map(|r| r as u64),
                    details: row.get("details"),
                    metadata,
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }

    /// Attempts recorded for the job (events of type `attempt`).
    pub async fn count_attempt_events(&self, job: &JobId) -> Result<u32> {
        let row = sqlx::query(
            r#"SELECT COUNT(*) AS n FROM import_resumption_logs
               WHERE import_job_id = ? AND event_type = 'attempt'"#,
        )
        .bind(job.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n") as u32)
    }
}
