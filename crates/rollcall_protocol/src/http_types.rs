//! HTTP API contracts for the import endpoints.
//!
//! The HTTP layer itself lives outside this workspace; these types pin the
//! JSON shapes it must serve so server and clients compile against the same
//! contracts. All payloads ride in the `{success, data}` envelope; failures
//! use [`ErrorEnvelope`].

use crate::types::{JobId, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Success envelope: `{"success": true, "data": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Failure envelope: `{"success": false, "message": ..., "errors": [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl ErrorEnvelope {
    pub fn new(message: impl Into<String>, errors: Vec<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            errors,
        }
    }
}

/// `POST /employee-import/upload` → 201.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadAccepted {
    pub import_job_id: JobId,
    pub filename: String,
    pub status: JobStatus,
}

/// `GET /employee-import/{id}/progress` → 200.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgress {
    pub id: JobId,
    pub status: JobStatus,
    pub total_rows: u64,
    pub processed_rows: u64,
    pub successful_rows: u64,
    pub error_rows: u64,
    /// 0..=100, two fraction digits.
    pub percentage: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One entry of the errors listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub row_number: u64,
    pub error_type: String,
    pub message: String,
    pub row_data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub total_pages: u32,
}

/// `GET /employee-import/{id}/errors` → 200.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorsPage {
    pub errors: Vec<ErrorEntry>,
    pub pagination: Pagination,
}

/// `GET /employee-import/{id}/summary` → 200.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    #[serde(flatten)]
    pub progress: JobProgress,
    pub filename: String,
    /// Counts by wire `error_type`.
    pub error_histogram: BTreeMap<String, u64>,
    /// successful_rows / processed_rows, 0 when nothing processed.
    pub success_rate: f64,
    /// error_rows / processed_rows, 0 when nothing processed.
    pub error_rate: f64,
    /// Wall-clock seconds from started_at to completed_at, when both exist.
    pub processing_seconds: Option<f64>,
    /// Worker attempts recorded for the job.
    pub attempts: u32,
}
