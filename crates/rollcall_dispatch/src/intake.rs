//! File intake: the core-side entry the upload endpoint calls.
//!
//! Everything user-visible fails here, fast, before a job exists: size and
//! row caps, supported types, header validation. Accepted files are copied
//! into the upload directory, fingerprinted, and enqueued as a `pending`
//! job routed by approximate row count.

use rollcall_db::{DbError, ImportJob, NewJob, RollcallDb};
use rollcall_protocol::EngineConfig;
use rollcall_worker::integrity::compute_fingerprint;
use rollcall_worker::reader::{open_reader, ReadError};
use std::path::Path;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Intake failures map onto the upload endpoint's 422 responses
/// (except `Db`/`Io`, which are 500s).
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("File is {size} bytes; the limit is {max}")]
    FileTooLarge { size: u64, max: u64 },

    #[error("File has more than {max} rows")]
    TooManyRows { max: u64 },

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("Invalid header: missing required columns: {0}")]
    InvalidHeader(String),

    #[error("File is empty")]
    EmptyFile,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("State store failure: {0}")]
    Db(#[from] DbError),
}

impl From<ReadError> for IntakeError {
    fn from(e: ReadError) -> Self {
        match e {
            ReadError::UnsupportedFormat(ext) => Self::UnsupportedType(ext),
            ReadError::MissingColumns(missing) => Self::InvalidHeader(missing),
            ReadError::EmptyFile => Self::EmptyFile,
            ReadError::Io(e) => Self::Io(e),
            ReadError::Workbook(message) => Self::UnsupportedType(message),
        }
    }
}

/// Validate and enqueue an uploaded file.
///
/// The reported row count comes from a full streaming pass (cheap relative
/// to the import itself) and only drives queue routing; the worker recounts
/// exactly while importing.
pub async fn enqueue_file(
    db: &RollcallDb,
    config: &EngineConfig,
    source: &Path,
) -> Result<ImportJob, IntakeError> {
    let size = std::fs::metadata(source)?.len();
    if size > config.max_upload_bytes {
        return Err(IntakeError::FileTooLarge {
            size,
            max: config.max_upload_bytes,
        });
    }

    // Header validation fails fast here; a bad file never becomes a job.
    let mut reader = open_reader(source, config.csv_delimiter)?;
    let mut rows: u64 = 0;
    while reader.next_item()?.is_some() {
        rows += 1;
        if rows > config.max_rows {
            return Err(IntakeError::TooManyRows {
                max: config.max_rows,
            });
        }
    }

    // Store the bytes the job will actually read, then fingerprint those.
    let filename = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    std::fs::create_dir_all(&config.upload_dir)?;
    let stored = config
        .upload_dir
        .join(format!("{}_{filename}", Uuid::new_v4()));
    std::fs::copy(source, &stored)?;

    let fingerprint = compute_fingerprint(&stored)?;
    let job = db
        .create_job(NewJob {
            filename,
            file_path: stored.to_string_lossy().into_owned(),
            fingerprint,
            reported_rows: rows,
        })
        .await?;

    info!(job_id = %job.id, rows, queue = %job.queue_class, "file accepted");
    Ok(job)
}
