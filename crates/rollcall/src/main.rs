//! Rollcall operator CLI.
//!
//! `import` runs a file to completion in-process; the read commands
//! (`status`, `errors`, `summary`, `stats`) expose store state; `cleanup`
//! removes a terminal job and everything it owns.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_db::{ErrorFilter, RollcallDb};
use rollcall_dispatch::{enqueue_file, Dispatcher};
use rollcall_protocol::http_types::{ErrorEntry, ErrorsPage, JobSummary, Pagination};
use rollcall_protocol::types::{ErrorType, JobId, JobStatus};
use rollcall_protocol::{defaults, EngineConfig};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rollcall", about = "Employee import engine", version)]
struct Cli {
    /// State store URL
    #[arg(long, env = "ROLLCALL_DB_URL", default_value = defaults::DEFAULT_DB_URL)]
    db_url: String,

    /// Directory uploaded files are stored under
    #[arg(long, env = "ROLLCALL_UPLOAD_DIR", default_value = "uploads")]
    upload_dir: PathBuf,

    /// Mirror the log file onto stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enqueue a file and run it to completion
    Import {
        /// CSV or workbook file to import
        file: PathBuf,
    },
    /// Show a job's progress
    Status { job_id: String },
    /// List a job's row errors
    Errors {
        job_id: String,
        #[arg(long)]
        error_type: Option<String>,
        #[arg(long)]
        row_start: Option<u64>,
        #[arg(long)]
        row_end: Option<u64>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 50)]
        per_page: u32,
    },
    /// Job summary: counters, error histogram, rates, attempts
    Summary { job_id: String },
    /// Delete a terminal job and everything it owns
    Cleanup { job_id: String },
    /// Store-wide job and employee counts
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    rollcall_logging::init_logging("rollcall", cli.verbose)?;

    let config = EngineConfig {
        db_url: cli.db_url.clone(),
        upload_dir: cli.upload_dir.clone(),
        ..EngineConfig::default()
    };
    let db = RollcallDb::open(&config.db_url)
        .await
        .context("Failed to open state store")?;

    match cli.command {
        Command::Import { file } => import(&db, &config, &file).await,
        Command::Status { job_id } => status(&db, &parse_job_id(&job_id)?).await,
        Command::Errors {
            job_id,
            error_type,
            row_start,
            row_end,
            search,
            page,
            per_page,
        } => {
            let filter = ErrorFilter {
                error_type: match error_type.as_deref() {
                    None => None,
                    Some(raw) => Some(
                        ErrorType::parse(raw)
                            .with_context(|| format!("unknown error type '{raw}'"))?,
                    ),
                },
                row_start,
                row_end,
                search,
                page,
                per_page,
            };
            errors(&db, &parse_job_id(&job_id)?, &filter).await
        }
        Command::Summary { job_id } => summary(&db, &parse_job_id(&job_id)?).await,
        Command::Cleanup { job_id } => cleanup(&db, &parse_job_id(&job_id)?).await,
        Command::Stats => stats(&db).await,
    }
}

fn parse_job_id(raw: &str) -> Result<JobId> {
    raw.parse().with_context(|| format!("invalid job id '{raw}'"))
}

async fn import(db: &RollcallDb, config: &EngineConfig, file: &PathBuf) -> Result<()> {
    let job = enqueue_file(db, config, file)
        .await
        .context("File rejected")?;
    println!(
        "accepted {} as job {} ({} queue, ~{} rows)",
        job.filename, job.id, job.queue_class, job.total_rows
    );

    let dispatcher = Dispatcher::new(db.clone(), config.clone());
    let finished = dispatcher.drain_job(&job.id).await?;

    match finished.status {
        JobStatus::Completed => println!(
            "completed: {} processed, {} successful, {} errors",
            finished.processed_rows, finished.successful_rows, finished.error_rows
        ),
        JobStatus::Failed => bail!(
            "job failed: {}",
            finished.failure_reason.unwrap_or_else(|| "unknown".into())
        ),
        other => bail!("job ended in unexpected status {other}"),
    }
    if finished.error_rows > 0 {
        println!("run `rollcall errors {}` for details", finished.id);
    }
    Ok(())
}

async fn status(db: &RollcallDb, job_id: &JobId) -> Result<()> {
    let snapshot = db
        .load_progress(job_id)
        .await?
        .with_context(|| format!("no job {job_id}"))?;
    println!("{}", serde_json::to_string_pretty(&snapshot.to_http())?);
    Ok(())
}

async fn errors(db: &RollcallDb, job_id: &JobId, filter: &ErrorFilter) -> Result<()> {
    db.require_job(job_id).await?;
    let page = db.list_errors(job_id, filter).await?;
    let body = ErrorsPage {
        errors: page
            .items
            .into_iter()
            .map(|e| ErrorEntry {
                row_number: e.row_number,
                error_type: e.error_type.as_str().to_string(),
                message: e.message,
                row_data: e.row_data.unwrap_or(serde_json::Value::Null),
            })
            .collect(),
        pagination: Pagination {
            page: page.page,
            per_page: page.per_page,
            total: page.total,
            total_pages: page.total_pages,
        },
    };
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn summary(db: &RollcallDb, job_id: &JobId) -> Result<()> {
    let job = db.require_job(job_id).await?;
    let snapshot = db
        .load_progress(job_id)
        .await?
        .with_context(|| format!("no job {job_id}"))?;

    let processed = snapshot.processed_rows;
    let rate = |part: u64| {
        if processed == 0 {
            0.0
        } else {
            part as f64 / processed as f64
        }
    };
    let processing_seconds = match (job.started_at, job.completed_at) {
        (Some(started), Some(completed)) => {
            Some((completed - started).num_milliseconds() as f64 / 1_000.0)
        }
        _ => None,
    };

    let body = JobSummary {
        progress: snapshot.to_http(),
        filename: job.filename,
        error_histogram: db.error_histogram(job_id).await?,
        success_rate: rate(snapshot.successful_rows),
        error_rate: rate(snapshot.error_rows),
        processing_seconds,
        attempts: db.count_attempt_events(job_id).await?,
    };
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn cleanup(db: &RollcallDb, job_id: &JobId) -> Result<()> {
    let job = db.require_job(job_id).await?;
    db.delete_job(job_id).await.context("Cannot delete job")?;
    // Stored bytes go with the job; a missing file is fine.
    let _ = std::fs::remove_file(&job.file_path);
    println!("deleted job {job_id} and its records");
    Ok(())
}

async fn stats(db: &RollcallDb) -> Result<()> {
    let jobs = db.job_stats().await?;
    let employees = db.count_employees().await?;
    println!(
        "jobs: {} total ({} pending, {} processing, {} completed, {} failed)",
        jobs.total, jobs.pending, jobs.processing, jobs.completed, jobs.failed
    );
    println!("employees: {employees}");
    Ok(())
}
