//! SQLite state store for the Rollcall import engine.
//!
//! One [`RollcallDb`] handle wraps a connection pool; the operation surface is
//! split by domain across this crate's modules, all implemented on the same
//! handle:
//!
//! - `employees` — canonical employee rows and the upsert
//! - `jobs` — import jobs, queue claims, chunk commits
//! - `ledger` — per-job idempotency records
//! - `errors` — per-job categorized row errors
//! - `progress` — progress snapshots and the TTL read cache
//! - `resumption` — resumption observability log
//! - `lock` — per-job cooperative lock leases

pub mod employees;
pub mod error;
pub mod errors;
pub mod jobs;
pub mod ledger;
pub mod lock;
pub mod progress;
pub mod resumption;
mod schema;

pub use employees::Employee;
pub use error::{DbError, Result};
pub use errors::{ErrorFilter, ImportError, Page};
pub use jobs::{ChunkCommit, ImportJob, JobStats, LedgerWrite, NewJob, RowErrorWrite};
pub use ledger::LedgerEntry;
pub use progress::{ProgressCache, ProgressSnapshot};
pub use resumption::{ResumptionEvent, ResumptionLogEntry};

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

/// Handle to the Rollcall state store.
#[derive(Clone)]
pub struct RollcallDb {
    pub(crate) pool: SqlitePool,
}

impl RollcallDb {
    /// Open (creating if needed) the store at the given sqlx SQLite URL,
    /// e.g. `sqlite:rollcall.db?mode=rwc`.
    ///
    /// Foreign keys are enabled per connection; cascade deletion of a job's
    /// children depends on it. WAL mode for better concurrent access.
    pub async fn open(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;
        info!("Connected to state store");
        Ok(db)
    }

    /// Open an in-memory store (for testing).
    ///
    /// A single connection is forced; each SQLite in-memory connection is its
    /// own database.
    pub async fn open_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
