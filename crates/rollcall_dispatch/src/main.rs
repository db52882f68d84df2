//! Rollcall dispatcher binary: runs the queue loop until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use rollcall_db::RollcallDb;
use rollcall_dispatch::Dispatcher;
use rollcall_protocol::{defaults, EngineConfig};
use rollcall_worker::CancellationToken;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "rollcall-dispatch", about = "Rollcall import dispatcher")]
struct Args {
    /// State store URL
    #[arg(long, env = "ROLLCALL_DB_URL", default_value = defaults::DEFAULT_DB_URL)]
    db_url: String,

    /// Directory uploaded files are stored under
    #[arg(long, env = "ROLLCALL_UPLOAD_DIR", default_value = "uploads")]
    upload_dir: PathBuf,

    /// Worker concurrency for the small queue
    #[arg(long, default_value_t = defaults::SMALL_QUEUE_WORKERS)]
    small_workers: usize,

    /// Worker concurrency for the medium queue
    #[arg(long, default_value_t = defaults::MEDIUM_QUEUE_WORKERS)]
    medium_workers: usize,

    /// Worker concurrency for the large queue
    #[arg(long, default_value_t = defaults::LARGE_QUEUE_WORKERS)]
    large_workers: usize,

    /// Mirror the log file onto stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    rollcall_logging::init_logging("rollcall-dispatch", args.verbose)?;

    let config = EngineConfig {
        db_url: args.db_url.clone(),
        upload_dir: args.upload_dir,
        queue_workers: [args.small_workers, args.medium_workers, args.large_workers],
        ..EngineConfig::default()
    };

    let db = RollcallDb::open(&config.db_url)
        .await
        .context("Failed to open state store")?;
    let dispatcher = Dispatcher::new(db, config);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            signal_token.cancel();
        }
    });

    dispatcher.run(shutdown).await;
    Ok(())
}
