//! Shared logging utilities for Rollcall binaries.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "rollcall=info,rollcall_dispatch=info,rollcall_worker=info";
const MAX_ROTATED_FILES: usize = 4;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Initialize tracing with a size-rotated log file plus stderr output.
///
/// `verbose` mirrors the file filter onto stderr; otherwise stderr only shows
/// warnings and above.
pub fn init_logging(app_name: &str, verbose: bool) -> Result<()> {
    let log_dir = logs_dir();
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

    let writer = LogFileWriter::open(log_dir.join(format!("{app_name}.log")))?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if verbose {
        file_filter.clone()
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    Ok(())
}

/// Application home: `~/.rollcall`, overridable via `ROLLCALL_HOME`.
pub fn rollcall_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("ROLLCALL_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".rollcall")
}

/// Log directory: `~/.rollcall/logs`.
pub fn logs_dir() -> PathBuf {
    rollcall_home().join("logs")
}

struct LogFileInner {
    path: PathBuf,
    file: File,
    written: u64,
}

impl LogFileInner {
    fn open(path: PathBuf) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            file,
            written,
        })
    }

    /// Shift `name.log` -> `name.log.1` -> ... -> `name.log.N`, dropping the
    /// oldest, then reopen a fresh current file.
    fn rotate(&mut self) -> io::Result<()> {
        let _ = self.file.flush();

        let rotated = |idx: usize| PathBuf::from(format!("{}.{idx}", self.path.display()));
        let oldest = rotated(MAX_ROTATED_FILES);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for idx in (1..MAX_ROTATED_FILES).rev() {
            let src = rotated(idx);
            if src.exists() {
                fs::rename(&src, rotated(idx + 1))?;
            }
        }
        if self.path.exists() {
            fs::rename(&self.path, rotated(1))?;
        }

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

/// Cloneable writer handle handed to the fmt layer.
#[derive(Clone)]
pub struct LogFileWriter {
    inner: Arc<Mutex<LogFileInner>>,
}

impl LogFileWriter {
    fn open(path: PathBuf) -> Result<Self> {
        let inner = LogFileInner::open(path.clone())
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
        })
    }
}

impl Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        if inner.written + buf.len() as u64 > MAX_LOG_FILE_SIZE {
            inner.rotate()?;
        }
        let bytes = inner.file.write(buf)?;
        inner.written += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        inner.file.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogFileWriter {
    type Writer = LogFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
