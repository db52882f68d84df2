//! Format-agnostic streaming row readers.
//!
//! A reader yields a lazy, finite, non-restartable sequence of rows keyed by
//! 1-based row number (the header is row 0 and excluded). Two variants exist,
//! delimited text and workbook; after construction the caller never branches
//! on format. Seeking is read-and-discard: no supported format offers random
//! access in the general case.

mod delimited;
mod workbook;

pub use delimited::DelimitedReader;
pub use workbook::WorkbookReader;

use rollcall_protocol::defaults::REQUIRED_COLUMNS;
use rollcall_protocol::types::RawRow;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// Errors that abort the stream. Row-local decode faults are not errors;
/// they surface as [`RowItem::Malformed`] so the pipeline can record them
/// and keep going.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("Missing required columns: {0}")]
    MissingColumns(String),

    #[error("File has no header row")]
    EmptyFile,

    #[error("Workbook error: {0}")]
    Workbook(String),
}

impl ReadError {
    /// Whether retrying the attempt could help. Structural problems with the
    /// file never fix themselves.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// One item of the stream: a decoded row or a row-local decode fault.
#[derive(Debug, Clone)]
pub enum RowItem {
    Row(RawRow),
    Malformed { row_number: u64, message: String },
}

impl RowItem {
    pub fn row_number(&self) -> u64 {
        match self {
            Self::Row(row) => row.row_number,
            Self::Malformed { row_number, .. } => *row_number,
        }
    }
}

/// Validated header of an import file.
///
/// Column lookup is case-insensitive with `_` and space treated as
/// equivalent; positions are those of the underlying file.
#[derive(Debug, Clone)]
pub struct Header {
    columns: Vec<String>,
    index: HashMap<String, usize>,
}

/// Columns the importer knows about; anything else is warned and ignored.
const KNOWN_COLUMNS: [&str; 9] = [
    "employee_number",
    "first_name",
    "last_name",
    "email",
    "department",
    "salary",
    "currency",
    "country_code",
    "start_date",
];

fn fold_column(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .replace(' ', "_")
        .trim_start_matches('\u{feff}')
        .to_string()
}

impl Header {
    /// Validate raw header cells. Fails fast listing every missing required
    /// column; unknown extras are accepted with a warning.
    pub fn from_columns(raw: &[String]) -> Result<Self, ReadError> {
        let columns: Vec<String> = raw.iter().map(|c| fold_column(c)).collect();
        let mut index = HashMap::new();
        for (pos, name) in columns.iter().enumerate() {
            // First occurrence wins for repeated header names.
            index.entry(name.clone()).or_insert(pos);
        }

        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|required| !index.contains_key(*required))
            .collect();
        if !missing.is_empty() {
            return Err(ReadError::MissingColumns(missing.join(", ")));
        }

        for name in &columns {
            if !name.is_empty() && !KNOWN_COLUMNS.contains(&name.as_str()) {
                warn!(column = %name, "ignoring unknown column");
            }
        }

        Ok(Self { columns, index })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(&fold_column(name)).copied()
    }

    /// The row's value under a column, if the column exists and the row is
    /// wide enough.
    pub fn value<'a>(&self, row: &'a RawRow, name: &str) -> Option<&'a str> {
        self.position(name)
            .and_then(|pos| row.values.get(pos))
            .map(String::as_str)
    }
}

/// A streaming source of rows with a validated header.
pub trait RowReader: Send + std::fmt::Debug {
    fn header(&self) -> &Header;

    /// Next stream item, or `None` at EOF. EOF is deterministic and final.
    fn next_item(&mut self) -> Result<Option<RowItem>, ReadError>;

    /// Rows yielded so far (including malformed ones).
    fn rows_produced(&self) -> u64;

    /// Position the stream so the next produced row is `first_row`,
    /// by reading and discarding.
    fn seek(&mut self, first_row: u64) -> Result<(), ReadError> {
        while self.rows_produced() + 1 < first_row {
            if self.next_item()?.is_none() {
                break;
            }
        }
        Ok(())
    }

    /// Draw up to `max_rows` items. An empty vec means EOF.
    fn next_chunk(&mut self, max_rows: usize) -> Result<Vec<RowItem>, ReadError> {
        let mut items = Vec::with_capacity(max_rows);
        while items.len() < max_rows {
            match self.next_item()? {
                Some(item) => items.push(item),
                None => break,
            }
        }
        Ok(items)
    }
}

/// Whether the path names a workbook (as opposed to delimited text).
pub fn is_workbook_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(str::to_lowercase).as_deref(),
        Some("xlsx") | Some("xlsm") | Some("xlsb") | Some("xls")
    )
}

/// Open the right reader for the path. The caller never branches on format
/// afterwards.
pub fn open_reader(path: &Path, delimiter: u8) -> Result<Box<dyn RowReader>, ReadError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "csv" | "txt" | "tsv" => Ok(Box::new(DelimitedReader::open(path, delimiter)?)),
        "xlsx" | "xlsm" | "xlsb" | "xls" => Ok(Box::new(WorkbookReader::open(path)?)),
        other => Err(ReadError::UnsupportedFormat(other.to_string())),
    }
}
