//! Delimited-text reader (CSV and friends).

use super::{Header, ReadError, RowItem, RowReader};
use rollcall_protocol::types::RawRow;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Streaming CSV reader: UTF-8 (optional BOM), `"`-quoted fields with `""`
/// escapes, configurable delimiter. Holds one record in memory at a time.
pub struct DelimitedReader {
    header: Header,
    records: csv::StringRecordsIntoIter<BufReader<File>>,
    expected_fields: usize,
    rows_produced: u64,
}

impl std::fmt::Debug for DelimitedReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelimitedReader")
            .field("header", &self.header)
            .field("expected_fields", &self.expected_fields)
            .field("rows_produced", &self.rows_produced)
            .finish()
    }
}

impl DelimitedReader {
    pub fn open(path: &Path, delimiter: u8) -> Result<Self, ReadError> {
        let mut buffered = BufReader::new(File::open(path)?);

        // UTF-8 BOM, if present, is not part of the first header name.
        let head = buffered.fill_buf()?;
        if head.starts_with(&[0xEF, 0xBB, 0xBF]) {
            buffered.consume(3);
        }

        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .has_headers(true)
            .from_reader(buffered);

        let raw_header = csv_reader.headers().map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;
        if raw_header.is_empty() {
            return Err(ReadError::EmptyFile);
        }
        let columns: Vec<String> = raw_header.iter().map(str::to_string).collect();
        let header = Header::from_columns(&columns)?;
        let expected_fields = columns.len();

        Ok(Self {
            header,
            records: csv_reader.into_records(),
            expected_fields,
            rows_produced: 0,
        })
    }
}

impl RowReader for DelimitedReader {
    fn header(&self) -> &Header {
        &self.header
    }

    fn next_item(&mut self) -> Result<Option<RowItem>, ReadError> {
        let record = match self.records.next() {
            None => return Ok(None),
            Some(record) => record,
        };
        self.rows_produced += 1;
        let row_number = self.rows_produced;

        match record {
            Err(e) => {
                // Bad quoting or invalid UTF-8; the stream itself continues.
                Ok(Some(RowItem::Malformed {
                    row_number,
                    message: format!("could not decode row: {e}"),
                }))
            }
            Ok(record) => {
                if record.len() != self.expected_fields {
                    return Ok(Some(RowItem::Malformed {
                        row_number,
                        message: format!(
                            "expected {} fields, found {}",
                            self.expected_fields,
                            record.len()
                        ),
                    }));
                }
                let values = record.iter().map(str::to_string).collect();
                Ok(Some(RowItem::Row(RawRow::new(row_number, values))))
            }
        }
    }

    fn rows_produced(&self) -> u64 {
        self.rows_produced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv_file(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const HEADER: &str = "employee_number,first_name,last_name,email\n";

    #[test]
    fn streams_rows_with_one_based_numbers() {
        let file = csv_file(&format!("{HEADER}E1,Ann,Lee,a@x.co\nE2,Bo,Ng,b@x.co\n"));
        let mut reader = DelimitedReader::open(file.path(), b',').unwrap();

        let first = reader.next_item().unwrap().unwrap();
        match first {
            RowItem::Row(row) => {
                assert_eq!(row.row_number, 1);
                assert_eq!(row.values, vec!["E1", "Ann", "Lee", "a@x.co"]);
            }
            other => panic!("unexpected item: {other:?}"),
        }
        assert!(matches!(
            reader.next_item().unwrap(),
            Some(RowItem::Row(row)) if row.row_number == 2
        ));
        assert!(reader.next_item().unwrap().is_none());
        // EOF is final.
        assert!(reader.next_item().unwrap().is_none());
        assert_eq!(reader.rows_produced(), 2);
    }

    #[test]
    fn bom_and_quoting_are_handled() {
        let file = csv_file(&format!(
            "\u{feff}{HEADER}E1,\"Lee, Ann\",\"Says \"\"hi\"\"\",a@x.co\n"
        ));
        let mut reader = DelimitedReader::open(file.path(), b',').unwrap();
        assert_eq!(reader.header().position("employee_number"), Some(0));

        match reader.next_item().unwrap().unwrap() {
            RowItem::Row(row) => {
                assert_eq!(row.values[1], "Lee, Ann");
                assert_eq!(row.values[2], "Says \"hi\"");
            }
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[test]
    fn wrong_field_count_is_row_local() {
        let file = csv_file(&format!("{HEADER}E1,Ann,Lee,a@x.co\nE2,only-two\nE3,Cid,Oh,c@x.co\n"));
        let mut reader = DelimitedReader::open(file.path(), b',').unwrap();

        assert!(matches!(reader.next_item().unwrap(), Some(RowItem::Row(_))));
        match reader.next_item().unwrap().unwrap() {
            RowItem::Malformed {
                row_number,
                message,
            } => {
                assert_eq!(row_number, 2);
                assert!(message.contains("expected 4 fields"));
            }
            other => panic!("unexpected item: {other:?}"),
        }
        // The stream keeps going after a malformed row.
        assert!(matches!(
            reader.next_item().unwrap(),
            Some(RowItem::Row(row)) if row.row_number == 3
        ));
    }

    #[test]
    fn seek_discards_rows() {
        let file = csv_file(&format!("{HEADER}E1,A,A,a@x.co\nE2,B,B,b@x.co\nE3,C,C,c@x.co\n"));
        let mut reader = DelimitedReader::open(file.path(), b',').unwrap();
        reader.seek(3).unwrap();
        assert!(matches!(
            reader.next_item().unwrap(),
            Some(RowItem::Row(row)) if row.row_number == 3
        ));
    }

    #[test]
    fn alternate_delimiter() {
        let file = csv_file("employee_number;first_name;last_name;email\nE1;Ann;Lee;a@x.co\n");
        let mut reader = DelimitedReader::open(file.path(), b';').unwrap();
        match reader.next_item().unwrap().unwrap() {
            RowItem::Row(row) => assert_eq!(row.values[3], "a@x.co"),
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[test]
    fn missing_header_columns_fail_fast() {
        let file = csv_file("employee_number,first_name\nE1,Ann\n");
        let err = DelimitedReader::open(file.path(), b',').unwrap_err();
        assert!(matches!(err, ReadError::MissingColumns(_)));
    }
}
