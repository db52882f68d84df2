//! Workbook reader (XLSX family, legacy XLS) via calamine.
//!
//! Reads the first sheet, data only. Trailing fully-empty rows are trimmed
//! up front so they never count as data.

use super::{Header, ReadError, RowItem, RowReader};
use calamine::{open_workbook_auto, Data, Range, Reader};
use rollcall_protocol::types::RawRow;
use std::path::Path;

#[derive(Debug)]
pub struct WorkbookReader {
    header: Header,
    range: Range<Data>,
    /// Relative index of the next data row (header is relative row 0).
    next_row: usize,
    /// Relative index one past the last non-empty data row.
    end_row: usize,
    rows_produced: u64,
}

impl WorkbookReader {
    pub fn open(path: &Path) -> Result<Self, ReadError> {
        let mut workbook =
            open_workbook_auto(path).map_err(|e| ReadError::Workbook(e.to_string()))?;
        let sheet_name = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or(ReadError::EmptyFile)?;
        let range = workbook
            .worksheet_range(&sheet_name)
            .map_err(|e| ReadError::Workbook(e.to_string()))?;
        Self::from_range(range)
    }

    /// Build from an in-memory range (also the test seam).
    pub(crate) fn from_range(range: Range<Data>) -> Result<Self, ReadError> {
        let height = range.height();
        if height == 0 {
            return Err(ReadError::EmptyFile);
        }

        let width = range.width();
        let header_cells: Vec<String> = (0..width)
            .map(|col| cell_to_string(range.get((0, col)).unwrap_or(&Data::Empty)))
            .collect();
        let header = Header::from_columns(&header_cells)?;

        // Sheet dimensions routinely overcount; trim trailing all-empty rows.
        let mut end_row = height;
        while end_row > 1 && row_is_empty(&range, end_row - 1, width) {
            end_row -= 1;
        }

        Ok(Self {
            header,
            range,
            next_row: 1,
            end_row,
            rows_produced: 0,
        })
    }
}

fn row_is_empty(range: &Range<Data>, row: usize, width: usize) -> bool {
    (0..width).all(|col| {
        match range.get((row, col)) {
            None | Some(Data::Empty) => true,
            Some(Data::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        }
    })
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            // Integral floats render without the trailing ".0" Excel adds.
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(naive) => {
                if naive.time() == chrono::NaiveTime::MIN {
                    naive.date().format("%Y-%m-%d").to_string()
                } else {
                    naive.format("%Y-%m-%d %H:%M:%S").to_string()
                }
            }
            None => dt.as_f64().to_string(),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("{e:?}"),
    }
}

impl RowReader for WorkbookReader {
    fn header(&self) -> &Header {
        &self.header
    }

    fn next_item(&mut self) -> Result<Option<RowItem>, ReadError> {
        if self.next_row >= self.end_row {
            return Ok(None);
        }
        let width = self.range.width();
        let values: Vec<String> = (0..width)
            .map(|col| cell_to_string(self.range.get((self.next_row, col)).unwrap_or(&Data::Empty)))
            .collect();
        self.next_row += 1;
        self.rows_produced += 1;
        Ok(Some(RowItem::Row(RawRow::new(self.rows_produced, values))))
    }

    fn rows_produced(&self) -> u64 {
        self.rows_produced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(cells: &[&[&str]]) -> Range<Data> {
        let height = cells.len() as u32;
        let width = cells.iter().map(|r| r.len()).max().unwrap_or(0) as u32;
        let mut range = Range::new((0, 0), (height - 1, width - 1));
        for (r, row) in cells.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                if !value.is_empty() {
                    range.set_value((r as u32, c as u32), Data::String(value.to_string()));
                }
            }
        }
        range
    }

    #[test]
    fn reads_first_sheet_rows() {
        let range = sheet(&[
            &["employee_number", "first_name", "last_name", "email"],
            &["E1", "Ann", "Lee", "a@x.co"],
            &["E2", "Bo", "Ng", "b@x.co"],
        ]);
        let mut reader = WorkbookReader::from_range(range).unwrap();

        match reader.next_item().unwrap().unwrap() {
            RowItem::Row(row) => {
                assert_eq!(row.row_number, 1);
                assert_eq!(row.values, vec!["E1", "Ann", "Lee", "a@x.co"]);
            }
            other => panic!("unexpected item: {other:?}"),
        }
        assert!(matches!(reader.next_item().unwrap(), Some(RowItem::Row(_))));
        assert!(reader.next_item().unwrap().is_none());
    }

    #[test]
    fn trailing_empty_rows_are_not_data() {
        let range = sheet(&[
            &["employee_number", "first_name", "last_name", "email"],
            &["E1", "Ann", "Lee", "a@x.co"],
            &["", "", "", ""],
            &["", "", "", ""],
        ]);
        let mut reader = WorkbookReader::from_range(range).unwrap();
        assert!(matches!(reader.next_item().unwrap(), Some(RowItem::Row(_))));
        assert!(reader.next_item().unwrap().is_none());
        assert_eq!(reader.rows_produced(), 1);
    }

    #[test]
    fn numeric_cells_render_as_plain_strings() {
        let mut range = Range::new((0, 0), (1, 4));
        for (c, name) in ["employee_number", "first_name", "last_name", "email", "salary"]
            .iter()
            .enumerate()
        {
            range.set_value((0, c as u32), Data::String(name.to_string()));
        }
        range.set_value((1, 0), Data::String("E1".into()));
        range.set_value((1, 1), Data::String("Ann".into()));
        range.set_value((1, 2), Data::String("Lee".into()));
        range.set_value((1, 3), Data::String("a@x.co".into()));
        range.set_value((1, 4), Data::Float(1000.0));

        let mut reader = WorkbookReader::from_range(range).unwrap();
        match reader.next_item().unwrap().unwrap() {
            RowItem::Row(row) => assert_eq!(row.values[4], "1000"),
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[test]
    fn missing_required_columns_fail_fast() {
        let range = sheet(&[&["employee_number", "first_name"], &["E1", "Ann"]]);
        let err = WorkbookReader::from_range(range).unwrap_err();
        assert!(matches!(err, ReadError::MissingColumns(_)));
    }
}
