//! Uploaded spreadsheet parsing.
//!
//! CSV goes through arrow's reader, which also infers per-column types over
//! every record; xlsx reads the first worksheet with calamine. Both produce
//! the same [`TabularData`] shape for schema inference and loading.

use std::io::Cursor;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::csv::{reader::Format, ReaderBuilder};
use arrow::datatypes::{DataType, Date32Type, Float64Type, Int64Type};
use calamine::{open_workbook_from_rs, Data, DataType as _, Reader, Xlsx};
use chrono::NaiveDate;

use crate::error::{AppError, Result};

/// A single parsed cell
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    Text(String),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Textual rendering, used when a column falls back to `string`
    pub fn to_text(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            CellValue::Integer(v) => Some(v.to_string()),
            CellValue::Float(v) => Some(v.to_string()),
            CellValue::Boolean(v) => Some(v.to_string()),
            CellValue::Date(v) => Some(v.format("%Y-%m-%d").to_string()),
            CellValue::Text(v) => Some(v.clone()),
        }
    }
}

/// Header row plus data rows, every row as wide as the header
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TabularData {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl TabularData {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Iterate one column's cells
    pub fn column(&self, index: usize) -> impl Iterator<Item = &CellValue> {
        self.rows.iter().filter_map(move |row| row.get(index))
    }
}

/// Supported upload formats, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Xlsx,
}

impl FileFormat {
    pub fn from_filename(filename: &str) -> Result<Self> {
        let lower = filename.to_lowercase();
        if lower.ends_with(".csv") {
            Ok(FileFormat::Csv)
        } else if lower.ends_with(".xlsx") {
            Ok(FileFormat::Xlsx)
        } else {
            Err(AppError::InvalidFile(
                "Only .csv and .xlsx files are accepted".to_string(),
            ))
        }
    }
}

/// Parse an uploaded file into rows with typed cells
pub fn parse(format: FileFormat, bytes: &[u8]) -> Result<TabularData> {
    match format {
        FileFormat::Csv => parse_csv(bytes),
        FileFormat::Xlsx => parse_xlsx(bytes),
    }
}

fn file_error(err: impl std::fmt::Display) -> AppError {
    AppError::InvalidFile(format!("Error reading file: {}", err))
}

pub fn parse_csv(bytes: &[u8]) -> Result<TabularData> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(AppError::NoColumns);
    }

    let format = Format::default().with_header(true);
    let (schema, _) = format
        .infer_schema(Cursor::new(bytes), None)
        .map_err(file_error)?;
    let schema = Arc::new(schema);

    let headers: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();

    let reader = ReaderBuilder::new(Arc::clone(&schema))
        .with_format(format)
        .build(Cursor::new(bytes))
        .map_err(file_error)?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.map_err(file_error)?;
        let columns: Vec<ArrayRef> = batch
            .columns()
            .iter()
            .map(normalize_array)
            .collect::<Result<_>>()?;

        for row in 0..batch.num_rows() {
            rows.push(columns.iter().map(|col| arrow_cell(col, row)).collect());
        }
    }

    Ok(TabularData { headers, rows })
}

/// Cast anything we do not read natively (timestamps, other widths) to text
fn normalize_array(array: &ArrayRef) -> Result<ArrayRef> {
    match array.data_type() {
        DataType::Int64
        | DataType::Float64
        | DataType::Boolean
        | DataType::Date32
        | DataType::Utf8
        | DataType::Null => Ok(Arc::clone(array)),
        _ => arrow::compute::cast(array, &DataType::Utf8).map_err(file_error),
    }
}

fn arrow_cell(array: &ArrayRef, row: usize) -> CellValue {
    if array.is_null(row) {
        return CellValue::Null;
    }
    match array.data_type() {
        DataType::Int64 => CellValue::Integer(array.as_primitive::<Int64Type>().value(row)),
        DataType::Float64 => CellValue::Float(array.as_primitive::<Float64Type>().value(row)),
        DataType::Boolean => CellValue::Boolean(array.as_boolean().value(row)),
        DataType::Date32 => array
            .as_primitive::<Date32Type>()
            .value_as_date(row)
            .map(CellValue::Date)
            .unwrap_or(CellValue::Null),
        DataType::Utf8 => {
            let text = array.as_string::<i32>().value(row);
            if text.is_empty() {
                CellValue::Null
            } else {
                CellValue::Text(text.to_string())
            }
        }
        _ => CellValue::Null,
    }
}

pub fn parse_xlsx(bytes: &[u8]) -> Result<TabularData> {
    let mut workbook: Xlsx<_> =
        open_workbook_from_rs(Cursor::new(bytes.to_vec())).map_err(file_error)?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AppError::InvalidFile("Workbook has no worksheets".to_string()))?
        .map_err(file_error)?;

    let mut sheet_rows = range.rows();
    let headers: Vec<String> = match sheet_rows.next() {
        Some(header_row) => header_row.iter().map(header_text).collect(),
        None => return Err(AppError::NoColumns),
    };

    let width = headers.len();
    let rows = sheet_rows
        .filter(|row| row.iter().any(|cell| !matches!(cell, Data::Empty)))
        .map(|row| {
            let mut cells: Vec<CellValue> = row.iter().take(width).map(xlsx_cell).collect();
            cells.resize(width, CellValue::Null);
            cells
        })
        .collect();

    Ok(TabularData { headers, rows })
}

fn header_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}

fn xlsx_cell(cell: &Data) -> CellValue {
    match cell {
        Data::Empty | Data::Error(_) => CellValue::Null,
        Data::Int(v) => CellValue::Integer(*v),
        // Excel stores every number as a double
        Data::Float(v) if v.fract() == 0.0 && v.abs() < 9.0e15 => CellValue::Integer(*v as i64),
        Data::Float(v) => CellValue::Float(*v),
        Data::Bool(v) => CellValue::Boolean(*v),
        Data::String(s) if s.trim().is_empty() => CellValue::Null,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::DateTime(_) | Data::DateTimeIso(_) => cell
            .as_date()
            .map(CellValue::Date)
            .unwrap_or_else(|| CellValue::Text(cell.to_string())),
        other => CellValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_filename() {
        assert_eq!(FileFormat::from_filename("a.csv").unwrap(), FileFormat::Csv);
        assert_eq!(FileFormat::from_filename("A.XLSX").unwrap(), FileFormat::Xlsx);
        assert!(matches!(
            FileFormat::from_filename("notes.txt"),
            Err(AppError::InvalidFile(_))
        ));
    }

    #[test]
    fn test_parse_csv_typed_cells() {
        let csv = b"Name,Score,Ratio,Passed,Day\nada,90,0.5,true,2024-01-02\nbob,75,1.25,false,2024-02-03\n";
        let data = parse_csv(csv).unwrap();

        assert_eq!(data.headers, vec!["Name", "Score", "Ratio", "Passed", "Day"]);
        assert_eq!(data.row_count(), 2);
        assert_eq!(data.rows[0][0], CellValue::Text("ada".to_string()));
        assert_eq!(data.rows[0][1], CellValue::Integer(90));
        assert_eq!(data.rows[1][2], CellValue::Float(1.25));
        assert_eq!(data.rows[1][3], CellValue::Boolean(false));
        assert_eq!(
            data.rows[0][4],
            CellValue::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap())
        );
    }

    #[test]
    fn test_parse_csv_empty_cells_are_null() {
        let csv = b"a,b\n1,\n,x\n";
        let data = parse_csv(csv).unwrap();
        assert!(data.rows[0][1].is_null());
        assert!(data.rows[1][0].is_null());
    }

    #[test]
    fn test_parse_csv_header_only() {
        let data = parse_csv(b"Name,Score\n").unwrap();
        assert_eq!(data.headers.len(), 2);
        assert_eq!(data.row_count(), 0);
    }

    #[test]
    fn test_parse_csv_blank_file() {
        assert!(matches!(parse_csv(b"  \n"), Err(AppError::NoColumns)));
    }

    #[test]
    fn test_parse_xlsx_garbage() {
        assert!(matches!(
            parse_xlsx(b"definitely not a zip archive"),
            Err(AppError::InvalidFile(_))
        ));
    }

    #[test]
    fn test_cell_text_rendering() {
        assert_eq!(CellValue::Integer(3).to_text().as_deref(), Some("3"));
        assert_eq!(CellValue::Boolean(true).to_text().as_deref(), Some("true"));
        assert_eq!(CellValue::Null.to_text(), None);
    }
}
