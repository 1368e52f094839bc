use chrono::NaiveDate;

use crate::constants::ID_COLUMN;
use crate::error::{AppError, Result};
use crate::models::{ColumnSpec, DeclaredColumn, SemanticType};
use crate::schema::validator::validate_column_names;
use crate::tabular::{CellValue, TabularData};

/// Text layouts recognized as dates in spreadsheet cells
pub const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y"];

pub fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}

/// Turn a spreadsheet header into a column name candidate
pub fn sanitize_header(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            ' ' | '.' | '/' | '\\' | '-' => '_',
            other => other,
        })
        .collect::<String>()
        .to_lowercase()
}

/// Columns from the create-table form, in caller order
pub fn columns_from_declared(declared: &[DeclaredColumn]) -> Result<Vec<ColumnSpec>> {
    if declared.is_empty() {
        return Err(AppError::NoColumns);
    }

    let names: Vec<String> = declared.iter().map(|c| c.name.trim().to_string()).collect();
    validate_column_names(names.iter().map(String::as_str))?;

    names
        .into_iter()
        .zip(declared)
        .map(|(name, column)| {
            Ok(ColumnSpec {
                name,
                column_type: SemanticType::parse(&column.column_type)?,
            })
        })
        .collect()
}

/// Columns inferred from a parsed upload
pub fn columns_from_tabular(data: &TabularData) -> Result<Vec<ColumnSpec>> {
    let names: Vec<String> = data
        .headers
        .iter()
        .map(|h| sanitize_header(h))
        .filter(|h| !h.is_empty())
        .collect();

    if names.is_empty() {
        return Err(AppError::NoColumns);
    }
    if names.len() != data.headers.len() {
        return Err(AppError::InvalidInput(
            "Every column in the file needs a header".to_string(),
        ));
    }

    validate_column_names(names.iter().map(String::as_str))?;

    Ok(names
        .into_iter()
        .enumerate()
        .map(|(index, name)| ColumnSpec {
            name,
            column_type: infer_column_type(data.column(index)),
        })
        .collect())
}

/// Pick the narrowest semantic type that holds every non-null cell
pub fn infer_column_type<'a, I>(cells: I) -> SemanticType
where
    I: IntoIterator<Item = &'a CellValue>,
{
    let mut seen_any = false;
    let mut integer = false;
    let mut wide_integer = false;
    let mut float = false;
    let mut boolean = false;
    let mut date = false;
    let mut text = false;

    for cell in cells {
        match cell {
            CellValue::Null => continue,
            CellValue::Integer(v) => {
                integer = true;
                wide_integer |= i32::try_from(*v).is_err();
            }
            CellValue::Float(_) => float = true,
            CellValue::Boolean(_) => boolean = true,
            CellValue::Date(_) => date = true,
            CellValue::Text(s) => {
                if parse_date_text(s).is_some() {
                    date = true;
                } else {
                    text = true;
                }
            }
        }
        seen_any = true;
    }

    if !seen_any || text {
        return SemanticType::String;
    }

    match (integer || float, boolean, date) {
        (true, false, false) if float || wide_integer => SemanticType::Float,
        (true, false, false) => SemanticType::Integer,
        (false, true, false) => SemanticType::Boolean,
        (false, false, true) => SemanticType::Date,
        _ => SemanticType::String,
    }
}

/// Physical header order: implicit `id` first, then the columns
pub fn physical_headers(columns: &[ColumnSpec]) -> Vec<String> {
    std::iter::once(ID_COLUMN.to_string())
        .chain(columns.iter().map(|c| c.name.clone()))
        .collect()
}
