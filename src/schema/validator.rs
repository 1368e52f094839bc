//! Identifier validation.
//!
//! Every table or column name that ends up inside generated SQL goes through
//! [`Ident`]; nothing else in the crate splices user text into statements.

use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

use crate::constants::{ID_COLUMN, MAX_IDENTIFIER_BYTES, RESERVED_KEYWORDS, RESERVED_NAMES};

/// Why a name was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameRejection {
    Empty,
    ReservedName,
    ReservedKeyword,
    InvalidCharacters,
    LeadingDigit,
    TooLong,
    Duplicate,
    ImplicitId,
}

impl fmt::Display for NameRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            NameRejection::Empty => "name is required",
            NameRejection::ReservedName => "name is reserved and cannot be used",
            NameRejection::ReservedKeyword => "name is a reserved SQL keyword",
            NameRejection::InvalidCharacters => {
                "name must be alphanumeric and can include underscores"
            }
            NameRejection::LeadingDigit => "column names cannot start with a number",
            NameRejection::TooLong => "name is longer than 63 bytes",
            NameRejection::Duplicate => "column name is used more than once",
            NameRejection::ImplicitId => "column 'id' is added automatically",
        };
        f.write_str(reason)
    }
}

/// Structured validation failure for a table or column name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid name '{offending_name}': {reason}")]
pub struct InvalidNameError {
    pub reason: NameRejection,
    pub offending_name: String,
}

impl InvalidNameError {
    fn new(reason: NameRejection, name: &str) -> Self {
        Self {
            reason,
            offending_name: name.to_string(),
        }
    }
}

/// Letters accepted besides ASCII: Turkish and Cyrillic (`а-я`, `А-Я`, `ё`, `Ё`)
fn is_permitted_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || c == '_'
        || matches!(
            c,
            'ç' | 'Ç' | 'ğ' | 'Ğ' | 'ı' | 'İ' | 'ö' | 'Ö' | 'ş' | 'Ş' | 'ü' | 'Ü' | 'ё' | 'Ё'
        )
        || ('а'..='я').contains(&c)
        || ('А'..='Я').contains(&c)
}

/// Validate a table (or any) identifier
///
/// Rules apply in order and the first failure wins: reserved schema/role
/// names, SQL keywords, then the character set.
pub fn validate_identifier(name: &str) -> Result<(), InvalidNameError> {
    if name.is_empty() {
        return Err(InvalidNameError::new(NameRejection::Empty, name));
    }

    let lower = name.to_lowercase();
    if RESERVED_NAMES.contains(&lower.as_str()) {
        return Err(InvalidNameError::new(NameRejection::ReservedName, name));
    }

    let upper = name.to_uppercase();
    if RESERVED_KEYWORDS.contains(&upper.as_str()) {
        return Err(InvalidNameError::new(NameRejection::ReservedKeyword, name));
    }

    if !name.chars().all(is_permitted_char) {
        return Err(InvalidNameError::new(
            NameRejection::InvalidCharacters,
            name,
        ));
    }

    if name.len() > MAX_IDENTIFIER_BYTES {
        return Err(InvalidNameError::new(NameRejection::TooLong, name));
    }

    Ok(())
}

/// Validate a column identifier (identifier rules plus no leading digit)
pub fn validate_column_name(name: &str) -> Result<(), InvalidNameError> {
    validate_identifier(name)?;

    if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return Err(InvalidNameError::new(NameRejection::LeadingDigit, name));
    }

    Ok(())
}

/// Validate a full column list for one table
pub fn validate_column_names<'a, I>(names: I) -> Result<(), InvalidNameError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    for name in names {
        validate_column_name(name)?;
        if name.eq_ignore_ascii_case(ID_COLUMN) {
            return Err(InvalidNameError::new(NameRejection::ImplicitId, name));
        }
        if !seen.insert(name) {
            return Err(InvalidNameError::new(NameRejection::Duplicate, name));
        }
    }
    Ok(())
}

/// Normalize a user-typed table name: trimmed, lowercase, spaces become `_`
pub fn normalize_table_name(raw: &str) -> String {
    raw.trim().to_lowercase().replace(' ', "_")
}

/// An identifier that passed validation and may be spliced into SQL
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident(String);

impl Ident {
    pub fn table(name: &str) -> Result<Self, InvalidNameError> {
        validate_identifier(name)?;
        Ok(Self(name.to_string()))
    }

    pub fn column(name: &str) -> Result<Self, InvalidNameError> {
        validate_column_name(name)?;
        Ok(Self(name.to_string()))
    }

    /// A database role, held to the same rules as table names
    pub fn role(name: &str) -> Result<Self, InvalidNameError> {
        validate_identifier(name)?;
        Ok(Self(name.to_string()))
    }

    /// The implicit primary key column
    pub fn id() -> Self {
        Self(ID_COLUMN.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Renders the identifier double-quoted, ready for a statement
impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0)
    }
}
