use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Column types a dynamic table may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    String,
    Integer,
    Boolean,
    Date,
    Float,
}

impl SemanticType {
    /// Parse a user-declared type name
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw.trim().to_lowercase().as_str() {
            "string" => Ok(SemanticType::String),
            "integer" => Ok(SemanticType::Integer),
            "boolean" => Ok(SemanticType::Boolean),
            "date" => Ok(SemanticType::Date),
            "float" => Ok(SemanticType::Float),
            _ => Err(AppError::InvalidColumnType(raw.to_string())),
        }
    }

    /// Physical column type on the engine
    pub fn sql_type(&self) -> &'static str {
        match self {
            SemanticType::String => "TEXT",
            SemanticType::Integer => "INTEGER",
            SemanticType::Boolean => "BOOLEAN",
            SemanticType::Date => "DATE",
            SemanticType::Float => "DOUBLE PRECISION",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::String => "string",
            SemanticType::Integer => "integer",
            SemanticType::Boolean => "boolean",
            SemanticType::Date => "date",
            SemanticType::Float => "float",
        }
    }
}

/// A column as the caller declares it in the create-table form
#[derive(Debug, Clone, Deserialize)]
pub struct DeclaredColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

/// A validated column ready for DDL
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: SemanticType,
}

/// A column as the engine reports it for an existing table
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ColumnInfo {
    #[sqlx(rename = "column_name")]
    pub name: String,
    pub data_type: String,
}
