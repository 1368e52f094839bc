use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::gateway::simplify_sql_error_message;
use crate::schema::InvalidNameError;

/// Stable, machine-readable error classes returned to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Forbidden,
    Unauthenticated,
    Engine,
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Engine => "engine_error",
            ErrorKind::Unexpected => "unexpected_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::Engine | ErrorKind::Unexpected => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    InvalidName(#[from] InvalidNameError),

    #[error("Invalid column type: {0}")]
    InvalidColumnType(String),

    #[error("At least one column is required")]
    NoColumns,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid file: {0}")]
    InvalidFile(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Unsupported query type: {0}")]
    UnsupportedQueryType(String),

    #[error("Table '{0}' already exists")]
    TableAlreadyExists(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Access to table '{0}' is not allowed")]
    ForbiddenTable(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Engine(String),

    #[error("Payload too large")]
    PayloadTooLarge,

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    /// Wrap a failure of user-driven SQL, keeping only `<description> [SQL: <query>]`
    pub fn engine(err: sqlx::Error, sql: &str) -> Self {
        let raw = match &err {
            sqlx::Error::Database(db_err) => {
                format!("error returned from database: {} [SQL: {}]", db_err.message(), sql)
            }
            other => format!("{} [SQL: {}]", other, sql),
        };
        tracing::warn!("Engine error: {}", err);
        AppError::Engine(simplify_sql_error_message(&raw))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidName(_)
            | AppError::InvalidColumnType(_)
            | AppError::NoColumns
            | AppError::InvalidInput(_)
            | AppError::InvalidFile(_)
            | AppError::InvalidQuery(_)
            | AppError::UnsupportedQueryType(_)
            | AppError::PayloadTooLarge => ErrorKind::Validation,
            AppError::TableAlreadyExists(_) | AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::ForbiddenTable(_) | AppError::Forbidden(_) => ErrorKind::Forbidden,
            AppError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            AppError::Engine(_) => ErrorKind::Engine,
            AppError::Database(_) | AppError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }
}

/// Implement IntoResponse to convert AppError into HTTP responses
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = match self {
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            _ => kind.status(),
        };

        let message = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                "Internal server error".to_string()
            }
            AppError::Unexpected(ref msg) => {
                tracing::error!("Unexpected error: {}", msg);
                "Internal server error".to_string()
            }
            ref other => other.to_string(),
        };

        let body = Json(json!({
            "error": message,
            "kind": kind.as_str(),
        }));

        (status, body).into_response()
    }
}

/// Result type alias for application results
pub type Result<T> = std::result::Result<T, AppError>;

/// Postgres SQLSTATE for unique constraint violations
pub(crate) const UNIQUE_VIOLATION: &str = "23505";

/// Postgres SQLSTATE for CREATE TABLE on an existing relation
pub(crate) const DUPLICATE_TABLE: &str = "42P07";

/// Check whether a sqlx error carries the given SQLSTATE code
pub(crate) fn has_sqlstate(err: &sqlx::Error, code: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(code),
        _ => false,
    }
}
