//! Paged, filtered reads of a single dynamic table.
//!
//! Column names in filters and ordering must be valid identifiers and real
//! columns of the table; values are always bound and cast to the column's
//! engine type.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgConnection, Postgres, QueryBuilder};

use crate::constants::ID_COLUMN;
use crate::db::catalog::escape_like;
use crate::db::introspect;
use crate::error::{AppError, Result};
use crate::models::{ColumnInfo, Identity};
use crate::policy;
use crate::schema::Ident;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "<>",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::Contains => "ILIKE",
        };
        f.write_str(op)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RowFilter {
    pub column: String,
    pub op: FilterOp,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RowQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    #[serde(default)]
    pub filters: Vec<RowFilter>,
    pub order_by: Option<String>,
    #[serde(default)]
    pub descending: bool,
}

#[derive(Debug, Serialize)]
pub struct RowPage {
    pub table_name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub duration_ms: f64,
}

/// A filter whose column has been checked against the table
#[derive(Debug, Clone)]
struct ResolvedFilter {
    column: Ident,
    cast: Option<&'static str>,
    op: FilterOp,
    value: Option<String>,
}

/// Engine type for a bound filter value; anything unlisted compares as text
fn cast_for(data_type: &str) -> Option<&'static str> {
    match data_type {
        "smallint" => Some("SMALLINT"),
        "integer" => Some("INTEGER"),
        "bigint" => Some("BIGINT"),
        "real" => Some("REAL"),
        "double precision" => Some("DOUBLE PRECISION"),
        "numeric" => Some("NUMERIC"),
        "boolean" => Some("BOOLEAN"),
        "date" => Some("DATE"),
        "timestamp without time zone" => Some("TIMESTAMP"),
        "timestamp with time zone" => Some("TIMESTAMPTZ"),
        "text" | "character varying" | "character" => Some("TEXT"),
        _ => None,
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn find_column<'a>(columns: &'a [ColumnInfo], name: &str) -> Result<&'a ColumnInfo> {
    columns
        .iter()
        .find(|c| c.name == name)
        .ok_or_else(|| AppError::InvalidInput(format!("Unknown column '{}'", name)))
}

fn resolve_filters(filters: &[RowFilter], columns: &[ColumnInfo]) -> Result<Vec<ResolvedFilter>> {
    filters
        .iter()
        .map(|filter| {
            let column = Ident::column(filter.column.trim())?;
            let info = find_column(columns, column.as_str())?;
            let value = value_text(&filter.value);

            if value.is_none() && !matches!(filter.op, FilterOp::Eq | FilterOp::Ne) {
                return Err(AppError::InvalidInput(format!(
                    "Filter on '{}' needs a value",
                    column.as_str()
                )));
            }

            Ok(ResolvedFilter {
                column,
                cast: cast_for(&info.data_type),
                op: filter.op,
                value,
            })
        })
        .collect()
}

fn push_where(qb: &mut QueryBuilder<'_, Postgres>, filters: &[ResolvedFilter]) {
    for (index, filter) in filters.iter().enumerate() {
        qb.push(if index == 0 { " WHERE " } else { " AND " });

        let column = &filter.column;
        match (&filter.value, filter.op) {
            (None, FilterOp::Ne) => {
                qb.push(format!("{} IS NOT NULL", column));
            }
            (None, _) => {
                qb.push(format!("{} IS NULL", column));
            }
            (Some(value), FilterOp::Contains) => {
                qb.push(format!("{}::text ILIKE ", column));
                qb.push_bind(format!("%{}%", escape_like(value)));
            }
            (Some(value), op) => match filter.cast {
                Some(ty) => {
                    qb.push(format!("{} {} CAST(", column, op));
                    qb.push_bind(value.clone());
                    qb.push(format!(" AS {})", ty));
                }
                None => {
                    qb.push(format!("{}::text {} ", column, op));
                    qb.push_bind(value.clone());
                }
            },
        }
    }
}

fn order_clause(
    order_by: Option<&str>,
    descending: bool,
    columns: &[ColumnInfo],
) -> Result<Option<String>> {
    let direction = if descending { "DESC" } else { "ASC" };

    match order_by.map(str::trim).filter(|s| !s.is_empty()) {
        Some(name) => {
            let column = Ident::column(name)?;
            find_column(columns, column.as_str())?;
            Ok(Some(format!(" ORDER BY {} {}", column, direction)))
        }
        None if columns.iter().any(|c| c.name == ID_COLUMN) => {
            Ok(Some(format!(" ORDER BY {} {}", Ident::id(), direction)))
        }
        None => Ok(None),
    }
}

/// Clamp paging input: page size within `1..=max_page_size`, page from 1 up
/// to the last page whose offset still fits in an `i64`
pub fn page_bounds(page: Option<i64>, page_size: Option<i64>, max_page_size: i64) -> (i64, i64) {
    let size = page_size.unwrap_or(max_page_size).clamp(1, max_page_size.max(1));
    let page = page.unwrap_or(1).clamp(1, i64::MAX / size);
    (page, size)
}

/// Rows to skip before `page`
pub fn page_offset(page: i64, page_size: i64) -> i64 {
    (page - 1).saturating_mul(page_size)
}

/// One page of a table the caller may read
pub async fn fetch_rows(
    conn: &mut PgConnection,
    table_name: &str,
    user: Option<&Identity>,
    query: &RowQuery,
    max_page_size: i64,
) -> Result<RowPage> {
    let started = Instant::now();

    let access = policy::require_readable(conn, table_name, user).await?;
    let table = Ident::table(&access.table_name)?;
    let columns = introspect::list_columns(conn, table.as_str()).await?;

    let filters = resolve_filters(&query.filters, &columns)?;
    let order = order_clause(query.order_by.as_deref(), query.descending, &columns)?;
    let (page, page_size) = page_bounds(query.page, query.page_size, max_page_size);

    let mut count_qb: QueryBuilder<Postgres> =
        QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", table));
    push_where(&mut count_qb, &filters);
    let counted = count_qb
        .build_query_scalar::<i64>()
        .fetch_one(&mut *conn)
        .await;
    let total = counted.map_err(|e| AppError::engine(e, count_qb.sql()))?;

    let mut rows_qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
        "SELECT row_to_json(browse_row.*) FROM {} AS browse_row",
        table
    ));
    push_where(&mut rows_qb, &filters);
    if let Some(order) = &order {
        rows_qb.push(order);
    }
    rows_qb.push(" LIMIT ");
    rows_qb.push_bind(page_size);
    rows_qb.push(" OFFSET ");
    rows_qb.push_bind(page_offset(page, page_size));

    let fetched = rows_qb
        .build_query_scalar::<Value>()
        .fetch_all(&mut *conn)
        .await;
    let objects = fetched.map_err(|e| AppError::engine(e, rows_qb.sql()))?;

    let headers: Vec<String> = columns.into_iter().map(|c| c.name).collect();
    let rows = objects
        .iter()
        .map(|object| {
            headers
                .iter()
                .map(|h| object.get(h).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect();

    Ok(RowPage {
        table_name: access.table_name,
        headers,
        rows,
        total,
        page,
        page_size,
        duration_ms: started.elapsed().as_secs_f64() * 1000.0,
    })
}
