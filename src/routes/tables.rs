use axum::{
    extract::{multipart::MultipartError, Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::{CurrentUser, OptionalUser};
use crate::browse::{self, RowPage, RowQuery};
use crate::constants::{ERR_LOGIN_REQUIRED, ERR_TABLE_NOT_FOUND, MAX_PAGE_SIZE};
use crate::db::{catalog, introspect};
use crate::error::{AppError, Result};
use crate::lifecycle::{ColumnSource, CreateTableRequest, CreatedTable, DeletedTable};
use crate::models::{ColumnInfo, DeclaredColumn, TableSummary};
use crate::policy;
use crate::schema::Ident;
use crate::tabular::{self, FileFormat};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateTableBody {
    pub table_name: String,
    pub table_status: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub columns: Vec<DeclaredColumn>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListTablesParams {
    pub search: Option<String>,
    pub category: Option<String>,
    pub mine: Option<bool>,
    pub favorites: Option<bool>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TableListResponse {
    pub tables: Vec<TableSummary>,
    pub page: i64,
    pub page_size: i64,
}

#[derive(Debug, Serialize)]
pub struct TableDetailsResponse {
    pub id: i32,
    pub table_name: String,
    pub table_status: String,
    pub table_description: Option<String>,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_owner: bool,
    pub headers: Vec<String>,
    pub columns: Vec<ColumnInfo>,
    pub row_count: i64,
    pub storage_size_bytes: u64,
    pub storage_size_human: String,
}

/// Format bytes into human-readable string
pub(crate) fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Create a table from declared columns
///
/// POST /api/tables
pub async fn create_table(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<CreateTableBody>,
) -> Result<(StatusCode, Json<CreatedTable>)> {
    let request = CreateTableRequest {
        table_name: body.table_name,
        table_status: body.table_status,
        description: body.description,
        category: body.category,
        source: ColumnSource::Declared(body.columns),
    };

    let created = state.lifecycle().create(&request, &user).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge
    } else {
        AppError::InvalidInput(format!("Malformed upload: {}", err))
    }
}

/// Create a table from an uploaded `.csv` or `.xlsx` file
///
/// POST /api/tables/upload (multipart)
///
/// Fields: `file`, `table_name`, optional `table_status`, `description`, `category`.
/// Column names come from the header row, column types are inferred from
/// the values, and every row is loaded.
pub async fn upload_table(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<CreatedTable>)> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut table_name = None;
    let mut table_status = None;
    let mut description = None;
    let mut category = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                file = Some((filename, bytes.to_vec()));
            }
            "table_name" => table_name = Some(field.text().await.map_err(multipart_error)?),
            "table_status" => table_status = Some(field.text().await.map_err(multipart_error)?),
            "description" => description = Some(field.text().await.map_err(multipart_error)?),
            "category" => category = Some(field.text().await.map_err(multipart_error)?),
            other => tracing::debug!("Ignoring upload field {}", other),
        }
    }

    let (filename, bytes) =
        file.ok_or_else(|| AppError::InvalidInput("Missing 'file' field".to_string()))?;
    let table_name = table_name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| AppError::InvalidInput("Missing 'table_name' field".to_string()))?;

    if bytes.len() > state.config.max_upload_bytes {
        tracing::warn!(
            "Upload too large from user {}: {} bytes (max: {})",
            user.user_id,
            bytes.len(),
            state.config.max_upload_bytes
        );
        return Err(AppError::PayloadTooLarge);
    }

    let format = FileFormat::from_filename(&filename)?;
    let data = tokio::task::spawn_blocking(move || tabular::parse(format, &bytes))
        .await
        .map_err(|e| AppError::Unexpected(format!("Upload parsing task failed: {}", e)))??;

    tracing::info!(
        "Parsed {} with {} columns and {} rows for user {}",
        filename,
        data.headers.len(),
        data.row_count(),
        user.user_id
    );

    let request = CreateTableRequest {
        table_name,
        table_status,
        description: description.filter(|d| !d.trim().is_empty()),
        category: category.filter(|c| !c.trim().is_empty()),
        source: ColumnSource::File(data),
    };

    let created = state.lifecycle().create(&request, &user).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// List and search the tables the caller can see
///
/// GET /api/tables?search=&category=&mine=&favorites=&page=&page_size=
pub async fn list_tables(
    State(state): State<AppState>,
    OptionalUser(user): OptionalUser,
    Query(params): Query<ListTablesParams>,
) -> Result<Json<TableListResponse>> {
    let mine = params.mine.unwrap_or(false);
    let favorites = params.favorites.unwrap_or(false);
    if (mine || favorites) && user.is_none() {
        return Err(AppError::Unauthenticated(ERR_LOGIN_REQUIRED.to_string()));
    }

    let (page, page_size) = browse::page_bounds(params.page, params.page_size, MAX_PAGE_SIZE);
    let filter = catalog::TableListFilter {
        search: params.search,
        category: params.category,
        mine,
        favorites,
        limit: page_size,
        offset: browse::page_offset(page, page_size),
    };

    let mut conn = state.pool.acquire().await?;
    let tables =
        catalog::list_tables(&mut conn, user.as_ref().map(|u| u.user_id), &filter).await?;

    Ok(Json(TableListResponse {
        tables,
        page,
        page_size,
    }))
}

/// Definition, columns and size of one table
///
/// GET /api/tables/:name
pub async fn table_details(
    State(state): State<AppState>,
    OptionalUser(user): OptionalUser,
    Path(name): Path<String>,
) -> Result<Json<TableDetailsResponse>> {
    let mut conn = state.pool.acquire().await?;

    let access = policy::require_readable(&mut conn, &name, user.as_ref()).await?;
    let definition = catalog::find_definition(&mut conn, &access.table_name)
        .await?
        .ok_or_else(|| AppError::NotFound(ERR_TABLE_NOT_FOUND.to_string()))?;

    let table = Ident::table(&definition.table_name)?;
    let columns = introspect::list_columns(&mut conn, table.as_str()).await?;
    let row_count = introspect::row_count(&mut conn, &table).await?;
    let storage_size_bytes = introspect::storage_size(&mut conn, &table).await?.max(0) as u64;

    Ok(Json(TableDetailsResponse {
        id: definition.id,
        is_owner: policy::is_owner(&access, user.as_ref()),
        headers: columns.iter().map(|c| c.name.clone()).collect(),
        columns,
        row_count,
        storage_size_bytes,
        storage_size_human: format_bytes(storage_size_bytes),
        table_name: definition.table_name,
        table_status: definition.table_status,
        table_description: definition.table_description,
        category: definition.category,
        created_at: definition.created_at,
    }))
}

/// One page of rows, optionally filtered and ordered
///
/// POST /api/tables/:name/rows
pub async fn fetch_table_rows(
    State(state): State<AppState>,
    OptionalUser(user): OptionalUser,
    Path(name): Path<String>,
    body: Option<Json<RowQuery>>,
) -> Result<Json<RowPage>> {
    let query = body.map(|Json(q)| q).unwrap_or_default();
    let mut conn = state.pool.acquire().await?;

    let page = browse::fetch_rows(
        &mut conn,
        &name,
        user.as_ref(),
        &query,
        state.config.select_row_limit,
    )
    .await?;

    Ok(Json(page))
}

/// Drop a table owned by the caller
///
/// DELETE /api/tables/:name
pub async fn delete_table(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(name): Path<String>,
) -> Result<Json<DeletedTable>> {
    let deleted = state.lifecycle().delete(&name, &user).await?;
    Ok(Json(deleted))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }
}
