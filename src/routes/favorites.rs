use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::CurrentUser;
use crate::browse::{self, page_bounds};
use crate::constants::MAX_PAGE_SIZE;
use crate::db::catalog;
use crate::error::Result;
use crate::models::{FavoriteLink, TableSummary};
use crate::policy;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct FavoritesParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct FavoriteRemoved {
    pub success: bool,
}

/// POST /api/tables/:name/favorite
///
/// Returns 409 Conflict when the table is already a favorite.
pub async fn add_favorite(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<FavoriteLink>)> {
    let mut conn = state.pool.acquire().await?;
    let link = policy::add_favorite(&mut conn, &name, &user).await?;

    tracing::info!("User {} favorited table {}", user.user_id, name);
    Ok((StatusCode::CREATED, Json(link)))
}

/// DELETE /api/tables/:name/favorite
pub async fn remove_favorite(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(name): Path<String>,
) -> Result<Json<FavoriteRemoved>> {
    let mut conn = state.pool.acquire().await?;
    policy::remove_favorite(&mut conn, &name, &user).await?;

    Ok(Json(FavoriteRemoved { success: true }))
}

/// GET /api/favorites
pub async fn list_favorites(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<FavoritesParams>,
) -> Result<Json<Vec<TableSummary>>> {
    let (page, page_size) = page_bounds(params.page, params.page_size, MAX_PAGE_SIZE);
    let filter = catalog::TableListFilter {
        favorites: true,
        limit: page_size,
        offset: browse::page_offset(page, page_size),
        ..Default::default()
    };

    let mut conn = state.pool.acquire().await?;
    let tables = catalog::list_tables(&mut conn, Some(user.user_id), &filter).await?;

    Ok(Json(tables))
}
