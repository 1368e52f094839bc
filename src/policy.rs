//! Ownership and visibility rules for dynamic tables.
//!
//! Public tables are readable by anyone; everything else is visible only to
//! the owner. Non-owners never learn whether a private table exists: reads
//! answer "not found", writes answer "forbidden" for missing tables too.

use sqlx::PgConnection;

use crate::constants::{ERR_NOT_TABLE_OWNER, ERR_TABLE_NOT_FOUND};
use crate::db::catalog;
use crate::error::{has_sqlstate, AppError, Result, UNIQUE_VIOLATION};
use crate::gateway::TableRef;
use crate::models::{is_public_status, FavoriteLink, Identity, TableAccess};

pub fn is_owner(access: &TableAccess, user: Option<&Identity>) -> bool {
    match (access.owner_id, user) {
        (Some(owner), Some(user)) => owner == user.user_id,
        _ => false,
    }
}

pub fn can_read(access: &TableAccess, user: Option<&Identity>) -> bool {
    is_public_status(&access.table_status) || is_owner(access, user)
}

/// Access data for a table the caller may read
pub async fn require_readable(
    conn: &mut PgConnection,
    table_name: &str,
    user: Option<&Identity>,
) -> Result<TableAccess> {
    match catalog::find_access(conn, table_name, false).await? {
        Some(access) if can_read(&access, user) => Ok(access),
        _ => Err(AppError::NotFound(ERR_TABLE_NOT_FOUND.to_string())),
    }
}

/// Access data for a table the caller owns; `lock` holds the catalog row
/// until the surrounding transaction ends
pub async fn require_owner(
    conn: &mut PgConnection,
    table_name: &str,
    user: &Identity,
    lock: bool,
) -> Result<TableAccess> {
    match catalog::find_access(conn, table_name, lock).await? {
        Some(access) if is_owner(&access, Some(user)) => Ok(access),
        _ => {
            tracing::warn!(
                "User {} denied write access to table {}",
                user.user_id,
                table_name
            );
            Err(AppError::Forbidden(ERR_NOT_TABLE_OWNER.to_string()))
        }
    }
}

/// Every registered relation among `relations` must be readable.
/// Unregistered names (CTEs, aliases, table functions) are left to the engine.
pub async fn ensure_relations_readable<'a, I>(
    conn: &mut PgConnection,
    relations: I,
    user: Option<&Identity>,
) -> Result<()>
where
    I: IntoIterator<Item = &'a TableRef>,
{
    let names: Vec<String> = relations.into_iter().map(|r| r.name.clone()).collect();
    let registered = catalog::find_access_many(conn, &names).await?;

    if let Some(hidden) = registered.iter().find(|access| !can_read(access, user)) {
        tracing::warn!("Query referenced unreadable table {}", hidden.table_name);
        return Err(AppError::NotFound(ERR_TABLE_NOT_FOUND.to_string()));
    }
    Ok(())
}

/// Bookmark a visible table; a second bookmark is a conflict
pub async fn add_favorite(
    conn: &mut PgConnection,
    table_name: &str,
    user: &Identity,
) -> Result<FavoriteLink> {
    let access = require_readable(conn, table_name, Some(user)).await?;

    if catalog::favorite_exists(conn, user.user_id, access.table_id).await? {
        return Err(AppError::Conflict(format!(
            "Table '{}' is already in favorites",
            table_name
        )));
    }

    catalog::add_favorite(conn, user.user_id, access.table_id)
        .await
        .map_err(|e| {
            if has_sqlstate(&e, UNIQUE_VIOLATION) {
                AppError::Conflict(format!("Table '{}' is already in favorites", table_name))
            } else {
                AppError::Database(e)
            }
        })
}

pub async fn remove_favorite(
    conn: &mut PgConnection,
    table_name: &str,
    user: &Identity,
) -> Result<()> {
    let access = require_readable(conn, table_name, Some(user)).await?;

    let removed = catalog::remove_favorite(conn, user.user_id, access.table_id).await?;
    if removed == 0 {
        return Err(AppError::NotFound(format!(
            "Table '{}' is not in favorites",
            table_name
        )));
    }
    Ok(())
}
