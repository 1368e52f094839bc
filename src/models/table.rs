use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::constants::PUBLIC_STATUS;

/// Catalog entry for one dynamic table (not the physical table itself)
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TableDefinition {
    pub id: i32,
    pub table_name: String,
    pub table_status: String,
    pub table_description: Option<String>,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Anything other than `public` is treated as private
pub fn is_public_status(status: &str) -> bool {
    status.eq_ignore_ascii_case(PUBLIC_STATUS)
}

/// Ownership link between a user and the table they created
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserTableLink {
    pub id: i32,
    pub user_id: i32,
    pub table_id: i32,
    pub created_at: DateTime<Utc>,
}

/// Bookmark of a table by a user
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct FavoriteLink {
    pub id: i32,
    pub user_id: i32,
    pub table_id: i32,
    pub created_at: DateTime<Utc>,
}

/// The slice of catalog state the access policy needs
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TableAccess {
    pub table_id: i32,
    pub table_name: String,
    pub table_status: String,
    pub owner_id: Option<i32>,
}

/// Listing row, annotated for the requesting user
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TableSummary {
    pub id: i32,
    pub table_name: String,
    pub table_status: String,
    pub table_description: Option<String>,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_owner: bool,
    pub is_favorite: bool,
}
