//! Queries against the engine's own catalog.

use sqlx::PgConnection;

use crate::models::ColumnInfo;
use crate::schema::Ident;

/// Whether the current schema already holds a relation with this name
pub async fn table_exists(conn: &mut PgConnection, table_name: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
         WHERE table_schema = current_schema() AND table_name = $1)",
    )
    .bind(table_name)
    .fetch_one(&mut *conn)
    .await
}

/// Columns of a table in the current schema, in physical order
pub async fn list_columns(
    conn: &mut PgConnection,
    table_name: &str,
) -> Result<Vec<ColumnInfo>, sqlx::Error> {
    sqlx::query_as::<_, ColumnInfo>(
        "SELECT column_name::text AS column_name, data_type::text AS data_type \
         FROM information_schema.columns \
         WHERE table_schema = current_schema() AND table_name = $1 \
         ORDER BY ordinal_position",
    )
    .bind(table_name)
    .fetch_all(&mut *conn)
    .await
}

pub async fn row_count(conn: &mut PgConnection, table: &Ident) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(&mut *conn)
        .await
}

/// Bytes on disk including indexes and TOAST
pub async fn storage_size(conn: &mut PgConnection, table: &Ident) -> Result<i64, sqlx::Error> {
    let size: Option<i64> =
        sqlx::query_scalar("SELECT pg_total_relation_size(to_regclass($1))")
            .bind(table.to_string())
            .fetch_one(&mut *conn)
            .await?;
    Ok(size.unwrap_or(0))
}

/// Serialize concurrent creations of the same name until the transaction ends
pub async fn lock_table_name(conn: &mut PgConnection, table_name: &str) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(table_name)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
