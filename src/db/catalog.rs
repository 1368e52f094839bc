//! Table Definition Registry: catalog rows, ownership and favorites.

use sqlx::{PgConnection, Postgres, QueryBuilder};

use crate::constants::PUBLIC_STATUS;
use crate::models::{FavoriteLink, TableAccess, TableDefinition, TableSummary, UserTableLink};

/// Fields for a new registry row
#[derive(Debug, Clone)]
pub struct NewDefinition<'a> {
    pub table_name: &'a str,
    pub table_status: &'a str,
    pub table_description: Option<&'a str>,
    pub category: Option<&'a str>,
}

pub async fn insert_definition(
    conn: &mut PgConnection,
    new: &NewDefinition<'_>,
) -> Result<TableDefinition, sqlx::Error> {
    sqlx::query_as::<_, TableDefinition>(
        "INSERT INTO table_definitions (table_name, table_status, table_description, category) \
         VALUES ($1, $2, $3, $4) \
         RETURNING id, table_name, table_status, table_description, category, created_at",
    )
    .bind(new.table_name)
    .bind(new.table_status)
    .bind(new.table_description)
    .bind(new.category)
    .fetch_one(&mut *conn)
    .await
}

pub async fn definition_exists(
    conn: &mut PgConnection,
    table_name: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM table_definitions WHERE table_name = $1)")
        .bind(table_name)
        .fetch_one(&mut *conn)
        .await
}

pub async fn find_definition(
    conn: &mut PgConnection,
    table_name: &str,
) -> Result<Option<TableDefinition>, sqlx::Error> {
    sqlx::query_as::<_, TableDefinition>(
        "SELECT id, table_name, table_status, table_description, category, created_at \
         FROM table_definitions WHERE table_name = $1",
    )
    .bind(table_name)
    .fetch_optional(&mut *conn)
    .await
}

pub async fn delete_definition(conn: &mut PgConnection, table_id: i32) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM table_definitions WHERE id = $1")
        .bind(table_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn insert_owner_link(
    conn: &mut PgConnection,
    user_id: i32,
    table_id: i32,
) -> Result<UserTableLink, sqlx::Error> {
    sqlx::query_as::<_, UserTableLink>(
        "INSERT INTO user_tables (user_id, table_id) VALUES ($1, $2) \
         RETURNING id, user_id, table_id, created_at",
    )
    .bind(user_id)
    .bind(table_id)
    .fetch_one(&mut *conn)
    .await
}

pub async fn delete_owner_links(conn: &mut PgConnection, table_id: i32) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM user_tables WHERE table_id = $1")
        .bind(table_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn delete_favorite_links(
    conn: &mut PgConnection,
    table_id: i32,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM favorite_tables WHERE table_id = $1")
        .bind(table_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

const ACCESS_SELECT: &str = "SELECT d.id AS table_id, d.table_name, d.table_status, \
     u.user_id AS owner_id \
     FROM table_definitions d LEFT JOIN user_tables u ON u.table_id = d.id";

/// Access data for one table; `lock` holds the definition row until commit
pub async fn find_access(
    conn: &mut PgConnection,
    table_name: &str,
    lock: bool,
) -> Result<Option<TableAccess>, sqlx::Error> {
    let sql = if lock {
        format!("{} WHERE d.table_name = $1 FOR UPDATE OF d", ACCESS_SELECT)
    } else {
        format!("{} WHERE d.table_name = $1", ACCESS_SELECT)
    };

    sqlx::query_as::<_, TableAccess>(&sql)
        .bind(table_name)
        .fetch_optional(&mut *conn)
        .await
}

/// Access data for every registered table among `names`
pub async fn find_access_many(
    conn: &mut PgConnection,
    names: &[String],
) -> Result<Vec<TableAccess>, sqlx::Error> {
    if names.is_empty() {
        return Ok(Vec::new());
    }

    sqlx::query_as::<_, TableAccess>(&format!("{} WHERE d.table_name = ANY($1)", ACCESS_SELECT))
        .bind(names)
        .fetch_all(&mut *conn)
        .await
}

/// Search options for the table listing
#[derive(Debug, Clone, Default)]
pub struct TableListFilter {
    pub search: Option<String>,
    pub category: Option<String>,
    pub mine: bool,
    pub favorites: bool,
    pub limit: i64,
    pub offset: i64,
}

/// Tables visible to `user_id`: public ones plus the caller's own
pub async fn list_tables(
    conn: &mut PgConnection,
    user_id: Option<i32>,
    filter: &TableListFilter,
) -> Result<Vec<TableSummary>, sqlx::Error> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT d.id, d.table_name, d.table_status, d.table_description, d.category, \
         d.created_at, COALESCE(u.user_id = ",
    );
    qb.push_bind(user_id);
    qb.push(", FALSE) AS is_owner, EXISTS (SELECT 1 FROM favorite_tables f WHERE f.table_id = d.id AND f.user_id = ");
    qb.push_bind(user_id);
    qb.push(") AS is_favorite FROM table_definitions d LEFT JOIN user_tables u ON u.table_id = d.id WHERE (LOWER(d.table_status) = ");
    qb.push_bind(PUBLIC_STATUS);
    qb.push(" OR u.user_id = ");
    qb.push_bind(user_id);
    qb.push(")");

    if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = format!("%{}%", escape_like(search.trim()));
        qb.push(" AND (d.table_name ILIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR d.table_description ILIKE ");
        qb.push_bind(pattern);
        qb.push(")");
    }

    if let Some(category) = filter.category.as_deref().filter(|c| !c.trim().is_empty()) {
        qb.push(" AND d.category = ");
        qb.push_bind(category.trim().to_string());
    }

    if filter.mine {
        qb.push(" AND u.user_id = ");
        qb.push_bind(user_id);
    }

    if filter.favorites {
        qb.push(" AND EXISTS (SELECT 1 FROM favorite_tables f2 WHERE f2.table_id = d.id AND f2.user_id = ");
        qb.push_bind(user_id);
        qb.push(")");
    }

    qb.push(" ORDER BY d.created_at DESC, d.id DESC LIMIT ");
    qb.push_bind(filter.limit);
    qb.push(" OFFSET ");
    qb.push_bind(filter.offset);

    qb.build_query_as::<TableSummary>()
        .fetch_all(&mut *conn)
        .await
}

/// Escape `%`, `_` and `\` so user text matches literally inside ILIKE
pub fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub async fn add_favorite(
    conn: &mut PgConnection,
    user_id: i32,
    table_id: i32,
) -> Result<FavoriteLink, sqlx::Error> {
    sqlx::query_as::<_, FavoriteLink>(
        "INSERT INTO favorite_tables (user_id, table_id) VALUES ($1, $2) \
         RETURNING id, user_id, table_id, created_at",
    )
    .bind(user_id)
    .bind(table_id)
    .fetch_one(&mut *conn)
    .await
}

pub async fn favorite_exists(
    conn: &mut PgConnection,
    user_id: i32,
    table_id: i32,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM favorite_tables WHERE user_id = $1 AND table_id = $2)",
    )
    .bind(user_id)
    .bind(table_id)
    .fetch_one(&mut *conn)
    .await
}

pub async fn remove_favorite(
    conn: &mut PgConnection,
    user_id: i32,
    table_id: i32,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM favorite_tables WHERE user_id = $1 AND table_id = $2")
        .bind(user_id)
        .bind(table_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }
}
