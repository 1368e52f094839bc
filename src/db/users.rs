use sqlx::PgConnection;

use crate::models::User;

const USER_COLUMNS: &str = "id, username, email, password_hash, profile_image_url, created_at";

pub async fn insert_user(
    conn: &mut PgConnection,
    username: &str,
    email: &str,
    password_hash: &str,
) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        "INSERT INTO users (username, email, password_hash) VALUES ($1, $2, $3) RETURNING {}",
        USER_COLUMNS
    ))
    .bind(username)
    .bind(email)
    .bind(password_hash)
    .fetch_one(&mut *conn)
    .await
}

pub async fn find_by_email(conn: &mut PgConnection, email: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE LOWER(email) = LOWER($1)",
        USER_COLUMNS
    ))
    .bind(email)
    .fetch_optional(&mut *conn)
    .await
}

pub async fn find_by_id(conn: &mut PgConnection, user_id: i32) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
}

pub async fn username_or_email_taken(
    conn: &mut PgConnection,
    username: &str,
    email: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM users WHERE username = $1 OR LOWER(email) = LOWER($2))",
    )
    .bind(username)
    .bind(email)
    .fetch_one(&mut *conn)
    .await
}

/// Drop any live refresh token for the user, then store the new one
///
/// Run inside a transaction: a user never holds two refresh tokens.
pub async fn replace_refresh_token(
    conn: &mut PgConnection,
    user_id: i32,
    token: &str,
) -> Result<(), sqlx::Error> {
    delete_refresh_token(&mut *conn, user_id).await?;
    sqlx::query("INSERT INTO refresh_tokens (user_id, token) VALUES ($1, $2)")
        .bind(user_id)
        .bind(token)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Owner of a stored refresh token, if it is still the live one
pub async fn find_refresh_token_owner(
    conn: &mut PgConnection,
    token: &str,
) -> Result<Option<i32>, sqlx::Error> {
    sqlx::query_scalar("SELECT user_id FROM refresh_tokens WHERE token = $1")
        .bind(token)
        .fetch_optional(&mut *conn)
        .await
}

pub async fn delete_refresh_token(conn: &mut PgConnection, user_id: i32) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}
