use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::auth::CurrentUser;
use crate::constants::{ERR_INVALID_CREDENTIALS, ERR_INVALID_TOKEN, MIN_PASSWORD_LENGTH};
use crate::db::users;
use crate::error::{has_sqlstate, AppError, Result, UNIQUE_VIOLATION};
use crate::models::{Identity, User};
use crate::security::{hash_password, issue_token, verify_password, verify_token, TokenKind};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
}

/// Register a new account
///
/// Returns 409 Conflict when the username or email is already taken.
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<User>)> {
    let username = payload.username.trim();
    let email = payload.email.trim();

    if !User::validate_username(username) {
        return Err(AppError::InvalidInput(
            "Username must be 3-64 letters, digits, '_', '.' or '-'".to_string(),
        ));
    }
    if !User::validate_email(email) {
        return Err(AppError::InvalidInput("Invalid email address".to_string()));
    }
    if payload.password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AppError::InvalidInput(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    let password_hash = hash_password(
        &payload.password,
        &state.config.password_pepper,
        state.config.bcrypt_cost,
    )
    .await?;

    let mut conn = state.pool.acquire().await?;
    if users::username_or_email_taken(&mut conn, username, email).await? {
        return Err(AppError::Conflict(
            "Username or email is already registered".to_string(),
        ));
    }

    let user = users::insert_user(&mut conn, username, email, &password_hash)
        .await
        .map_err(|e| {
            if has_sqlstate(&e, UNIQUE_VIOLATION) {
                AppError::Conflict("Username or email is already registered".to_string())
            } else {
                AppError::Database(e)
            }
        })?;

    tracing::info!("New user registered: {}", user.id);

    Ok((StatusCode::CREATED, Json(user)))
}

/// Issue an access/refresh pair and store the refresh token as the user's only one
async fn start_session(state: &AppState, identity: &Identity) -> Result<TokenPair> {
    let config = &state.config;
    let access_token = issue_token(
        identity,
        TokenKind::Access,
        config.access_token_ttl_secs,
        &config.token_secret,
    );
    let refresh_token = issue_token(
        identity,
        TokenKind::Refresh,
        config.refresh_token_ttl_secs,
        &config.refresh_token_secret,
    );
    let (Some(access_token), Some(refresh_token)) = (access_token, refresh_token) else {
        return Err(AppError::Unexpected("Failed to sign token".to_string()));
    };

    let mut tx = state.pool.begin().await?;
    users::replace_refresh_token(&mut tx, identity.user_id, &refresh_token).await?;
    tx.commit().await?;

    Ok(TokenPair {
        access_token,
        refresh_token,
        token_type: "bearer",
        expires_in: config.access_token_ttl_secs,
    })
}

/// Exchange email and password for tokens
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<TokenPair>> {
    let mut conn = state.pool.acquire().await?;
    let user = users::find_by_email(&mut conn, payload.email.trim()).await?;
    drop(conn);

    let verified = match &user {
        Some(user) => {
            verify_password(
                &payload.password,
                &user.password_hash,
                &state.config.password_pepper,
            )
            .await
        }
        None => false,
    };

    let user = match user {
        Some(user) if verified => user,
        _ => {
            tracing::warn!("Failed login attempt");
            return Err(AppError::Unauthenticated(
                ERR_INVALID_CREDENTIALS.to_string(),
            ));
        }
    };

    let tokens = start_session(&state, &user.identity()).await?;
    tracing::info!("User {} logged in", user.id);

    Ok(Json(tokens))
}

/// Rotate a refresh token: the presented one stops working
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<TokenPair>> {
    let invalid = || AppError::Unauthenticated(ERR_INVALID_TOKEN.to_string());

    let claims = verify_token(
        &payload.refresh_token,
        &state.config.refresh_token_secret,
        TokenKind::Refresh,
    )
    .map_err(|err| {
        tracing::warn!("Rejected refresh token: {:?}", err);
        invalid()
    })?;

    let mut conn = state.pool.acquire().await?;
    let owner = users::find_refresh_token_owner(&mut conn, &payload.refresh_token).await?;
    if owner != Some(claims.sub) {
        tracing::warn!("Refresh token for user {} is no longer active", claims.sub);
        return Err(invalid());
    }

    let user = users::find_by_id(&mut conn, claims.sub)
        .await?
        .ok_or_else(invalid)?;
    drop(conn);

    let tokens = start_session(&state, &user.identity()).await?;
    Ok(Json(tokens))
}

pub async fn logout(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<LogoutResponse>> {
    let mut conn = state.pool.acquire().await?;
    users::delete_refresh_token(&mut conn, user.user_id).await?;
    tracing::info!("User {} logged out", user.user_id);

    Ok(Json(LogoutResponse { success: true }))
}

pub async fn me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<User>> {
    let mut conn = state.pool.acquire().await?;
    users::find_by_id(&mut conn, user.user_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}
