//! Bearer credential extractors.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::constants::{ERR_INVALID_TOKEN, ERR_LOGIN_REQUIRED};
use crate::error::AppError;
use crate::models::Identity;
use crate::security::{verify_token, TokenKind};
use crate::AppState;

/// A caller with a valid access token
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Identity);

/// A caller with a valid access token, or nobody at all.
/// A token that is present but invalid is still rejected.
#[derive(Debug, Clone)]
pub struct OptionalUser(pub Option<Identity>);

fn bearer_token(parts: &Parts) -> Result<Option<&str>, AppError> {
    let Some(value) = parts.headers.get(AUTHORIZATION) else {
        return Ok(None);
    };

    let token = value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthenticated(ERR_LOGIN_REQUIRED.to_string()))?;

    Ok(Some(token))
}

fn identity_from(token: &str, state: &AppState) -> Result<Identity, AppError> {
    verify_token(token, &state.config.token_secret, TokenKind::Access)
        .map(|claims| claims.identity())
        .map_err(|err| {
            tracing::warn!("Rejected access token: {:?}", err);
            AppError::Unauthenticated(ERR_INVALID_TOKEN.to_string())
        })
}

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        match bearer_token(parts)? {
            Some(token) => Ok(CurrentUser(identity_from(token, state)?)),
            None => Err(AppError::Unauthenticated(ERR_LOGIN_REQUIRED.to_string())),
        }
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for OptionalUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        match bearer_token(parts)? {
            Some(token) => Ok(OptionalUser(Some(identity_from(token, state)?))),
            None => Ok(OptionalUser(None)),
        }
    }
}
