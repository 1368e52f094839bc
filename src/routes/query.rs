use axum::{extract::State, Json};
use serde::Deserialize;

use crate::auth::OptionalUser;
use crate::error::Result;
use crate::gateway::QueryOutcome;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub sql: String,
}

/// Run one SQL statement through the gateway
///
/// POST /api/query
///
/// SELECT works for anonymous callers on public tables. INSERT, UPDATE,
/// DELETE and CREATE TABLE need a logged-in user; writes also need ownership
/// of the target table.
pub async fn execute_query(
    State(state): State<AppState>,
    OptionalUser(user): OptionalUser,
    Json(payload): Json<QueryRequest>,
) -> Result<Json<QueryOutcome>> {
    let outcome = state.gateway().execute(&payload.sql, user.as_ref()).await?;
    Ok(Json(outcome))
}
