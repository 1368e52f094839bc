//! Tablesmith Server Library
//!
//! User-owned Postgres tables created from declared columns or uploaded
//! spreadsheets, plus a guarded SQL gateway over them.

pub mod auth;
pub mod browse;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod models;
pub mod policy;
pub mod routes;
pub mod schema;
pub mod security;
pub mod tabular;

pub use config::Config;
pub use error::{AppError, Result};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use gateway::QueryGateway;
use lifecycle::{LoadOptions, TableLifecycle};

/// Multipart framing on top of the file itself
const UPLOAD_OVERHEAD_BYTES: usize = 64 * 1024;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
}

impl AppState {
    /// Create a new AppState with the given pool and configuration
    pub fn new(pool: PgPool, config: Config) -> Self {
        Self { pool, config }
    }

    pub fn lifecycle(&self) -> TableLifecycle {
        TableLifecycle::new(self.pool.clone(), LoadOptions::from_config(&self.config))
    }

    pub fn gateway(&self) -> QueryGateway {
        QueryGateway::new(self.pool.clone(), &self.config)
    }
}

/// Build the application router without CORS, which `main` adds from config
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes + UPLOAD_OVERHEAD_BYTES;

    Router::new()
        .route("/health", get(routes::health_check))
        .route("/api/auth/register", post(routes::register))
        .route("/api/auth/login", post(routes::login))
        .route("/api/auth/refresh", post(routes::refresh))
        .route("/api/auth/logout", post(routes::logout))
        .route("/api/auth/me", get(routes::me))
        .route(
            "/api/tables",
            post(routes::create_table).get(routes::list_tables),
        )
        .route("/api/tables/upload", post(routes::upload_table))
        .route(
            "/api/tables/:name",
            get(routes::table_details).delete(routes::delete_table),
        )
        .route("/api/tables/:name/rows", post(routes::fetch_table_rows))
        .route(
            "/api/tables/:name/favorite",
            post(routes::add_favorite).delete(routes::remove_favorite),
        )
        .route("/api/favorites", get(routes::list_favorites))
        .route("/api/query", post(routes::execute_query))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
