pub mod auth;
pub mod favorites;
pub mod health;
pub mod query;
pub mod tables;

pub use auth::{login, logout, me, refresh, register};
pub use favorites::{add_favorite, list_favorites, remove_favorite};
pub use health::health_check;
pub use query::execute_query;
pub use tables::{
    create_table, delete_table, fetch_table_rows, list_tables, table_details, upload_table,
};
