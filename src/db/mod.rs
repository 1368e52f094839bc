pub mod catalog;
pub mod introspect;
pub mod pool;
pub mod users;

pub use pool::{create_pool, run_migrations};
