pub mod column;
pub mod table;
pub mod user;

pub use column::{ColumnInfo, ColumnSpec, DeclaredColumn, SemanticType};
pub use table::{
    is_public_status, FavoriteLink, TableAccess, TableDefinition, TableSummary, UserTableLink,
};
pub use user::{Identity, User};
