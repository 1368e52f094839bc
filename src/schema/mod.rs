//! Name validation, schema inference and DDL synthesis for dynamic tables.

pub mod ddl;
pub mod inference;
pub mod validator;

pub use ddl::{build_create_table, build_drop_table, build_insert_prefix};
pub use inference::{
    columns_from_declared, columns_from_tabular, infer_column_type, physical_headers,
    sanitize_header,
};
pub use validator::{
    normalize_table_name, validate_column_name, validate_column_names, validate_identifier,
    Ident, InvalidNameError, NameRejection,
};
