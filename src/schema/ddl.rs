use crate::models::ColumnSpec;
use crate::schema::validator::{Ident, InvalidNameError};

/// `CREATE TABLE` for a dynamic table; `id` is always the first column
///
/// Callers run the existence check first, `IF NOT EXISTS` is only a backstop.
pub fn build_create_table(
    table: &Ident,
    columns: &[ColumnSpec],
) -> Result<String, InvalidNameError> {
    let mut defs = vec![format!("{} SERIAL PRIMARY KEY", Ident::id())];
    for column in columns {
        let name = Ident::column(&column.name)?;
        defs.push(format!("{} {}", name, column.column_type.sql_type()));
    }

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        table,
        defs.join(", ")
    ))
}

pub fn build_drop_table(table: &Ident) -> String {
    format!("DROP TABLE IF EXISTS {} CASCADE", table)
}

/// `INSERT INTO "t" ("a", "b") ` prefix for batched value lists
pub fn build_insert_prefix(
    table: &Ident,
    columns: &[ColumnSpec],
) -> Result<String, InvalidNameError> {
    let names = columns
        .iter()
        .map(|c| Ident::column(&c.name).map(|ident| ident.to_string()))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(format!("INSERT INTO {} ({}) ", table, names.join(", ")))
}
