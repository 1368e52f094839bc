//! Dynamic Table Lifecycle Engine: creation and deletion of user tables.
//!
//! Creation runs inside a single transaction covering the registry row, the
//! physical table, the loaded rows and the ownership link. Any failure rolls
//! the whole transaction back, so the registry never holds a definition
//! without its table (or the other way round).

use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::{Connection, PgConnection, PgPool, Postgres, QueryBuilder, Transaction};

use crate::config::{Config, LoadPolicy};
use crate::constants::{MAX_BIND_PARAMS, PUBLIC_STATUS};
use crate::db::{catalog, introspect};
use crate::error::{has_sqlstate, AppError, Result, DUPLICATE_TABLE, UNIQUE_VIOLATION};
use crate::models::{
    ColumnInfo, ColumnSpec, DeclaredColumn, Identity, SemanticType, TableDefinition,
};
use crate::policy;
use crate::schema::{
    build_create_table, build_drop_table, build_insert_prefix, columns_from_declared,
    columns_from_tabular, inference::parse_date_text, normalize_table_name, Ident,
};
use crate::tabular::{CellValue, TabularData};

/// Where the columns of a new table come from
#[derive(Debug, Clone)]
pub enum ColumnSource {
    /// Ordered `{name, type}` pairs from the create-table form
    Declared(Vec<DeclaredColumn>),
    /// Parsed upload; columns are inferred and the rows loaded
    File(TabularData),
    /// A `CREATE TABLE` statement from the query gateway, run as written
    RawDdl(String),
}

#[derive(Debug, Clone)]
pub struct CreateTableRequest {
    pub table_name: String,
    pub table_status: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub source: ColumnSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedTable {
    pub table: TableDefinition,
    pub headers: Vec<String>,
    pub columns: Vec<ColumnInfo>,
    pub rows_loaded: u64,
    pub rows_skipped: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletedTable {
    pub table_name: String,
    pub favorites_removed: u64,
}

/// Progress of a creation, reported when it fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationStage {
    Validating,
    CheckingExistence,
    DefinitionInserted,
    PhysicalTableCreated,
    DataLoaded,
    OwnershipLinked,
    Committed,
}

impl fmt::Display for CreationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CreationStage::Validating => "validating",
            CreationStage::CheckingExistence => "checking_existence",
            CreationStage::DefinitionInserted => "definition_inserted",
            CreationStage::PhysicalTableCreated => "physical_table_created",
            CreationStage::DataLoaded => "data_loaded",
            CreationStage::OwnershipLinked => "ownership_linked",
            CreationStage::Committed => "committed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    pub policy: LoadPolicy,
    pub batch_size: usize,
}

impl LoadOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            policy: config.load_policy,
            batch_size: config.insert_batch_size,
        }
    }

    /// Rows per INSERT, kept under the engine's bind parameter cap
    pub fn rows_per_batch(&self, column_count: usize) -> usize {
        let by_params = MAX_BIND_PARAMS / column_count.max(1);
        self.batch_size.min(by_params).max(1)
    }
}

/// Everything decided before the first side effect
struct CreationPlan<'a> {
    table: Ident,
    status: String,
    columns: Vec<ColumnSpec>,
    ddl: String,
    rows: Option<&'a TabularData>,
    raw_ddl: bool,
}

fn plan_creation(request: &CreateTableRequest) -> Result<CreationPlan<'_>> {
    let status = request
        .table_status
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(PUBLIC_STATUS)
        .to_lowercase();

    match &request.source {
        ColumnSource::Declared(declared) => {
            let table = Ident::table(&normalize_table_name(&request.table_name))?;
            let columns = columns_from_declared(declared)?;
            let ddl = build_create_table(&table, &columns)?;
            Ok(CreationPlan {
                table,
                status,
                columns,
                ddl,
                rows: None,
                raw_ddl: false,
            })
        }
        ColumnSource::File(data) => {
            let table = Ident::table(&normalize_table_name(&request.table_name))?;
            let columns = columns_from_tabular(data)?;
            let ddl = build_create_table(&table, &columns)?;
            Ok(CreationPlan {
                table,
                status,
                columns,
                ddl,
                rows: Some(data),
                raw_ddl: false,
            })
        }
        ColumnSource::RawDdl(sql) => Ok(CreationPlan {
            table: Ident::table(&request.table_name)?,
            status,
            columns: Vec::new(),
            ddl: sql.clone(),
            rows: None,
            raw_ddl: true,
        }),
    }
}

/// Runs table creation and deletion against the pool
#[derive(Clone)]
pub struct TableLifecycle {
    pool: PgPool,
    load: LoadOptions,
}

impl TableLifecycle {
    pub fn new(pool: PgPool, load: LoadOptions) -> Self {
        Self { pool, load }
    }

    /// Create a dynamic table owned by `owner`
    pub async fn create(
        &self,
        request: &CreateTableRequest,
        owner: &Identity,
    ) -> Result<CreatedTable> {
        let plan = plan_creation(request)?;
        let table_name = plan.table.as_str().to_string();

        let mut tx = self.pool.begin().await?;
        let mut stage = CreationStage::Validating;

        let outcome = self
            .run_creation(&mut tx, request, &plan, owner, &mut stage)
            .await;

        let created = match outcome {
            Ok(created) => created,
            Err(err) => {
                tracing::warn!(
                    "Creation of table {} failed after stage {}: {}",
                    table_name,
                    stage,
                    err
                );
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!("Rollback for table {} failed: {}", table_name, rollback_err);
                }
                return Err(err);
            }
        };

        tx.commit()
            .await
            .map_err(|e| map_conflict(e, &table_name, "COMMIT"))?;
        stage = CreationStage::Committed;

        tracing::info!(
            "Table {} {} by user {} ({} rows loaded, {} skipped)",
            table_name,
            stage,
            owner.user_id,
            created.rows_loaded,
            created.rows_skipped
        );

        Ok(created)
    }

    async fn run_creation(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        request: &CreateTableRequest,
        plan: &CreationPlan<'_>,
        owner: &Identity,
        stage: &mut CreationStage,
    ) -> Result<CreatedTable> {
        let name = plan.table.as_str();

        *stage = CreationStage::CheckingExistence;
        introspect::lock_table_name(&mut **tx, name)
            .await
            .map_err(step_error("lock table name"))?;
        let physical = introspect::table_exists(&mut **tx, name)
            .await
            .map_err(step_error("look up physical table"))?;
        let registered = catalog::definition_exists(&mut **tx, name)
            .await
            .map_err(step_error("look up table definition"))?;
        if physical || registered {
            return Err(AppError::TableAlreadyExists(name.to_string()));
        }

        let definition = catalog::insert_definition(
            &mut **tx,
            &catalog::NewDefinition {
                table_name: name,
                table_status: &plan.status,
                table_description: request.description.as_deref(),
                category: request.category.as_deref(),
            },
        )
        .await
        .map_err(|e| map_conflict(e, name, "insert table definition"))?;
        *stage = CreationStage::DefinitionInserted;

        sqlx::query(&plan.ddl)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                if has_sqlstate(&e, DUPLICATE_TABLE) {
                    AppError::TableAlreadyExists(name.to_string())
                } else {
                    AppError::engine(e, &plan.ddl)
                }
            })?;
        let created = introspect::table_exists(&mut **tx, name)
            .await
            .map_err(step_error("look up physical table"))?;
        if plan.raw_ddl && !created {
            return Err(AppError::InvalidQuery(format!(
                "Statement did not create table '{}'",
                name
            )));
        }
        *stage = CreationStage::PhysicalTableCreated;

        let (rows_loaded, rows_skipped) = match plan.rows {
            Some(data) if !data.rows.is_empty() => {
                self.load_rows(&mut **tx, &plan.table, &plan.columns, data)
                    .await?
            }
            _ => (0, 0),
        };
        *stage = CreationStage::DataLoaded;

        catalog::insert_owner_link(&mut **tx, owner.user_id, definition.id)
            .await
            .map_err(step_error("insert owner link"))?;
        *stage = CreationStage::OwnershipLinked;

        let columns = introspect::list_columns(&mut **tx, name)
            .await
            .map_err(step_error("list columns"))?;
        let headers = columns.iter().map(|c| c.name.clone()).collect();

        Ok(CreatedTable {
            table: definition,
            headers,
            columns,
            rows_loaded,
            rows_skipped,
        })
    }

    async fn load_rows(
        &self,
        conn: &mut PgConnection,
        table: &Ident,
        columns: &[ColumnSpec],
        data: &TabularData,
    ) -> Result<(u64, u64)> {
        let prefix = build_insert_prefix(table, columns)?;
        let error_sql = format!("{}VALUES (...)", prefix);

        match self.load.policy {
            LoadPolicy::Atomic => {
                let per_batch = self.load.rows_per_batch(columns.len());
                let mut loaded = 0u64;

                for (batch_index, chunk) in data.rows.chunks(per_batch).enumerate() {
                    let bound = chunk
                        .iter()
                        .enumerate()
                        .map(|(i, row)| {
                            coerce_row(row, columns).map_err(|msg| {
                                AppError::InvalidFile(format!(
                                    "Row {}: {}",
                                    batch_index * per_batch + i + 1,
                                    msg
                                ))
                            })
                        })
                        .collect::<Result<Vec<_>>>()?;

                    let result = insert_batch(&mut *conn, &prefix, bound).await;
                    loaded += result.map_err(|e| AppError::engine(e, &error_sql))?;
                }

                Ok((loaded, 0))
            }
            LoadPolicy::Lenient => {
                let mut loaded = 0u64;
                let mut skipped = 0u64;

                for (index, row) in data.rows.iter().enumerate() {
                    let bound = match coerce_row(row, columns) {
                        Ok(bound) => bound,
                        Err(msg) => {
                            tracing::warn!("Skipping row {} of {}: {}", index + 1, table, msg);
                            skipped += 1;
                            continue;
                        }
                    };

                    let mut savepoint = conn.begin().await?;
                    match insert_batch(&mut *savepoint, &prefix, vec![bound]).await {
                        Ok(count) => {
                            savepoint.commit().await?;
                            loaded += count;
                        }
                        Err(e) => {
                            savepoint.rollback().await?;
                            tracing::warn!("Skipping row {} of {}: {}", index + 1, table, e);
                            skipped += 1;
                        }
                    }
                }

                Ok((loaded, skipped))
            }
        }
    }

    /// Drop a table and everything the registry knows about it, atomically
    pub async fn delete(&self, table_name: &str, owner: &Identity) -> Result<DeletedTable> {
        let mut tx = self.pool.begin().await?;

        let access = policy::require_owner(&mut tx, table_name, owner, true).await?;
        let table = Ident::table(&access.table_name)?;

        let drop_sql = build_drop_table(&table);
        sqlx::query(&drop_sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::engine(e, &drop_sql))?;

        catalog::delete_owner_links(&mut tx, access.table_id)
            .await
            .map_err(step_error("delete owner links"))?;
        catalog::delete_definition(&mut tx, access.table_id)
            .await
            .map_err(step_error("delete table definition"))?;
        let favorites_removed = catalog::delete_favorite_links(&mut tx, access.table_id)
            .await
            .map_err(step_error("delete favorite links"))?;

        tx.commit().await.map_err(step_error("COMMIT"))?;

        tracing::info!(
            "Table {} deleted by user {} ({} favorites removed)",
            access.table_name,
            owner.user_id,
            favorites_removed
        );

        Ok(DeletedTable {
            table_name: access.table_name,
            favorites_removed,
        })
    }
}

/// Catalog work inside a lifecycle transaction fails as an engine error
/// naming the step
fn step_error(step: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |err| AppError::engine(err, step)
}

fn map_conflict(err: sqlx::Error, table_name: &str, step: &'static str) -> AppError {
    if has_sqlstate(&err, UNIQUE_VIOLATION) || has_sqlstate(&err, DUPLICATE_TABLE) {
        AppError::TableAlreadyExists(table_name.to_string())
    } else {
        step_error(step)(err)
    }
}

/// A cell converted to the Rust type bound for its column
#[derive(Debug, Clone, PartialEq)]
enum BoundValue {
    Text(Option<String>),
    Integer(Option<i32>),
    Float(Option<f64>),
    Boolean(Option<bool>),
    Date(Option<NaiveDate>),
}

fn coerce_row(
    row: &[CellValue],
    columns: &[ColumnSpec],
) -> std::result::Result<Vec<BoundValue>, String> {
    columns
        .iter()
        .enumerate()
        .map(|(index, column)| {
            let cell = row.get(index).unwrap_or(&CellValue::Null);
            coerce_cell(cell, column.column_type)
                .map_err(|msg| format!("column '{}': {}", column.name, msg))
        })
        .collect()
}

fn coerce_cell(cell: &CellValue, ty: SemanticType) -> std::result::Result<BoundValue, String> {
    let mismatch = || format!("cannot store {:?} as {}", cell, ty.as_str());

    if cell.is_null() {
        return Ok(match ty {
            SemanticType::String => BoundValue::Text(None),
            SemanticType::Integer => BoundValue::Integer(None),
            SemanticType::Float => BoundValue::Float(None),
            SemanticType::Boolean => BoundValue::Boolean(None),
            SemanticType::Date => BoundValue::Date(None),
        });
    }

    match (ty, cell) {
        (SemanticType::String, _) => Ok(BoundValue::Text(cell.to_text())),
        (SemanticType::Integer, CellValue::Integer(v)) => i32::try_from(*v)
            .map(|v| BoundValue::Integer(Some(v)))
            .map_err(|_| mismatch()),
        (SemanticType::Integer, CellValue::Text(s)) => s
            .trim()
            .parse::<i32>()
            .map(|v| BoundValue::Integer(Some(v)))
            .map_err(|_| mismatch()),
        (SemanticType::Float, CellValue::Integer(v)) => Ok(BoundValue::Float(Some(*v as f64))),
        (SemanticType::Float, CellValue::Float(v)) => Ok(BoundValue::Float(Some(*v))),
        (SemanticType::Float, CellValue::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map(|v| BoundValue::Float(Some(v)))
            .map_err(|_| mismatch()),
        (SemanticType::Boolean, CellValue::Boolean(v)) => Ok(BoundValue::Boolean(Some(*v))),
        (SemanticType::Boolean, CellValue::Text(s)) => match s.trim().to_lowercase().as_str() {
            "true" => Ok(BoundValue::Boolean(Some(true))),
            "false" => Ok(BoundValue::Boolean(Some(false))),
            _ => Err(mismatch()),
        },
        (SemanticType::Date, CellValue::Date(d)) => Ok(BoundValue::Date(Some(*d))),
        (SemanticType::Date, CellValue::Text(s)) => parse_date_text(s)
            .map(|d| BoundValue::Date(Some(d)))
            .ok_or_else(mismatch),
        _ => Err(mismatch()),
    }
}

/// One multi-row INSERT with every value bound
async fn insert_batch(
    conn: &mut PgConnection,
    prefix: &str,
    rows: Vec<Vec<BoundValue>>,
) -> std::result::Result<u64, sqlx::Error> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(prefix);
    qb.push_values(rows, |mut b, row| {
        for value in row {
            match value {
                BoundValue::Text(v) => b.push_bind(v),
                BoundValue::Integer(v) => b.push_bind(v),
                BoundValue::Float(v) => b.push_bind(v),
                BoundValue::Boolean(v) => b.push_bind(v),
                BoundValue::Date(v) => b.push_bind(v),
            };
        }
    });

    let result = qb.build().execute(&mut *conn).await?;
    Ok(result.rows_affected())
}
