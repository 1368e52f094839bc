//! Query Gateway: runs user-submitted SQL under the catalog's access rules.

pub mod inspect;
pub mod simplify;

use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use sqlx::{Column, Executor, PgConnection, PgPool, Statement};

use crate::config::Config;
use crate::constants::{ERR_LOGIN_REQUIRED, PUBLIC_STATUS};
use crate::error::{AppError, Result};
use crate::lifecycle::{
    ColumnSource, CreateTableRequest, CreatedTable, LoadOptions, TableLifecycle,
};
use crate::models::Identity;
use crate::policy;
use crate::schema::Ident;

pub use inspect::{inspect, InspectedQuery, QueryKind, TableRef};
pub use simplify::simplify_sql_error_message;

#[derive(Debug, Serialize)]
pub struct QueryOutcome {
    pub kind: QueryKind,
    pub duration_ms: f64,
    pub result: QueryPayload,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum QueryPayload {
    Rows {
        headers: Vec<String>,
        rows: Vec<Vec<Value>>,
        total: i64,
        truncated: bool,
    },
    Affected {
        rows_affected: u64,
    },
    Created {
        created: CreatedTable,
    },
}

#[derive(Clone)]
pub struct QueryGateway {
    pool: PgPool,
    lifecycle: TableLifecycle,
    row_limit: i64,
    statement_timeout_ms: u64,
    role: Option<Ident>,
}

impl QueryGateway {
    pub fn new(pool: PgPool, config: &Config) -> Self {
        let lifecycle = TableLifecycle::new(pool.clone(), LoadOptions::from_config(config));
        Self {
            pool,
            lifecycle,
            row_limit: config.select_row_limit,
            statement_timeout_ms: config.statement_timeout_ms,
            role: config.gateway_role.clone(),
        }
    }

    /// Inspect, authorize and run one statement
    pub async fn execute(&self, raw_sql: &str, user: Option<&Identity>) -> Result<QueryOutcome> {
        let started = Instant::now();
        let query = inspect(raw_sql)?;

        let result = match query.kind {
            QueryKind::Select => self.run_select(&query, user).await?,
            QueryKind::Insert | QueryKind::Update | QueryKind::Delete => {
                self.run_write(&query, require_identity(user)?).await?
            }
            QueryKind::Create => self.run_create(&query, require_identity(user)?).await?,
        };

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        tracing::info!(
            "Gateway ran {:?} for {} in {:.1} ms",
            query.kind,
            user.map(|u| u.username.as_str()).unwrap_or("anonymous"),
            duration_ms
        );

        Ok(QueryOutcome {
            kind: query.kind,
            duration_ms,
            result,
        })
    }

    async fn set_statement_timeout(&self, conn: &mut PgConnection) -> Result<()> {
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            self.statement_timeout_ms
        ))
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Drop to the configured role for the rest of the transaction, so the
    /// engine's own privileges bound whatever the static checks miss
    async fn assume_role(&self, conn: &mut PgConnection) -> Result<()> {
        if let Some(role) = &self.role {
            sqlx::query(&format!("SET LOCAL ROLE {}", role))
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }

    async fn run_select(
        &self,
        query: &InspectedQuery,
        user: Option<&Identity>,
    ) -> Result<QueryPayload> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;
        self.set_statement_timeout(&mut tx).await?;

        policy::ensure_relations_readable(&mut tx, &query.relations, user).await?;
        self.assume_role(&mut tx).await?;

        let headers: Vec<String> = {
            let statement = (&mut *tx)
                .prepare(query.sql.as_str())
                .await
                .map_err(|e| AppError::engine(e, &query.sql))?;
            statement
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect()
        };

        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM ({}) AS gateway_q", query.sql))
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| AppError::engine(e, &query.sql))?;

        let objects: Vec<Value> = sqlx::query_scalar(&format!(
            "SELECT row_to_json(gateway_q) FROM ({}) AS gateway_q LIMIT $1",
            query.sql
        ))
        .bind(self.row_limit)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AppError::engine(e, &query.sql))?;

        tx.commit().await?;

        let rows: Vec<Vec<Value>> = objects
            .iter()
            .map(|object| align_row(object, &headers))
            .collect();

        Ok(QueryPayload::Rows {
            truncated: total > rows.len() as i64,
            headers,
            rows,
            total,
        })
    }

    async fn run_write(&self, query: &InspectedQuery, user: &Identity) -> Result<QueryPayload> {
        let target = query
            .target
            .as_deref()
            .ok_or_else(|| AppError::InvalidQuery("Cannot find the target table".to_string()))?;

        let mut tx = self.pool.begin().await?;
        policy::require_owner(&mut tx, target, user, true).await?;
        policy::ensure_relations_readable(&mut tx, query.read_relations(), Some(user)).await?;
        self.set_statement_timeout(&mut tx).await?;
        self.assume_role(&mut tx).await?;

        let result = sqlx::query(&query.sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::engine(e, &query.sql))?;

        tx.commit().await?;

        Ok(QueryPayload::Affected {
            rows_affected: result.rows_affected(),
        })
    }

    async fn run_create(&self, query: &InspectedQuery, user: &Identity) -> Result<QueryPayload> {
        let table_name = query
            .target
            .clone()
            .ok_or_else(|| AppError::InvalidQuery("Cannot find the table name".to_string()))?;

        {
            let mut conn = self.pool.acquire().await?;
            policy::ensure_relations_readable(&mut conn, query.read_relations(), Some(user))
                .await?;
        }

        let request = CreateTableRequest {
            table_name,
            table_status: Some(PUBLIC_STATUS.to_string()),
            description: None,
            category: None,
            source: ColumnSource::RawDdl(query.sql.clone()),
        };
        let created = self.lifecycle.create(&request, user).await?;

        Ok(QueryPayload::Created { created })
    }
}

fn require_identity(user: Option<&Identity>) -> Result<&Identity> {
    user.ok_or_else(|| AppError::Unauthenticated(ERR_LOGIN_REQUIRED.to_string()))
}

/// `row_to_json` object to an array in header order
fn align_row(object: &Value, headers: &[String]) -> Vec<Value> {
    headers
        .iter()
        .map(|h| object.get(h).cloned().unwrap_or(Value::Null))
        .collect()
}
