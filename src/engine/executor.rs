//! Backend execution seam.
//!
//! The SQL engines assemble statements but never run them; a
//! `QueryExecutor` performs the round-trips. `PgExecutor` is the
//! bundled sqlx/Postgres implementation.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use crate::error::Result;
use crate::response::QueryTrace;

/// Executes rendered SQL against a backend.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run a count statement and return the scalar result.
    async fn count(&self, sql: &str) -> Result<u64>;

    /// Run a select statement and return each row as a JSON object.
    async fn fetch(&self, sql: &str) -> Result<Vec<Value>>;
}

/// Request-scoped sink receiving one entry per executed query.
pub trait InstrumentationSink: Send + Sync {
    fn record(&self, trace: &QueryTrace);
}

/// Postgres executor backed by a sqlx connection pool.
///
/// Rows come back as JSON via `row_to_json`, so result handling stays
/// independent of the table's column types.
#[derive(Debug, Clone)]
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}


#[async_trait]
impl QueryExecutor for PgExecutor {
    async fn count(&self, sql: &str) -> Result<u64> {
        let total: i64 = sqlx::query_scalar(sql)
            .fetch_one(&self.pool)
            .await
            .context("failed to execute count query")?;
        Ok(total.max(0) as u64)
    }

    async fn fetch(&self, sql: &str) -> Result<Vec<Value>> {
        let rows: Vec<Value> =
            sqlx::query_scalar(&format!("SELECT row_to_json(t) FROM ({sql}) t"))
                .fetch_all(&self.pool)
                .await
                .context("failed to execute select query")?;
        Ok(rows)
    }
}
