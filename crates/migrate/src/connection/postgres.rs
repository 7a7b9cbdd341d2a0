//! PostgreSQL Connection
//!
//! sqlx-backed implementation of the connection traits. Statements run on the
//! pool; transactions hold a pooled connection until commit or rollback.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::{PgPool, Postgres, Row};

use super::{Connection, DatabaseValue, Executor, Transaction};
use crate::dialect::{Dialect, PostgresDialect};
use crate::error::{MigrateError, MigrateResult};

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// PostgreSQL connection backed by a sqlx pool
#[derive(Debug, Clone)]
pub struct PostgresConnection {
    pool: PgPool,
    dialect: Arc<dyn Dialect>,
}

impl PostgresConnection {
    /// Connect to the database at `database_url`
    pub async fn connect(database_url: &str) -> MigrateResult<Self> {
        validate_database_url(database_url)?;

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await
            .map_err(|e| MigrateError::Connection(format!("Failed to connect to database: {}", e)))?;

        Ok(Self {
            pool,
            dialect: Arc::new(PostgresDialect::new().with_database_url(database_url)),
        })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            dialect: Arc::new(PostgresDialect::new()),
        }
    }

    /// Replace the dialect, e.g. one carrying a database URL for schema dumps
    pub fn with_dialect(mut self, dialect: Arc<dyn Dialect>) -> Self {
        self.dialect = dialect;
        self
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn validate_database_url(url: &str) -> MigrateResult<()> {
    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
        return Err(MigrateError::Connection(
            "Invalid PostgreSQL URL scheme".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl Executor for PostgresConnection {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<u64> {
        let result = bind_all(sqlx::query(sql), params)
            .execute(&self.pool)
            .await
            .map_err(|e| MigrateError::Database(format!("Query execution failed: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn exists(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<bool> {
        let row = bind_all(sqlx::query(sql), params)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MigrateError::Database(format!("Query fetch failed: {}", e)))?;

        Ok(row.is_some())
    }

    async fn count(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<i64> {
        let row = bind_all(sqlx::query(sql), params)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MigrateError::Database(format!("Query fetch failed: {}", e)))?;

        row.try_get::<i64, _>(0)
            .map_err(|e| MigrateError::Database(format!("Failed to read count: {}", e)))
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    fn dialect(&self) -> Arc<dyn Dialect> {
        Arc::clone(&self.dialect)
    }

    async fn begin(&mut self) -> MigrateResult<Box<dyn Transaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MigrateError::Transaction(format!("Failed to start transaction: {}", e)))?;

        tracing::debug!("PostgreSQL transaction started");
        Ok(Box::new(PostgresTransaction::new(tx)))
    }
}

/// PostgreSQL transaction implementation
pub struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    pub fn new(tx: sqlx::Transaction<'static, Postgres>) -> Self {
        Self { tx: Some(tx) }
    }

    fn inner(&mut self) -> MigrateResult<&mut sqlx::Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| MigrateError::Transaction("Transaction already completed".to_string()))
    }
}

#[async_trait]
impl Executor for PostgresTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<u64> {
        let tx = self.inner()?;

        let result = bind_all(sqlx::query(sql), params)
            .execute(&mut **tx)
            .await
            .map_err(|e| MigrateError::Database(format!("Query execution failed: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn exists(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<bool> {
        let tx = self.inner()?;

        let row = bind_all(sqlx::query(sql), params)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| MigrateError::Database(format!("Query fetch failed: {}", e)))?;

        Ok(row.is_some())
    }

    async fn count(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<i64> {
        let tx = self.inner()?;

        let row = bind_all(sqlx::query(sql), params)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| MigrateError::Database(format!("Query fetch failed: {}", e)))?;

        row.try_get::<i64, _>(0)
            .map_err(|e| MigrateError::Database(format!("Failed to read count: {}", e)))
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn commit(mut self: Box<Self>) -> MigrateResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| MigrateError::Transaction("Transaction already completed".to_string()))?;

        tx.commit()
            .await
            .map_err(|e| MigrateError::Transaction(format!("Transaction commit failed: {}", e)))
    }

    async fn rollback(mut self: Box<Self>) -> MigrateResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| MigrateError::Transaction("Transaction already completed".to_string()))?;

        tx.rollback()
            .await
            .map_err(|e| MigrateError::Transaction(format!("Transaction rollback failed: {}", e)))
    }
}

/// Bind every parameter to a sqlx query in order
fn bind_all<'q>(mut query: PgQuery<'q>, params: &[DatabaseValue]) -> PgQuery<'q> {
    for param in params {
        query = match param {
            DatabaseValue::Null => query.bind(Option::<String>::None),
            DatabaseValue::Bool(b) => query.bind(*b),
            DatabaseValue::Int64(i) => query.bind(*i),
            DatabaseValue::String(s) => query.bind(s.clone()),
        };
    }
    query
}
