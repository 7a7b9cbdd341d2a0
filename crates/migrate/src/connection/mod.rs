//! Connection Abstractions
//!
//! The migration engine talks to a database only through these traits. A
//! connection can run statements directly or hand out a transaction; the
//! engine decides which one to use from the dialect's capabilities.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;

use crate::dialect::Dialect;
use crate::error::MigrateResult;

pub use memory::MemoryConnection;
pub use postgres::{PostgresConnection, PostgresTransaction};

/// Positional parameter value bound to a statement
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int64(i64),
    String(String),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Borrow the value as a string, if it is one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatabaseValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

/// Anything that can run statements: a connection or an open transaction
#[async_trait]
pub trait Executor: Send {
    /// Execute a statement and return the affected row count
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<u64>;

    /// Run a query and report whether it produced at least one row
    async fn exists(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<bool>;

    /// Run a query and read the first column of the first row as an integer
    async fn count(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<i64>;
}

/// An open transaction; dropping it without commit leaves the outcome to the driver
#[async_trait]
pub trait Transaction: Executor {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> MigrateResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> MigrateResult<()>;
}

/// A database connection as consumed by the migration engine
#[async_trait]
pub trait Connection: Executor {
    /// The dialect of the connected engine
    fn dialect(&self) -> Arc<dyn Dialect>;

    /// Begin a transaction
    async fn begin(&mut self) -> MigrateResult<Box<dyn Transaction>>;
}
