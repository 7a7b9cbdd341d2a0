//! PostgreSQL dialect

use std::io::{Read, Write};

use async_trait::async_trait;

use super::translator::{quote_segments, ColumnDefinition, ColumnType, SchemaTranslator};
use super::{dump_with_command, load_with_command, Dialect, DialectCapabilities};
use crate::error::{MigrateError, MigrateResult};

/// PostgreSQL: DDL is fully transactional
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect {
    database_url: Option<String>,
    translator: PostgresTranslator,
}

impl PostgresDialect {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the URL used by `pg_dump` / `psql` for schema dump and load
    pub fn with_database_url(mut self, url: &str) -> Self {
        self.database_url = Some(url.to_string());
        self
    }

    fn url(&self) -> MigrateResult<&str> {
        self.database_url.as_deref().ok_or_else(|| {
            MigrateError::Unsupported("postgres schema dump requires a database URL".to_string())
        })
    }
}

#[async_trait]
impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgres"
    }

    fn capabilities(&self) -> DialectCapabilities {
        DialectCapabilities::TRANSACTIONAL
    }

    fn translator(&self) -> &dyn SchemaTranslator {
        &self.translator
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    async fn dump_schema(&self, out: &mut (dyn Write + Send)) -> MigrateResult<()> {
        let args = vec![
            "--schema-only".to_string(),
            "--no-owner".to_string(),
            self.url()?.to_string(),
        ];
        dump_with_command("pg_dump", &args, out).await
    }

    async fn load_schema(&self, input: &mut (dyn Read + Send)) -> MigrateResult<()> {
        let args = vec!["--quiet".to_string(), self.url()?.to_string()];
        load_with_command("psql", &args, input).await
    }
}

#[derive(Debug, Clone, Default)]
pub struct PostgresTranslator;

impl SchemaTranslator for PostgresTranslator {
    fn quote(&self, ident: &str) -> String {
        quote_segments(ident, '"', '"')
    }

    fn column_type(&self, column: &ColumnDefinition) -> MigrateResult<String> {
        Ok(match column.column_type {
            ColumnType::String => format!("VARCHAR({})", column.size.unwrap_or(255)),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Float => "DOUBLE PRECISION".to_string(),
            ColumnType::Decimal => "NUMERIC".to_string(),
            ColumnType::Timestamp => "TIMESTAMP".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Uuid => "UUID".to_string(),
            ColumnType::Json => "JSONB".to_string(),
            ColumnType::Blob => "BYTEA".to_string(),
        })
    }
}
