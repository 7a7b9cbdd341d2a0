//! SQLite dialect

use std::io::{Read, Write};

use async_trait::async_trait;

use super::translator::{quote_segments, ColumnDefinition, ColumnType, SchemaTranslator};
use super::{dump_with_command, load_with_command, Dialect, DialectCapabilities};
use crate::error::{MigrateError, MigrateResult};

#[derive(Debug, Clone, Default)]
pub struct SqliteDialect {
    database_url: Option<String>,
    translator: SqliteTranslator,
}

impl SqliteDialect {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the database location used by the `sqlite3` shell
    pub fn with_database_url(mut self, url: &str) -> Self {
        self.database_url = Some(url.to_string());
        self
    }

    fn database_path(&self) -> MigrateResult<String> {
        let url = self.database_url.as_deref().ok_or_else(|| {
            MigrateError::Unsupported("sqlite schema dump requires a database path".to_string())
        })?;
        let path = ["sqlite3://", "sqlite://", "sqlite:"]
            .iter()
            .find_map(|prefix| url.strip_prefix(prefix))
            .unwrap_or(url);
        Ok(path.split('?').next().unwrap_or(path).to_string())
    }
}

#[async_trait]
impl Dialect for SqliteDialect {
    fn name(&self) -> &str {
        "sqlite3"
    }

    fn capabilities(&self) -> DialectCapabilities {
        DialectCapabilities::TRANSACTIONAL
    }

    fn translator(&self) -> &dyn SchemaTranslator {
        &self.translator
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    async fn dump_schema(&self, out: &mut (dyn Write + Send)) -> MigrateResult<()> {
        let args = vec![self.database_path()?, ".schema".to_string()];
        dump_with_command("sqlite3", &args, out).await
    }

    async fn load_schema(&self, input: &mut (dyn Read + Send)) -> MigrateResult<()> {
        let args = vec![self.database_path()?];
        load_with_command("sqlite3", &args, input).await
    }
}

#[derive(Debug, Clone, Default)]
pub struct SqliteTranslator;

impl SchemaTranslator for SqliteTranslator {
    fn quote(&self, ident: &str) -> String {
        quote_segments(ident, '"', '"')
    }

    fn column_type(&self, column: &ColumnDefinition) -> MigrateResult<String> {
        Ok(match column.column_type {
            ColumnType::String => format!("VARCHAR({})", column.size.unwrap_or(255)),
            ColumnType::Text | ColumnType::Uuid | ColumnType::Json => "TEXT".to_string(),
            ColumnType::Integer | ColumnType::BigInt | ColumnType::Boolean => "INTEGER".to_string(),
            ColumnType::Float | ColumnType::Decimal => "REAL".to_string(),
            ColumnType::Timestamp => "DATETIME".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Blob => "BLOB".to_string(),
        })
    }
}
