//! MySQL dialect
//!
//! MySQL commits implicitly around every DDL statement, so a failed migration
//! cannot be rolled back by aborting its transaction.

use std::io::{Read, Write};

use async_trait::async_trait;

use super::translator::{quote_segments, ColumnDefinition, ColumnType, SchemaTranslator};
use super::{dump_with_command, load_with_command, Dialect, DialectCapabilities};
use crate::error::{MigrateError, MigrateResult};

#[derive(Debug, Clone, Default)]
pub struct MySqlDialect {
    database_url: Option<String>,
    translator: MySqlTranslator,
}

impl MySqlDialect {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the URL used by `mysqldump` / `mysql` for schema dump and load
    pub fn with_database_url(mut self, url: &str) -> Self {
        self.database_url = Some(url.to_string());
        self
    }

    /// Command line arguments for the MySQL client tools
    fn client_args(&self) -> MigrateResult<Vec<String>> {
        let raw = self.database_url.as_deref().ok_or_else(|| {
            MigrateError::Unsupported("mysql schema dump requires a database URL".to_string())
        })?;
        let parsed = url::Url::parse(raw)
            .map_err(|e| MigrateError::Configuration(format!("Invalid database URL: {}", e)))?;

        let database = parsed.path().trim_start_matches('/');
        if database.is_empty() {
            return Err(MigrateError::Configuration(
                "Missing database name in URL".to_string(),
            ));
        }

        let mut args = vec![
            "-h".to_string(),
            parsed.host_str().unwrap_or("localhost").to_string(),
            "-P".to_string(),
            parsed.port().unwrap_or(3306).to_string(),
        ];
        if !parsed.username().is_empty() {
            args.push("-u".to_string());
            args.push(parsed.username().to_string());
        }
        if let Some(password) = parsed.password() {
            args.push(format!("--password={}", password));
        }
        args.push(database.to_string());
        Ok(args)
    }
}

#[async_trait]
impl Dialect for MySqlDialect {
    fn name(&self) -> &str {
        "mysql"
    }

    fn capabilities(&self) -> DialectCapabilities {
        DialectCapabilities {
            transactional_ddl: false,
            primary_key_index: true,
        }
    }

    fn translator(&self) -> &dyn SchemaTranslator {
        &self.translator
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    async fn dump_schema(&self, out: &mut (dyn Write + Send)) -> MigrateResult<()> {
        let mut args = vec!["--no-data".to_string(), "--skip-comments".to_string()];
        args.extend(self.client_args()?);
        dump_with_command("mysqldump", &args, out).await
    }

    async fn load_schema(&self, input: &mut (dyn Read + Send)) -> MigrateResult<()> {
        let args = self.client_args()?;
        load_with_command("mysql", &args, input).await
    }
}

#[derive(Debug, Clone, Default)]
pub struct MySqlTranslator;

impl SchemaTranslator for MySqlTranslator {
    fn quote(&self, ident: &str) -> String {
        quote_segments(ident, '`', '`')
    }

    fn column_type(&self, column: &ColumnDefinition) -> MigrateResult<String> {
        Ok(match column.column_type {
            ColumnType::String => format!("VARCHAR({})", column.size.unwrap_or(255)),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Boolean => "TINYINT(1)".to_string(),
            ColumnType::Float => "DOUBLE".to_string(),
            ColumnType::Decimal => "DECIMAL(65,30)".to_string(),
            ColumnType::Timestamp => "DATETIME".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Uuid => "CHAR(36)".to_string(),
            ColumnType::Json => "JSON".to_string(),
            ColumnType::Blob => "BLOB".to_string(),
        })
    }

    fn rename_table(&self, from: &str, to: &str) -> MigrateResult<Vec<String>> {
        Ok(vec![format!(
            "RENAME TABLE {} TO {}",
            self.quote(from),
            self.quote(to)
        )])
    }

    fn drop_index(&self, table: &str, name: &str) -> MigrateResult<Vec<String>> {
        Ok(vec![format!(
            "DROP INDEX {} ON {}",
            self.quote(name),
            self.quote(table)
        )])
    }
}
