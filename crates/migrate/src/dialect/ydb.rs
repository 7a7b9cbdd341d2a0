//! YDB dialect
//!
//! YDB cannot run schema operations inside a transaction, and it cannot put a
//! secondary index on a primary key column. Every table needs a primary key,
//! and only primary key columns may be declared NOT NULL.

use async_trait::async_trait;

use super::translator::{
    ColumnDefinition, ColumnType, IndexDefinition, SchemaTranslator, TableDefinition,
};
use super::{Dialect, DialectCapabilities};
use crate::connection::DatabaseValue;
use crate::error::{MigrateError, MigrateResult};

#[derive(Debug, Clone, Default)]
pub struct YdbDialect {
    translator: YdbTranslator,
}

impl YdbDialect {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Dialect for YdbDialect {
    fn name(&self) -> &str {
        "ydb"
    }

    fn capabilities(&self) -> DialectCapabilities {
        DialectCapabilities {
            transactional_ddl: false,
            primary_key_index: false,
        }
    }

    fn translator(&self) -> &dyn SchemaTranslator {
        &self.translator
    }

    fn placeholder(&self, index: usize) -> String {
        format!("$p{}", index)
    }

    fn declare_parameters(&self, params: &[DatabaseValue]) -> String {
        params
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let yql_type = match value {
                    DatabaseValue::String(_) => "Utf8",
                    DatabaseValue::Int64(_) => "Int64",
                    DatabaseValue::Bool(_) => "Bool",
                    DatabaseValue::Null => "Utf8?",
                };
                format!("DECLARE {} AS {};\n", self.placeholder(i + 1), yql_type)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct YdbTranslator;

impl YdbTranslator {
    fn column_clause(&self, column: &ColumnDefinition, not_null: bool) -> MigrateResult<String> {
        let mut sql = format!("{} {}", self.quote(&column.name), self.column_type(column)?);
        if not_null {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            sql.push_str(&format!(" DEFAULT {}", default));
        }
        Ok(sql)
    }

    fn index_clause(&self, index: &IndexDefinition) -> MigrateResult<String> {
        if index.columns.is_empty() {
            return Err(MigrateError::Translation(format!(
                "index {} must cover at least one column",
                index.name
            )));
        }
        let unique = if index.unique { " UNIQUE" } else { "" };
        Ok(format!(
            "INDEX {} GLOBAL{} ON ({})",
            self.quote(&index.name),
            unique,
            self.quote_list(&index.columns)
        ))
    }
}

impl SchemaTranslator for YdbTranslator {
    fn quote(&self, ident: &str) -> String {
        // YDB paths use '/', not schema dots
        format!("`{}`", ident.replace('`', "``"))
    }

    fn column_type(&self, column: &ColumnDefinition) -> MigrateResult<String> {
        Ok(match column.column_type {
            ColumnType::String | ColumnType::Text | ColumnType::Uuid => "Utf8".to_string(),
            ColumnType::Integer => "Int32".to_string(),
            ColumnType::BigInt => "Int64".to_string(),
            ColumnType::Boolean => "Bool".to_string(),
            ColumnType::Float => "Double".to_string(),
            ColumnType::Decimal => "Decimal(22,9)".to_string(),
            ColumnType::Timestamp => "Timestamp".to_string(),
            ColumnType::Date => "Date".to_string(),
            ColumnType::Json => "Json".to_string(),
            ColumnType::Blob => "String".to_string(),
        })
    }

    fn column_sql(&self, column: &ColumnDefinition) -> MigrateResult<String> {
        self.column_clause(column, false)
    }

    fn create_table(&self, table: &TableDefinition) -> MigrateResult<Vec<String>> {
        if table.primary_key.is_empty() {
            return Err(MigrateError::Translation(format!(
                "ydb table {} requires a primary key",
                table.name
            )));
        }
        if table.columns.is_empty() {
            return Err(MigrateError::Translation(format!(
                "table {} must declare at least one column",
                table.name
            )));
        }

        let mut parts = Vec::new();
        for column in &table.columns {
            let in_key = table.primary_key.iter().any(|k| k == &column.name);
            parts.push(self.column_clause(column, in_key && !column.nullable)?);
        }
        for index in &table.indexes {
            parts.push(self.index_clause(index)?);
        }
        parts.push(format!("PRIMARY KEY ({})", self.quote_list(&table.primary_key)));

        Ok(vec![format!(
            "CREATE TABLE {} (\n    {}\n)",
            self.quote(&table.name),
            parts.join(",\n    ")
        )])
    }

    fn add_index(&self, table: &str, index: &IndexDefinition) -> MigrateResult<Vec<String>> {
        Ok(vec![format!(
            "ALTER TABLE {} ADD {}",
            self.quote(table),
            self.index_clause(index)?
        )])
    }

    fn drop_index(&self, table: &str, name: &str) -> MigrateResult<Vec<String>> {
        Ok(vec![format!(
            "ALTER TABLE {} DROP INDEX {}",
            self.quote(table),
            self.quote(name)
        )])
    }
}
