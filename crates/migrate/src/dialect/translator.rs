//! Schema Translator - abstract schema changes to dialect SQL
//!
//! Migrations written as scripts describe tables, columns and indexes without
//! committing to a particular engine. Each dialect owns a translator that
//! renders those descriptions into its own DDL. Every statement is returned on
//! its own so drivers using prepared statements can execute them one by one.

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, MigrateResult};

/// Abstract column types understood by every translator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    String,
    Text,
    Integer,
    BigInt,
    Boolean,
    Float,
    Decimal,
    Timestamp,
    Date,
    Uuid,
    Json,
    Blob,
}

/// Column description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub size: Option<u32>,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            size: None,
            nullable: false,
            default: None,
        }
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default_value(mut self, default: &str) -> Self {
        self.default = Some(default.to_string());
        self
    }
}

/// Index description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

/// Table description used by `CreateTable`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
    #[serde(default)]
    pub primary_key: Vec<String>,
}

impl TableDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            indexes: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    /// Add a column
    pub fn column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    /// Add a string column with an optional length
    pub fn string(self, name: &str, size: Option<u32>) -> Self {
        let mut column = ColumnDefinition::new(name, ColumnType::String);
        column.size = size;
        self.column(column)
    }

    /// Add an integer column
    pub fn integer(self, name: &str) -> Self {
        self.column(ColumnDefinition::new(name, ColumnType::Integer))
    }

    /// Add an index
    pub fn index(mut self, name: &str, columns: &[&str], unique: bool) -> Self {
        self.indexes.push(IndexDefinition {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique,
        });
        self
    }

    /// Set the primary key columns
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    fn validate(&self) -> MigrateResult<()> {
        if self.name.trim().is_empty() {
            return Err(MigrateError::Translation("table name cannot be empty".to_string()));
        }
        if self.columns.is_empty() {
            return Err(MigrateError::Translation(format!(
                "table {} must declare at least one column",
                self.name
            )));
        }
        for key in &self.primary_key {
            if !self.columns.iter().any(|c| &c.name == key) {
                return Err(MigrateError::Translation(format!(
                    "primary key column {} is not declared on table {}",
                    key, self.name
                )));
            }
        }
        Ok(())
    }
}

/// One step of a structured migration script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SchemaChange {
    CreateTable(TableDefinition),
    DropTable { name: String },
    RenameTable { from: String, to: String },
    AddColumn { table: String, column: ColumnDefinition },
    DropColumn { table: String, column: String },
    AddIndex { table: String, index: IndexDefinition },
    DropIndex { table: String, name: String },
    Sql { sql: String },
}

/// Renders abstract schema changes as dialect-specific SQL
pub trait SchemaTranslator: Send + Sync {
    /// Quote an identifier; dotted names are quoted per segment
    fn quote(&self, ident: &str) -> String;

    /// SQL type for a column
    fn column_type(&self, column: &ColumnDefinition) -> MigrateResult<String>;

    /// Full column clause as used in CREATE TABLE and ADD COLUMN
    fn column_sql(&self, column: &ColumnDefinition) -> MigrateResult<String> {
        let mut sql = format!("{} {}", self.quote(&column.name), self.column_type(column)?);
        if !column.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            sql.push_str(&format!(" DEFAULT {}", default));
        }
        Ok(sql)
    }

    fn create_table(&self, table: &TableDefinition) -> MigrateResult<Vec<String>> {
        table.validate()?;

        let mut parts = table
            .columns
            .iter()
            .map(|c| self.column_sql(c))
            .collect::<MigrateResult<Vec<_>>>()?;
        if !table.primary_key.is_empty() {
            parts.push(format!("PRIMARY KEY ({})", self.quote_list(&table.primary_key)));
        }

        let mut statements = vec![format!(
            "CREATE TABLE {} (\n    {}\n)",
            self.quote(&table.name),
            parts.join(",\n    ")
        )];
        for index in &table.indexes {
            statements.extend(self.add_index(&table.name, index)?);
        }
        Ok(statements)
    }

    fn drop_table(&self, name: &str) -> MigrateResult<Vec<String>> {
        Ok(vec![format!("DROP TABLE {}", self.quote(name))])
    }

    fn rename_table(&self, from: &str, to: &str) -> MigrateResult<Vec<String>> {
        Ok(vec![format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote(from),
            self.quote(to)
        )])
    }

    fn add_column(&self, table: &str, column: &ColumnDefinition) -> MigrateResult<Vec<String>> {
        Ok(vec![format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote(table),
            self.column_sql(column)?
        )])
    }

    fn drop_column(&self, table: &str, column: &str) -> MigrateResult<Vec<String>> {
        Ok(vec![format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote(table),
            self.quote(column)
        )])
    }

    fn add_index(&self, table: &str, index: &IndexDefinition) -> MigrateResult<Vec<String>> {
        if index.columns.is_empty() {
            return Err(MigrateError::Translation(format!(
                "index {} must cover at least one column",
                index.name
            )));
        }
        let unique = if index.unique { "UNIQUE " } else { "" };
        Ok(vec![format!(
            "CREATE {}INDEX {} ON {} ({})",
            unique,
            self.quote(&index.name),
            self.quote(table),
            self.quote_list(&index.columns)
        )])
    }

    fn drop_index(&self, _table: &str, name: &str) -> MigrateResult<Vec<String>> {
        Ok(vec![format!("DROP INDEX {}", self.quote(name))])
    }

    fn quote_list(&self, idents: &[String]) -> String {
        idents
            .iter()
            .map(|i| self.quote(i))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Translate any schema change
    fn translate(&self, change: &SchemaChange) -> MigrateResult<Vec<String>> {
        match change {
            SchemaChange::CreateTable(table) => self.create_table(table),
            SchemaChange::DropTable { name } => self.drop_table(name),
            SchemaChange::RenameTable { from, to } => self.rename_table(from, to),
            SchemaChange::AddColumn { table, column } => self.add_column(table, column),
            SchemaChange::DropColumn { table, column } => self.drop_column(table, column),
            SchemaChange::AddIndex { table, index } => self.add_index(table, index),
            SchemaChange::DropIndex { table, name } => self.drop_index(table, name),
            SchemaChange::Sql { sql } => Ok(vec![sql.clone()]),
        }
    }
}

/// Quote each dot-separated segment with the given delimiters
pub(crate) fn quote_segments(ident: &str, open: char, close: char) -> String {
    ident
        .split('.')
        .map(|segment| {
            let escaped = segment.replace(close, &format!("{}{}", close, close));
            format!("{}{}{}", open, escaped, close)
        })
        .collect::<Vec<_>>()
        .join(".")
}
