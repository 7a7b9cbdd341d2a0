//! Database Dialects
//!
//! A dialect describes one database engine to the migration engine: how to
//! quote and parameterize SQL, how to render abstract schema changes, how to
//! dump and load its schema, and which DDL guarantees it offers. The engine
//! only ever consults [`DialectCapabilities`]; it never branches on a name.

pub mod mysql;
pub mod postgres;
pub mod registry;
pub mod sqlite;
pub mod translator;
pub mod ydb;

use std::fmt;
use std::io::{Read, Write};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::connection::DatabaseValue;
use crate::error::{MigrateError, MigrateResult};

pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;
pub use registry::DialectRegistry;
pub use sqlite::SqliteDialect;
pub use translator::{
    ColumnDefinition, ColumnType, IndexDefinition, SchemaChange, SchemaTranslator,
    TableDefinition,
};
pub use ydb::YdbDialect;

/// DDL guarantees offered by an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialectCapabilities {
    /// Schema changes inside a transaction are undone by rollback
    pub transactional_ddl: bool,
    /// A separate unique index may be declared on a primary key column
    pub primary_key_index: bool,
}

impl DialectCapabilities {
    pub const TRANSACTIONAL: Self = Self {
        transactional_ddl: true,
        primary_key_index: true,
    };
}

/// Engine-specific SQL behaviour consumed by the migration engine
#[async_trait]
pub trait Dialect: fmt::Debug + Send + Sync {
    /// Dialect name as used in migration file tags ("postgres", "mysql", ...)
    fn name(&self) -> &str;

    /// DDL guarantees of this engine
    fn capabilities(&self) -> DialectCapabilities;

    /// Translator for structured schema changes
    fn translator(&self) -> &dyn SchemaTranslator;

    /// Placeholder for the 1-based positional parameter `index`
    fn placeholder(&self, index: usize) -> String;

    /// Prefix declaring the parameters bound to a query, for engines that require it
    fn declare_parameters(&self, _params: &[DatabaseValue]) -> String {
        String::new()
    }

    /// Quote an identifier
    fn quote(&self, ident: &str) -> String {
        self.translator().quote(ident)
    }

    /// Write the current schema as SQL
    async fn dump_schema(&self, _out: &mut (dyn Write + Send)) -> MigrateResult<()> {
        Err(MigrateError::Unsupported(format!(
            "{} does not support dumping the schema",
            self.name()
        )))
    }

    /// Apply a schema previously produced by `dump_schema`
    async fn load_schema(&self, _input: &mut (dyn Read + Send)) -> MigrateResult<()> {
        Err(MigrateError::Unsupported(format!(
            "{} does not support loading a schema",
            self.name()
        )))
    }
}

/// Run an external dump tool and copy its stdout into `out`
pub(crate) async fn dump_with_command(
    program: &str,
    args: &[String],
    out: &mut (dyn Write + Send),
) -> MigrateResult<()> {
    tracing::debug!("Dumping schema with {}", program);

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MigrateError::Database(format!(
            "{} failed: {}",
            program,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    out.write_all(&output.stdout)?;
    out.flush()?;
    Ok(())
}

/// Feed `input` to an external client tool on stdin
pub(crate) async fn load_with_command(
    program: &str,
    args: &[String],
    input: &mut (dyn Read + Send),
) -> MigrateResult<()> {
    let mut script = Vec::new();
    input.read_to_end(&mut script)?;

    tracing::debug!("Loading schema with {} ({} bytes)", program, script.len());

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(&script).await?;
        stdin.shutdown().await?;
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(MigrateError::Database(format!(
            "{} failed: {}",
            program,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Dialect lookup is case-insensitive, and so is compatibility matching
pub(crate) fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}
