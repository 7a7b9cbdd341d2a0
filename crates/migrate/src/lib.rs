//! # elif-migrate: Schema Migrations for elif.rs
//!
//! Applies ordered, versioned schema changes and keeps a ledger of what has
//! been applied. Engines that roll back DDL inside a transaction get one
//! transaction per migration; engines that do not get a compensating
//! migration when the ledger update fails after the change went through.
//!
//! The engine consumes a [`Connection`] and the [`Dialect`] it reports, and
//! only ever looks at the dialect's [`DialectCapabilities`].
//!
//! MySQL commits implicitly around DDL, so [`MySqlDialect`] reports no
//! transactional DDL and MySQL takes the compensating path. Every pending up
//! migration on MySQL therefore needs a down migration of the same version
//! (and every rolled back one an up migration), otherwise the run fails with
//! [`MigrateError::MissingOpposite`] before anything executes.
//!
//! ```no_run
//! use elif_migrate::{MigrationConfig, Migrator, PostgresConnection};
//!
//! # async fn run() -> elif_migrate::MigrateResult<()> {
//! let conn = PostgresConnection::connect("postgres://localhost/app").await?;
//! let mut migrator = Migrator::from_config(conn, MigrationConfig::from_env()?)?;
//! migrator.up().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod migrations;

pub use config::MigrationConfig;
pub use connection::{
    Connection, DatabaseValue, Executor, MemoryConnection, PostgresConnection, Transaction,
};
pub use dialect::{
    Dialect, DialectCapabilities, DialectRegistry, MySqlDialect, PostgresDialect, SchemaChange,
    SchemaTranslator, SqliteDialect, TableDefinition, YdbDialect,
};
pub use error::{LedgerOperation, MigrateError, MigrateResult};
pub use migrations::{
    Migration, MigrationBody, MigrationDirection, MigrationKind, MigrationLoader,
    MigrationRunResult, MigrationSet, MigrationState, MigrationStatus, Migrator, RollbackResult,
    SchemaLedger,
};
