//! Migration System
//!
//! Definitions, ordered sets, the file loader, the schema-version ledger and
//! the runner that ties them together.

pub mod definitions;
pub mod ledger;
pub mod loader;
pub mod runner;
pub mod set;

pub use definitions::{
    compare_versions, split_sql_statements, Migration, MigrationBody, MigrationDirection,
    MigrationRunResult, MigrationState, MigrationStatus, RollbackResult, ALL_DIALECTS,
};
pub use ledger::{SchemaLedger, VERSION_LENGTH};
pub use loader::{LoadedMigrations, MigrationKind, MigrationLoader};
pub use runner::{Migrator, SCHEMA_FILE};
pub use set::MigrationSet;
