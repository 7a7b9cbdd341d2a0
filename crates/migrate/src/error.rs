//! Error types for the migration engine
//!
//! Every failure carries enough static context (operation, version, direction)
//! for an operator to reconcile the ledger by hand when a non-transactional
//! engine is left half-migrated.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::migrations::MigrationDirection;

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// The ledger operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOperation {
    /// Existence check before applying or rolling back
    Check,
    /// Recording a version as applied
    Insert,
    /// Removing a version after rollback
    Delete,
}

impl fmt::Display for LedgerOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerOperation::Check => write!(f, "checking for"),
            LedgerOperation::Insert => write!(f, "inserting"),
            LedgerOperation::Delete => write!(f, "deleting"),
        }
    }
}

/// Error types for migration operations
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Statement execution or query error reported by the driver
    #[error("Database error: {0}")]
    Database(String),

    /// Connection could not be opened or used
    #[error("Connection error: {0}")]
    Connection(String),

    /// Transaction begin/commit/rollback failure
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// The ledger table could not be probed or created
    #[error("problem creating schema migrations table {table}: {source}")]
    LedgerSetup {
        table: String,
        #[source]
        source: Box<MigrateError>,
    },

    /// A ledger row could not be checked, inserted or deleted
    #[error("problem {operation} migration version {version}: {source}")]
    Ledger {
        operation: LedgerOperation,
        version: String,
        #[source]
        source: Box<MigrateError>,
    },

    /// The number of applied versions could not be read
    #[error("unable to count existing migrations in {table}: {source}")]
    LedgerCount {
        table: String,
        #[source]
        source: Box<MigrateError>,
    },

    /// A non-transactional engine needs a compensating migration that does not exist
    #[error("there is no opposite {direction} migration for {version} migration version")]
    MissingOpposite {
        version: String,
        direction: MigrationDirection,
    },

    /// The migration body itself failed
    #[error("migration {direction} {version} ({name}) failed: {source}")]
    Execution {
        version: String,
        name: String,
        direction: MigrationDirection,
        #[source]
        source: Box<MigrateError>,
    },

    /// Rollback targeted a version that is not in the ledger
    #[error("migration version {0} does not exist")]
    NotApplied(String),

    /// Two migrations in the same direction share a version
    #[error("duplicate {direction} migration version {version}")]
    DuplicateVersion {
        version: String,
        direction: MigrationDirection,
    },

    /// A migration file could not be parsed
    #[error("invalid migration file {}: {reason}", path.display())]
    InvalidMigrationFile { path: PathBuf, reason: String },

    /// Abstract schema change could not be expressed in the dialect
    #[error("Translation error: {0}")]
    Translation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The dialect does not implement the requested capability
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Filesystem error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MigrateError {
    pub(crate) fn ledger(operation: LedgerOperation, version: &str, source: MigrateError) -> Self {
        MigrateError::Ledger {
            operation,
            version: version.to_string(),
            source: Box::new(source),
        }
    }

    pub(crate) fn execution(
        migration: &crate::migrations::Migration,
        source: MigrateError,
    ) -> Self {
        MigrateError::Execution {
            version: migration.version.clone(),
            name: migration.name.clone(),
            direction: migration.direction,
            source: Box::new(source),
        }
    }
}

// Convert from sqlx errors
impl From<sqlx::Error> for MigrateError {
    fn from(err: sqlx::Error) -> Self {
        MigrateError::Database(err.to_string())
    }
}

impl From<serde_yaml::Error> for MigrateError {
    fn from(err: serde_yaml::Error) -> Self {
        MigrateError::Configuration(err.to_string())
    }
}
