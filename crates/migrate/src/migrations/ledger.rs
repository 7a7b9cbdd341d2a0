//! Schema-version ledger
//!
//! A single table with one `version` column. A version is applied iff a row
//! holding it exists.

use crate::connection::{Connection, DatabaseValue, Executor};
use crate::dialect::{Dialect, DialectCapabilities, TableDefinition};
use crate::error::{LedgerOperation, MigrateError, MigrateResult};

/// Width of the `version` column
pub const VERSION_LENGTH: u32 = 14;

const VERSION_COLUMN: &str = "version";

/// Handle on the ledger table; holds no connection of its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaLedger {
    table: String,
}

impl SchemaLedger {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Table layout for an engine with the given capabilities
    pub fn definition(&self, capabilities: DialectCapabilities) -> TableDefinition {
        let table = TableDefinition::new(&self.table)
            .string(VERSION_COLUMN, Some(VERSION_LENGTH))
            .primary_key(&[VERSION_COLUMN]);

        if capabilities.primary_key_index {
            let index = format!("{}_version_idx", self.table.replace('.', "_"));
            table.index(&index, &[VERSION_COLUMN], true)
        } else {
            table
        }
    }

    /// Create the ledger table unless a probe shows it already exists.
    ///
    /// Returns `true` when the table was created by this call.
    pub async fn ensure<C>(&self, conn: &mut C) -> MigrateResult<bool>
    where
        C: Connection + ?Sized,
    {
        let dialect = conn.dialect();
        let probe = format!("SELECT * FROM {}", dialect.quote(&self.table));
        if conn.exists(&probe, &[]).await.is_ok() {
            return Ok(false);
        }

        tracing::debug!("Creating schema migrations table: {}", self.table);

        let capabilities = dialect.capabilities();
        let statements = dialect
            .translator()
            .create_table(&self.definition(capabilities))
            .map_err(|e| self.setup_error(e))?;

        if capabilities.transactional_ddl {
            let mut tx = conn.begin().await.map_err(|e| self.setup_error(e))?;
            if let Err(e) = execute_all(&mut *tx, &statements).await {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!("Failed to rollback ledger creation: {}", rollback_err);
                }
                return Err(self.setup_error(e));
            }
            tx.commit().await.map_err(|e| self.setup_error(e))?;
        } else {
            execute_all(&mut *conn, &statements)
                .await
                .map_err(|e| self.setup_error(e))?;
        }

        Ok(true)
    }

    /// Whether `version` has a ledger row
    pub async fn is_applied<E>(
        &self,
        executor: &mut E,
        dialect: &dyn Dialect,
        version: &str,
    ) -> MigrateResult<bool>
    where
        E: Executor + ?Sized,
    {
        let params = [DatabaseValue::from(version)];
        let sql = format!(
            "{}SELECT 1 FROM {} WHERE {} = {}",
            dialect.declare_parameters(&params),
            dialect.quote(&self.table),
            dialect.quote(VERSION_COLUMN),
            dialect.placeholder(1)
        );
        executor
            .exists(&sql, &params)
            .await
            .map_err(|e| MigrateError::ledger(LedgerOperation::Check, version, e))
    }

    /// Insert the row marking `version` as applied
    pub async fn record_applied<E>(
        &self,
        executor: &mut E,
        dialect: &dyn Dialect,
        version: &str,
    ) -> MigrateResult<()>
    where
        E: Executor + ?Sized,
    {
        let params = [DatabaseValue::from(version)];
        let sql = format!(
            "{}INSERT INTO {} ({}) VALUES ({})",
            dialect.declare_parameters(&params),
            dialect.quote(&self.table),
            dialect.quote(VERSION_COLUMN),
            dialect.placeholder(1)
        );
        executor
            .execute(&sql, &params)
            .await
            .map(|_| ())
            .map_err(|e| MigrateError::ledger(LedgerOperation::Insert, version, e))
    }

    /// Delete the row of a rolled back `version`
    pub async fn record_rolled_back<E>(
        &self,
        executor: &mut E,
        dialect: &dyn Dialect,
        version: &str,
    ) -> MigrateResult<()>
    where
        E: Executor + ?Sized,
    {
        let params = [DatabaseValue::from(version)];
        let sql = format!(
            "{}DELETE FROM {} WHERE {} = {}",
            dialect.declare_parameters(&params),
            dialect.quote(&self.table),
            dialect.quote(VERSION_COLUMN),
            dialect.placeholder(1)
        );
        executor
            .execute(&sql, &params)
            .await
            .map(|_| ())
            .map_err(|e| MigrateError::ledger(LedgerOperation::Delete, version, e))
    }

    /// Number of applied versions
    pub async fn count<E>(&self, executor: &mut E, dialect: &dyn Dialect) -> MigrateResult<usize>
    where
        E: Executor + ?Sized,
    {
        let sql = format!("SELECT COUNT(*) FROM {}", dialect.quote(&self.table));
        let count = executor
            .count(&sql, &[])
            .await
            .map_err(|e| MigrateError::LedgerCount {
                table: self.table.clone(),
                source: Box::new(e),
            })?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn setup_error(&self, source: MigrateError) -> MigrateError {
        MigrateError::LedgerSetup {
            table: self.table.clone(),
            source: Box::new(source),
        }
    }
}

async fn execute_all<E>(executor: &mut E, statements: &[String]) -> MigrateResult<()>
where
    E: Executor + ?Sized,
{
    for statement in statements {
        executor.execute(statement, &[]).await?;
    }
    Ok(())
}
