//! Migration Runner - Executes migrations against the database
//!
//! Applies and rolls back migrations strictly in version order on a single
//! connection. Engines with transactional DDL run each migration and its
//! ledger update in one transaction. Other engines run the body directly and,
//! when the ledger update then fails, run the opposite migration as a
//! best-effort compensating action before returning the ledger error.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::definitions::{
    Migration, MigrationDirection, MigrationRunResult, MigrationState, MigrationStatus,
    RollbackResult,
};
use super::ledger::SchemaLedger;
use super::loader::MigrationLoader;
use super::set::MigrationSet;
use crate::config::MigrationConfig;
use crate::connection::{Connection, Executor};
use crate::dialect::Dialect;
use crate::error::{MigrateError, MigrateResult};

/// File written under `schema_path` after each run
pub const SCHEMA_FILE: &str = "schema.sql";

/// Runs migration sets against one connection
pub struct Migrator<C: Connection> {
    conn: C,
    config: MigrationConfig,
    ledger: SchemaLedger,
    up: MigrationSet,
    down: MigrationSet,
}

impl<C: Connection> Migrator<C> {
    /// Create a migrator with empty migration sets
    pub fn new(conn: C, config: MigrationConfig) -> Self {
        let ledger = SchemaLedger::new(&config.migrations_table);
        Self {
            conn,
            config,
            ledger,
            up: MigrationSet::new(MigrationDirection::Up),
            down: MigrationSet::new(MigrationDirection::Down),
        }
    }

    /// Validate the configuration and load migrations from its directory
    pub fn from_config(conn: C, config: MigrationConfig) -> MigrateResult<Self> {
        config.validate()?;
        let loaded = MigrationLoader::new(config.migrations_dir.clone()).load()?;
        Ok(Self::new(conn, config).with_migrations(loaded.up, loaded.down))
    }

    /// Replace both migration sets
    pub fn with_migrations(mut self, up: MigrationSet, down: MigrationSet) -> Self {
        self.up = up;
        self.down = down;
        self
    }

    /// Add a single migration to the set of its direction
    pub fn add_migration(&mut self, migration: Migration) -> MigrateResult<()> {
        match migration.direction {
            MigrationDirection::Up => self.up.push(migration),
            MigrationDirection::Down => self.down.push(migration),
        }
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.conn
    }

    pub fn into_connection(self) -> C {
        self.conn
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn ledger(&self) -> &SchemaLedger {
        &self.ledger
    }

    pub fn up_migrations(&self) -> &MigrationSet {
        &self.up
    }

    pub fn down_migrations(&self) -> &MigrationSet {
        &self.down
    }

    /// Create the ledger table if it is missing
    pub async fn ensure_ledger(&mut self) -> MigrateResult<bool> {
        self.ledger.ensure(&mut self.conn).await
    }

    /// Apply every pending migration
    pub async fn up(&mut self) -> MigrateResult<MigrationRunResult> {
        self.up_to(0).await
    }

    /// Apply at most `step` pending migrations; 0 applies all of them
    pub async fn up_to(&mut self, step: usize) -> MigrateResult<MigrationRunResult> {
        let start = Instant::now();
        let result = self.run_up(step, start).await;
        self.finish(start).await;
        result
    }

    /// Roll back at most `step` applied migrations, newest first; 0 rolls back all
    pub async fn down(&mut self, step: usize) -> MigrateResult<RollbackResult> {
        let start = Instant::now();
        let result = self.run_down(step, start).await;
        self.finish(start).await;
        result
    }

    /// Roll back everything, then apply everything
    pub async fn reset(&mut self) -> MigrateResult<(RollbackResult, MigrationRunResult)> {
        let rolled_back = self.down(0).await?;
        let applied = self.up().await?;
        Ok((rolled_back, applied))
    }

    /// Record every pending migration as applied without running it
    pub async fn up_log_only(&mut self) -> MigrateResult<MigrationRunResult> {
        let start = Instant::now();
        let result = self.run_log_only(start).await;
        self.finish(start).await;
        result
    }

    /// Applied/pending state of every compatible up migration, in version order
    pub async fn status(&mut self) -> MigrateResult<Vec<MigrationStatus>> {
        self.ensure_ledger().await?;
        let dialect = self.conn.dialect();
        let ups = self.up.compatible_with(dialect.name());

        let mut statuses = Vec::with_capacity(ups.len());
        for migration in &ups {
            let applied = self
                .ledger
                .is_applied(&mut self.conn, &*dialect, &migration.version)
                .await?;
            statuses.push(MigrationStatus {
                version: migration.version.clone(),
                name: migration.name.clone(),
                state: if applied {
                    MigrationState::Applied
                } else {
                    MigrationState::Pending
                },
            });
        }
        Ok(statuses)
    }

    /// Render `status()` as a table
    pub async fn write_status<W: Write>(&mut self, out: &mut W) -> MigrateResult<()> {
        let statuses = self.status().await?;
        out.write_all(render_status(&statuses).as_bytes())?;
        out.flush()?;
        Ok(())
    }

    /// Write the current schema to `<schema_path>/schema.sql`
    ///
    /// Returns `None` when no schema path is configured. A failed dump leaves no file behind.
    pub async fn dump_schema(&self) -> MigrateResult<Option<PathBuf>> {
        let Some(dir) = &self.config.schema_path else {
            return Ok(None);
        };

        fs::create_dir_all(dir)?;
        let path = dir.join(SCHEMA_FILE);
        let dialect = self.conn.dialect();

        let mut file = File::create(&path)?;
        if let Err(e) = dialect.dump_schema(&mut file).await {
            drop(file);
            if let Err(remove_err) = fs::remove_file(&path) {
                tracing::warn!("Failed to remove {}: {}", path.display(), remove_err);
            }
            return Err(e);
        }

        tracing::debug!("Schema dumped to {}", path.display());
        Ok(Some(path))
    }

    /// Load a schema file through the dialect, then bring the ledger up to date
    pub async fn load_schema(&mut self, path: &Path) -> MigrateResult<MigrationRunResult> {
        let dialect = self.conn.dialect();
        let mut file = File::open(path)?;
        dialect.load_schema(&mut file).await?;
        tracing::info!("Loaded schema from {}", path.display());
        self.up_log_only().await
    }

    async fn run_up(&mut self, step: usize, start: Instant) -> MigrateResult<MigrationRunResult> {
        self.ensure_ledger().await?;
        let dialect = self.conn.dialect();
        let ups = self.up.compatible_with(dialect.name());
        let downs = self.down.compatible_with(dialect.name());

        let mut pending = Vec::new();
        let mut skipped_count = 0;
        for migration in &ups {
            if self
                .ledger
                .is_applied(&mut self.conn, &*dialect, &migration.version)
                .await?
            {
                skipped_count += 1;
            } else {
                pending.push(migration);
            }
        }
        if step > 0 {
            pending.truncate(step);
        }

        let plan = pair_with_opposites(&pending, &downs, &*dialect)?;

        let mut applied_migrations = Vec::new();
        for (migration, opposite) in plan {
            if self
                .ledger
                .is_applied(&mut self.conn, &*dialect, &migration.version)
                .await?
            {
                tracing::debug!("Migration {} already applied, skipping", migration.version);
                skipped_count += 1;
                continue;
            }
            self.execute(migration, opposite, &*dialect).await?;
            tracing::info!("> {}", migration.name);
            applied_migrations.push(migration.version.clone());
        }

        if applied_migrations.is_empty() {
            tracing::info!("Migrations already up to date, nothing to apply");
        } else {
            tracing::info!(
                "Successfully applied {} migrations.",
                applied_migrations.len()
            );
        }

        Ok(MigrationRunResult {
            applied_count: applied_migrations.len(),
            applied_migrations,
            skipped_count,
            execution_time_ms: start.elapsed().as_millis(),
        })
    }

    async fn run_down(&mut self, step: usize, start: Instant) -> MigrateResult<RollbackResult> {
        self.ensure_ledger().await?;
        let dialect = self.conn.dialect();
        let count = self.ledger.count(&mut self.conn, &*dialect).await?;

        let mut downs = self.down.compatible_with(dialect.name());
        let ups = self.up.compatible_with(dialect.name());
        downs.retain_last(count);
        if step > 0 {
            downs.truncate(step);
        }

        let candidates: Vec<&Migration> = downs.iter().collect();
        let plan = pair_with_opposites(&candidates, &ups, &*dialect)?;

        let mut rolled_back_migrations = Vec::new();
        for (migration, opposite) in plan {
            if !self
                .ledger
                .is_applied(&mut self.conn, &*dialect, &migration.version)
                .await?
            {
                return Err(MigrateError::NotApplied(migration.version.clone()));
            }
            self.execute(migration, opposite, &*dialect).await?;
            tracing::info!("< {}", migration.name);
            rolled_back_migrations.push(migration.version.clone());
        }

        Ok(RollbackResult {
            rolled_back_count: rolled_back_migrations.len(),
            rolled_back_migrations,
            execution_time_ms: start.elapsed().as_millis(),
        })
    }

    async fn run_log_only(&mut self, start: Instant) -> MigrateResult<MigrationRunResult> {
        self.ensure_ledger().await?;
        let dialect = self.conn.dialect();
        let ups = self.up.compatible_with(dialect.name());

        let (applied_migrations, skipped_count) = if dialect.capabilities().transactional_ddl {
            let mut tx = self.conn.begin().await?;
            match log_pending(&self.ledger, &mut *tx, &*dialect, &ups).await {
                Ok(outcome) => {
                    tx.commit().await?;
                    outcome
                }
                Err(e) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        tracing::warn!("Failed to rollback transaction: {}", rollback_err);
                    }
                    return Err(e);
                }
            }
        } else {
            log_pending(&self.ledger, &mut self.conn, &*dialect, &ups).await?
        };

        Ok(MigrationRunResult {
            applied_count: applied_migrations.len(),
            applied_migrations,
            skipped_count,
            execution_time_ms: start.elapsed().as_millis(),
        })
    }

    /// Run one migration and update the ledger for its direction
    async fn execute(
        &mut self,
        migration: &Migration,
        opposite: Option<&Migration>,
        dialect: &dyn Dialect,
    ) -> MigrateResult<()> {
        if dialect.capabilities().transactional_ddl {
            let mut tx = self.conn.begin().await?;
            tracing::debug!("Began transaction for migration {}", migration.version);

            let outcome = match migration.run(&mut *tx, dialect).await {
                Ok(()) => update_ledger(&self.ledger, &mut *tx, dialect, migration).await,
                Err(e) => Err(e),
            };

            return match outcome {
                Ok(()) => {
                    tx.commit().await?;
                    tracing::debug!("Committed migration {}", migration.version);
                    Ok(())
                }
                Err(e) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        tracing::warn!(
                            "Failed to rollback migration {}: {}",
                            migration.version,
                            rollback_err
                        );
                    }
                    Err(e)
                }
            };
        }

        let opposite = opposite.ok_or_else(|| MigrateError::MissingOpposite {
            version: migration.version.clone(),
            direction: migration.direction.opposite(),
        })?;

        migration.run(&mut self.conn, dialect).await?;

        if let Err(e) = update_ledger(&self.ledger, &mut self.conn, dialect, migration).await {
            tracing::warn!(
                "Ledger update for {} failed, running {} migration to compensate",
                migration.version,
                opposite.direction
            );
            if let Err(compensation_err) = opposite.run(&mut self.conn, dialect).await {
                tracing::error!(
                    "Compensating {} migration {} failed, schema may be inconsistent: {}",
                    opposite.direction,
                    opposite.version,
                    compensation_err
                );
            }
            return Err(e);
        }
        Ok(())
    }

    async fn finish(&self, start: Instant) {
        if let Err(e) = self.dump_schema().await {
            tracing::warn!("Migrator: unable to dump schema: {}", e);
        }
        tracing::info!("{}", format_elapsed(start.elapsed()));
    }
}

/// Attach the compensating migration to each candidate.
///
/// Engines without transactional DDL need one for every candidate, checked
/// before anything runs.
fn pair_with_opposites<'a>(
    candidates: &[&'a Migration],
    opposites: &'a MigrationSet,
    dialect: &dyn Dialect,
) -> MigrateResult<Vec<(&'a Migration, Option<&'a Migration>)>> {
    let transactional = dialect.capabilities().transactional_ddl;
    candidates
        .iter()
        .map(|&migration| {
            let opposite = opposites.find_variant(&migration.version, &migration.db_type);
            if !transactional && opposite.is_none() {
                return Err(MigrateError::MissingOpposite {
                    version: migration.version.clone(),
                    direction: migration.direction.opposite(),
                });
            }
            Ok((migration, opposite))
        })
        .collect()
}

async fn update_ledger<E>(
    ledger: &SchemaLedger,
    executor: &mut E,
    dialect: &dyn Dialect,
    migration: &Migration,
) -> MigrateResult<()>
where
    E: Executor + ?Sized,
{
    match migration.direction {
        MigrationDirection::Up => {
            ledger
                .record_applied(executor, dialect, &migration.version)
                .await
        }
        MigrationDirection::Down => {
            ledger
                .record_rolled_back(executor, dialect, &migration.version)
                .await
        }
    }
}

/// Insert ledger rows for unapplied migrations; returns (recorded versions, skipped count)
async fn log_pending<E>(
    ledger: &SchemaLedger,
    executor: &mut E,
    dialect: &dyn Dialect,
    ups: &MigrationSet,
) -> MigrateResult<(Vec<String>, usize)>
where
    E: Executor + ?Sized,
{
    let mut recorded = Vec::new();
    let mut skipped = 0;
    for migration in ups {
        if ledger
            .is_applied(executor, dialect, &migration.version)
            .await?
        {
            skipped += 1;
            continue;
        }
        ledger
            .record_applied(executor, dialect, &migration.version)
            .await?;
        tracing::info!("> {}", migration.name);
        recorded.push(migration.version.clone());
    }
    Ok((recorded, skipped))
}

fn format_elapsed(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs_f64();
    if seconds > 60.0 {
        format!("{:.4} minutes", seconds / 60.0)
    } else {
        format!("{:.4} seconds", seconds)
    }
}

fn render_status(statuses: &[MigrationStatus]) -> String {
    let version_width = statuses
        .iter()
        .map(|s| s.version.len())
        .chain(std::iter::once("Version".len()))
        .max()
        .unwrap_or(0);
    let name_width = statuses
        .iter()
        .map(|s| s.name.len())
        .chain(std::iter::once("Name".len()))
        .max()
        .unwrap_or(0);

    let mut table = format!(
        "{:<vw$}  {:<nw$}  Status\n",
        "Version",
        "Name",
        vw = version_width,
        nw = name_width
    );
    for status in statuses {
        table.push_str(&format!(
            "{:<vw$}  {:<nw$}  {}\n",
            status.version,
            status.name,
            status.state,
            vw = version_width,
            nw = name_width
        ));
    }
    table
}
