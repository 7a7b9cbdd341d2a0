//! Migration Definitions - Core types and structures for migrations
//!
//! Defines the versioned change unit, its direction and body, and the result
//! types returned by the engine.

use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;

use sqlparser::dialect::GenericDialect;
use sqlparser::tokenizer::{Location, Token, Tokenizer};

use crate::connection::Executor;
use crate::dialect::{normalize_name, Dialect, SchemaChange};
use crate::error::{MigrateError, MigrateResult};

/// Tag matching every dialect
pub const ALL_DIALECTS: &str = "all";

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationDirection {
    /// Apply the migration
    Up,
    /// Revert the migration
    Down,
}

impl MigrationDirection {
    /// The direction used as compensating action
    pub fn opposite(self) -> Self {
        match self {
            MigrationDirection::Up => MigrationDirection::Down,
            MigrationDirection::Down => MigrationDirection::Up,
        }
    }
}

impl fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationDirection::Up => write!(f, "up"),
            MigrationDirection::Down => write!(f, "down"),
        }
    }
}

/// What a migration does when run
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationBody {
    /// Raw SQL, possibly several statements
    Sql(String),
    /// Structured schema changes rendered by the active dialect
    Script(Vec<SchemaChange>),
}

/// A single versioned, directional schema change
#[derive(Debug, Clone, PartialEq)]
pub struct Migration {
    /// Timestamp-like version, `YYYYMMDDhhmmss`
    pub version: String,
    /// Human-readable name
    pub name: String,
    pub direction: MigrationDirection,
    /// `"all"` or the name of the only dialect this migration applies to
    pub db_type: String,
    pub body: MigrationBody,
    /// File the migration was loaded from, if any
    pub path: Option<PathBuf>,
}

impl Migration {
    /// Create a raw SQL migration for every dialect
    pub fn sql(version: &str, name: &str, direction: MigrationDirection, sql: &str) -> Self {
        Self {
            version: version.to_string(),
            name: name.to_string(),
            direction,
            db_type: ALL_DIALECTS.to_string(),
            body: MigrationBody::Sql(sql.to_string()),
            path: None,
        }
    }

    /// Create a structured migration for every dialect
    pub fn script(
        version: &str,
        name: &str,
        direction: MigrationDirection,
        changes: Vec<SchemaChange>,
    ) -> Self {
        Self {
            version: version.to_string(),
            name: name.to_string(),
            direction,
            db_type: ALL_DIALECTS.to_string(),
            body: MigrationBody::Script(changes),
            path: None,
        }
    }

    /// Restrict the migration to one dialect
    pub fn for_dialect(mut self, db_type: &str) -> Self {
        self.db_type = db_type.to_string();
        self
    }

    /// Whether the migration applies to the dialect called `dialect_name`
    pub fn is_compatible(&self, dialect_name: &str) -> bool {
        let tag = normalize_name(&self.db_type);
        tag == ALL_DIALECTS || tag == normalize_name(dialect_name)
    }

    /// Statements this migration executes on `dialect`
    pub fn statements(&self, dialect: &dyn Dialect) -> MigrateResult<Vec<String>> {
        match &self.body {
            MigrationBody::Sql(sql) => Ok(split_sql_statements(sql)),
            MigrationBody::Script(changes) => {
                let translator = dialect.translator();
                let mut statements = Vec::new();
                for change in changes {
                    statements.extend(translator.translate(change)?);
                }
                Ok(statements)
            }
        }
    }

    /// Run the body against a connection or transaction
    pub async fn run<E>(&self, executor: &mut E, dialect: &dyn Dialect) -> MigrateResult<()>
    where
        E: Executor + ?Sized,
    {
        let statements = self
            .statements(dialect)
            .map_err(|e| MigrateError::execution(self, e))?;

        for statement in statements {
            executor
                .execute(&statement, &[])
                .await
                .map_err(|e| MigrateError::execution(self, e))?;
        }
        Ok(())
    }
}

/// Compare two versions: numerically when both are all digits, lexically otherwise
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let numeric = |v: &str| !v.is_empty() && v.bytes().all(|c| c.is_ascii_digit());
    if numeric(a) && numeric(b) {
        let a = a.trim_start_matches('0');
        let b = b.trim_start_matches('0');
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    } else {
        a.cmp(b)
    }
}

/// Split SQL into statements at top-level semicolons.
///
/// Semicolons inside quoted strings, identifiers, comments and dollar-quoted
/// bodies are not boundaries. Each statement is the original text, trimmed.
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    if sql.trim().is_empty() {
        return Vec::new();
    }

    let dialect = GenericDialect {};
    let tokens = match Tokenizer::new(&dialect, sql).tokenize_with_location() {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::warn!("SQL tokenizing failed, running body as one statement: {}", e);
            return vec![sql.trim().to_string()];
        }
    };

    let mut statements = Vec::new();
    let mut begin = 0;
    let mut has_content = false;
    for token in &tokens {
        match token.token {
            Token::SemiColon => {
                let end = byte_offset(sql, token.location);
                if has_content {
                    statements.push(sql[begin..end].trim().to_string());
                }
                begin = end + 1;
                has_content = false;
            }
            Token::Whitespace(_) | Token::EOF => {}
            _ => has_content = true,
        }
    }
    if has_content {
        statements.push(sql[begin..].trim().to_string());
    }
    statements
}

/// Byte offset of a 1-based line/column (in chars) tokenizer location
fn byte_offset(sql: &str, location: Location) -> usize {
    let line_start: usize = sql
        .split_inclusive('\n')
        .take(location.line.saturating_sub(1) as usize)
        .map(str::len)
        .sum();
    sql[line_start..]
        .char_indices()
        .nth(location.column.saturating_sub(1) as usize)
        .map_or(sql.len(), |(i, _)| line_start + i)
}

/// Result of running up migrations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationRunResult {
    /// Number of migrations that were applied
    pub applied_count: usize,
    /// Versions that were applied, in order
    pub applied_migrations: Vec<String>,
    /// Number of compatible migrations skipped because they were already applied
    pub skipped_count: usize,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

/// Result of rolling back migrations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollbackResult {
    /// Number of migrations that were rolled back
    pub rolled_back_count: usize,
    /// Versions that were rolled back, most recent first
    pub rolled_back_migrations: Vec<String>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

/// Migration state in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Pending,
    Applied,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationState::Pending => write!(f, "Pending"),
            MigrationState::Applied => write!(f, "Applied"),
        }
    }
}

/// One line of a status report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub version: String,
    pub name: String,
    pub state: MigrationState,
}
