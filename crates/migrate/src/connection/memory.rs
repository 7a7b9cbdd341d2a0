//! In-memory Connection
//!
//! Understands just enough SQL to host a migration ledger and simple DDL:
//! table creation, removal, renames, single-column inserts, deletes and
//! selects. Only the first inserted value of each row is kept. Every
//! statement is recorded, and statements matching an injected pattern fail,
//! which makes the connection useful for dry runs and for exercising failure
//! paths without a live database.
//!
//! Transactions snapshot the database on `begin`. Rollback restores the
//! snapshot; when the dialect lacks transactional DDL only row data is
//! restored and table-level changes survive, as they would on such an engine.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{Connection, DatabaseValue, Executor, Transaction};
use crate::dialect::Dialect;
use crate::error::{MigrateError, MigrateResult};

static DECLARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^(?:\s*DECLARE\s+\$\w+\s+AS\s+[^;]+;)+").unwrap());
static CREATE_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*CREATE\s+TABLE\s+(IF\s+NOT\s+EXISTS\s+)?([^\s(;]+)").unwrap()
});
static DROP_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^\s*DROP\s+TABLE\s+(IF\s+EXISTS\s+)?([^\s;]+)").unwrap());
static RENAME_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)^\s*(?:ALTER\s+TABLE\s+([^\s;]+)\s+RENAME\s+TO|RENAME\s+TABLE\s+([^\s;]+)\s+TO)\s+([^\s;]+)",
    )
    .unwrap()
});
static ALTER_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^\s*ALTER\s+TABLE\s+([^\s;]+)").unwrap());
static CREATE_INDEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*CREATE\s+(UNIQUE\s+)?INDEX\s+\S+\s+ON\s+([^\s(;]+)").unwrap()
});
static INSERT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*INSERT\s+INTO\s+([^\s(;]+)\s*(?:\([^)]*\))?\s*VALUES\s*\(\s*([^,)]+)").unwrap()
});
static DELETE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*DELETE\s+FROM\s+([^\s;]+)(?:\s+WHERE\s+\S+\s*=\s*([^\s;]+))?").unwrap()
});
static SELECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*SELECT\s+(.*?)\s+FROM\s+([^\s;]+)(?:\s+WHERE\s+\S+\s*=\s*([^\s;]+))?")
        .unwrap()
});
static BARE_SELECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)^\s*SELECT\s").unwrap());

/// Tables by name, each holding the first-column values of its rows
#[derive(Debug, Clone, Default)]
struct MemoryDatabase {
    tables: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    database: MemoryDatabase,
    statements: Vec<String>,
    failures: Vec<String>,
}

/// What a statement produced
#[derive(Debug, Default)]
struct Outcome {
    affected: u64,
    rows: Vec<String>,
    count: Option<i64>,
}

/// Shared-state in-memory connection; clones observe the same database
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    state: Arc<Mutex<MemoryState>>,
    dialect: Arc<dyn Dialect>,
}

impl MemoryConnection {
    /// Create an empty database that behaves like `dialect`
    pub fn new(dialect: Arc<dyn Dialect>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            dialect,
        }
    }

    /// Make every statement containing `pattern` (case-insensitive) fail
    pub fn fail_when(&self, pattern: &str) {
        lock(&self.state).failures.push(pattern.to_lowercase());
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        lock(&self.state).failures.clear();
    }

    /// Every statement attempted so far, in order
    pub fn statements(&self) -> Vec<String> {
        lock(&self.state).statements.clone()
    }

    /// Number of attempted statements containing `pattern` (case-insensitive)
    pub fn statement_count(&self, pattern: &str) -> usize {
        let pattern = pattern.to_lowercase();
        lock(&self.state)
            .statements
            .iter()
            .filter(|s| s.to_lowercase().contains(&pattern))
            .count()
    }

    /// Whether a table exists
    pub fn has_table(&self, name: &str) -> bool {
        lock(&self.state)
            .database
            .tables
            .contains_key(&unquote(name))
    }

    /// Table names, sorted
    pub fn tables(&self) -> Vec<String> {
        lock(&self.state).database.tables.keys().cloned().collect()
    }

    /// Stored first-column values of a table, in insertion order
    pub fn rows(&self, table: &str) -> Vec<String> {
        lock(&self.state)
            .database
            .tables
            .get(&unquote(table))
            .cloned()
            .unwrap_or_default()
    }
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Strip identifier quoting of any dialect
fn unquote(ident: &str) -> String {
    ident
        .trim()
        .trim_end_matches(';')
        .split('.')
        .map(|s| s.trim_matches(|c| c == '"' || c == '`' || c == '[' || c == ']'))
        .collect::<Vec<_>>()
        .join(".")
}

/// Resolve a literal or placeholder token against the bound parameters
fn resolve_value(token: &str, params: &[DatabaseValue], next_param: &mut usize) -> String {
    let token = token.trim().trim_end_matches(')');
    let param = if token == "?" {
        let index = *next_param;
        *next_param += 1;
        params.get(index)
    } else if let Some(index) = token
        .strip_prefix('$')
        .and_then(|n| n.trim_start_matches('p').parse::<usize>().ok())
    {
        index.checked_sub(1).and_then(|i| params.get(i))
    } else {
        return token.trim_matches('\'').to_string();
    };

    match param {
        Some(DatabaseValue::String(s)) => s.clone(),
        Some(DatabaseValue::Int64(i)) => i.to_string(),
        Some(DatabaseValue::Bool(b)) => b.to_string(),
        Some(DatabaseValue::Null) | None => String::new(),
    }
}

fn missing_table(name: &str) -> MigrateError {
    MigrateError::Database(format!("relation \"{}\" does not exist", name))
}

fn run(state: &Mutex<MemoryState>, sql: &str, params: &[DatabaseValue]) -> MigrateResult<Outcome> {
    let mut state = lock(state);
    state.statements.push(sql.to_string());

    let lowered = sql.to_lowercase();
    if let Some(pattern) = state.failures.iter().find(|p| lowered.contains(p.as_str())) {
        return Err(MigrateError::Database(format!(
            "injected failure matching '{}'",
            pattern
        )));
    }

    apply(&mut state.database, sql, params)
}

fn apply(db: &mut MemoryDatabase, sql: &str, params: &[DatabaseValue]) -> MigrateResult<Outcome> {
    let mut next_param = 0;
    let sql = DECLARE.find(sql).map_or(sql, |m| &sql[m.end()..]);

    if let Some(caps) = CREATE_TABLE.captures(sql) {
        let name = unquote(&caps[2]);
        if db.tables.contains_key(&name) {
            if caps.get(1).is_some() {
                return Ok(Outcome::default());
            }
            return Err(MigrateError::Database(format!(
                "relation \"{}\" already exists",
                name
            )));
        }
        db.tables.insert(name, Vec::new());
        return Ok(Outcome::default());
    }

    if let Some(caps) = DROP_TABLE.captures(sql) {
        let name = unquote(&caps[2]);
        if db.tables.remove(&name).is_none() && caps.get(1).is_none() {
            return Err(missing_table(&name));
        }
        return Ok(Outcome::default());
    }

    if let Some(caps) = RENAME_TABLE.captures(sql) {
        let from = unquote(caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str()));
        let to = unquote(&caps[3]);
        let rows = db.tables.remove(&from).ok_or_else(|| missing_table(&from))?;
        db.tables.insert(to, rows);
        return Ok(Outcome::default());
    }

    if let Some(caps) = ALTER_TABLE.captures(sql) {
        let name = unquote(&caps[1]);
        if !db.tables.contains_key(&name) {
            return Err(missing_table(&name));
        }
        return Ok(Outcome::default());
    }

    if let Some(caps) = CREATE_INDEX.captures(sql) {
        let name = unquote(&caps[2]);
        if !db.tables.contains_key(&name) {
            return Err(missing_table(&name));
        }
        return Ok(Outcome::default());
    }

    if let Some(caps) = INSERT.captures(sql) {
        let name = unquote(&caps[1]);
        let value = resolve_value(&caps[2], params, &mut next_param);
        let rows = db.tables.get_mut(&name).ok_or_else(|| missing_table(&name))?;
        rows.push(value);
        return Ok(Outcome {
            affected: 1,
            ..Outcome::default()
        });
    }

    if let Some(caps) = DELETE.captures(sql) {
        let name = unquote(&caps[1]);
        let filter = caps
            .get(2)
            .map(|m| resolve_value(m.as_str(), params, &mut next_param));
        let rows = db.tables.get_mut(&name).ok_or_else(|| missing_table(&name))?;
        let before = rows.len();
        match filter {
            Some(value) => rows.retain(|row| row != &value),
            None => rows.clear(),
        }
        return Ok(Outcome {
            affected: (before - rows.len()) as u64,
            ..Outcome::default()
        });
    }

    if let Some(caps) = SELECT.captures(sql) {
        let name = unquote(&caps[2]);
        let filter = caps
            .get(3)
            .map(|m| resolve_value(m.as_str(), params, &mut next_param));
        let rows = db.tables.get(&name).ok_or_else(|| missing_table(&name))?;
        let rows: Vec<String> = match filter {
            Some(value) => rows.iter().filter(|row| *row == &value).cloned().collect(),
            None => rows.clone(),
        };
        let count = caps[1]
            .to_lowercase()
            .contains("count(")
            .then_some(rows.len() as i64);
        return Ok(Outcome {
            affected: 0,
            rows,
            count,
        });
    }

    if BARE_SELECT.is_match(sql) {
        return Ok(Outcome {
            rows: vec!["1".to_string()],
            ..Outcome::default()
        });
    }

    Ok(Outcome::default())
}

fn exists_from(outcome: Outcome) -> bool {
    outcome.count.is_some() || !outcome.rows.is_empty()
}

fn count_from(outcome: Outcome) -> MigrateResult<i64> {
    match outcome.count {
        Some(count) => Ok(count),
        None => outcome
            .rows
            .first()
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or_else(|| MigrateError::Database("query did not return a count".to_string())),
    }
}

#[async_trait]
impl Executor for MemoryConnection {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<u64> {
        run(&self.state, sql, params).map(|o| o.affected)
    }

    async fn exists(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<bool> {
        run(&self.state, sql, params).map(exists_from)
    }

    async fn count(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<i64> {
        run(&self.state, sql, params).and_then(count_from)
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn dialect(&self) -> Arc<dyn Dialect> {
        Arc::clone(&self.dialect)
    }

    async fn begin(&mut self) -> MigrateResult<Box<dyn Transaction>> {
        let snapshot = lock(&self.state).database.clone();
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            snapshot,
            transactional_ddl: self.dialect.capabilities().transactional_ddl,
            finished: false,
        }))
    }
}

/// Transaction over a [`MemoryConnection`]; rolls back when dropped unfinished
#[derive(Debug)]
pub struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    snapshot: MemoryDatabase,
    transactional_ddl: bool,
    finished: bool,
}

impl MemoryTransaction {
    fn restore(&mut self) {
        let mut state = lock(&self.state);
        if self.transactional_ddl {
            state.database = self.snapshot.clone();
            return;
        }
        for (name, rows) in state.database.tables.iter_mut() {
            *rows = self.snapshot.tables.get(name).cloned().unwrap_or_default();
        }
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.restore();
        }
    }
}

#[async_trait]
impl Executor for MemoryTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<u64> {
        run(&self.state, sql, params).map(|o| o.affected)
    }

    async fn exists(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<bool> {
        run(&self.state, sql, params).map(exists_from)
    }

    async fn count(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<i64> {
        run(&self.state, sql, params).and_then(count_from)
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(mut self: Box<Self>) -> MigrateResult<()> {
        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> MigrateResult<()> {
        self.restore();
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{PostgresDialect, YdbDialect};

    fn postgres() -> MemoryConnection {
        MemoryConnection::new(Arc::new(PostgresDialect::new()))
    }

    #[tokio::test]
    async fn test_ledger_statement_shapes() {
        let mut conn = postgres();
        assert!(conn.exists("SELECT * FROM \"ledger\"", &[]).await.is_err());

        conn.execute("CREATE TABLE \"ledger\" (\n    \"version\" VARCHAR(14) NOT NULL\n)", &[])
            .await
            .unwrap();
        conn.execute("INSERT INTO \"ledger\" (\"version\") VALUES ($1)", &["20240101000000".into()])
            .await
            .unwrap();
        conn.execute("INSERT INTO ledger (version) VALUES ('20240102000000')", &[])
            .await
            .unwrap();

        assert!(conn
            .exists("SELECT 1 FROM \"ledger\" WHERE \"version\" = $1", &["20240101000000".into()])
            .await
            .unwrap());
        assert_eq!(conn.count("SELECT COUNT(*) FROM \"ledger\"", &[]).await.unwrap(), 2);

        let deleted = conn
            .execute("DELETE FROM `ledger` WHERE `version` = ?", &["20240101000000".into()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(conn.rows("ledger"), vec!["20240102000000".to_string()]);
    }

    #[tokio::test]
    async fn test_injected_failure_is_recorded() {
        let mut conn = postgres();
        conn.fail_when("create table");
        let result = conn.execute("CREATE TABLE widgets (id INT)", &[]).await;
        assert!(matches!(result, Err(MigrateError::Database(_))));
        assert_eq!(conn.statement_count("CREATE TABLE"), 1);
        assert!(!conn.has_table("widgets"));
    }

    #[tokio::test]
    async fn test_rollback_restores_ddl_on_transactional_engine() {
        let mut conn = postgres();
        let mut tx = conn.begin().await.unwrap();
        tx.execute("CREATE TABLE widgets (id INT)", &[]).await.unwrap();
        tx.rollback().await.unwrap();
        assert!(!conn.has_table("widgets"));
    }

    #[tokio::test]
    async fn test_rollback_keeps_ddl_on_non_transactional_engine() {
        let mut conn = MemoryConnection::new(Arc::new(YdbDialect::new()));
        conn.execute("CREATE TABLE ledger (version Utf8)", &[]).await.unwrap();

        let mut tx = conn.begin().await.unwrap();
        tx.execute("CREATE TABLE widgets (id Int32)", &[]).await.unwrap();
        tx.execute("INSERT INTO ledger (version) VALUES ($1)", &["1".into()])
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert!(conn.has_table("widgets"));
        assert!(conn.rows("ledger").is_empty());
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let mut conn = postgres();
        {
            let mut tx = conn.begin().await.unwrap();
            tx.execute("CREATE TABLE widgets (id INT)", &[]).await.unwrap();
        }
        assert!(!conn.has_table("widgets"));
    }

    #[test]
    fn test_rename_table() {
        let mut db = MemoryDatabase::default();
        apply(&mut db, "CREATE TABLE a (id INT)", &[]).unwrap();
        apply(&mut db, "ALTER TABLE \"a\" RENAME TO \"b\"", &[]).unwrap();
        assert!(db.tables.contains_key("b"));
        apply(&mut db, "RENAME TABLE `b` TO `c`", &[]).unwrap();
        assert!(db.tables.contains_key("c"));
        assert!(apply(&mut db, "ALTER TABLE a ADD COLUMN x INT", &[]).is_err());
    }
}
