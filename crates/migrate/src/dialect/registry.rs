//! Dialect Registry
//!
//! Built once at startup and passed by reference to whoever needs to resolve a
//! dialect by name or by connection URL.

use std::collections::HashMap;
use std::sync::Arc;

use super::{normalize_name, Dialect, MySqlDialect, PostgresDialect, SqliteDialect, YdbDialect};
use crate::error::{MigrateError, MigrateResult};

/// Named collection of dialects
#[derive(Debug, Default)]
pub struct DialectRegistry {
    dialects: HashMap<String, Arc<dyn Dialect>>,
    aliases: HashMap<String, String>,
}

impl DialectRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every dialect shipped by this crate
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PostgresDialect::new()));
        registry.register(Arc::new(MySqlDialect::new()));
        registry.register(Arc::new(SqliteDialect::new()));
        registry.register(Arc::new(YdbDialect::new()));

        registry.alias("postgresql", "postgres");
        registry.alias("pg", "postgres");
        registry.alias("sqlite", "sqlite3");
        registry
    }

    /// Register a dialect under its own name, replacing any previous one
    pub fn register(&mut self, dialect: Arc<dyn Dialect>) {
        let name = normalize_name(dialect.name());
        tracing::debug!("Registering dialect: {}", name);
        self.dialects.insert(name, dialect);
    }

    /// Make `alias` resolve to the dialect registered as `name`
    pub fn alias(&mut self, alias: &str, name: &str) {
        self.aliases
            .insert(normalize_name(alias), normalize_name(name));
    }

    /// Look up a dialect by name or alias
    pub fn get(&self, name: &str) -> MigrateResult<Arc<dyn Dialect>> {
        let key = normalize_name(name);
        let key = self.aliases.get(&key).cloned().unwrap_or(key);
        self.dialects
            .get(&key)
            .cloned()
            .ok_or_else(|| MigrateError::Configuration(format!("Unsupported dialect: {}", name)))
    }

    /// Resolve the dialect for a connection URL by its scheme
    pub fn for_url(&self, url: &str) -> MigrateResult<Arc<dyn Dialect>> {
        let scheme = url
            .split_once(':')
            .map(|(scheme, _)| scheme.to_lowercase())
            .ok_or_else(|| {
                MigrateError::Configuration(format!("Database URL has no scheme: {}", url))
            })?;

        let name = match scheme.as_str() {
            "postgres" | "postgresql" => "postgres",
            "mysql" => "mysql",
            "sqlite" | "sqlite3" => "sqlite3",
            "grpc" | "grpcs" | "ydb" => "ydb",
            other => other,
        };
        self.get(name)
    }

    /// Registered dialect names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.dialects.keys().map(|n| n.as_str()).collect();
        names.sort_unstable();
        names
    }
}
