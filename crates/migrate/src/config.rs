//! Migration configuration
//!
//! Loaded from environment variables or YAML; every field has a default.

use std::env;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{MigrateError, MigrateResult};

/// Longest identifier accepted by the strictest supported engine
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Migration configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Directory holding migration files
    pub migrations_dir: PathBuf,
    /// Name of the ledger table
    pub migrations_table: String,
    /// Directory receiving `schema.sql` after each run; no dump when unset
    pub schema_path: Option<PathBuf>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("migrations"),
            migrations_table: "schema_migration".to_string(),
            schema_path: None,
        }
    }
}

impl MigrationConfig {
    /// Load configuration from `MIGRATIONS_DIR`, `MIGRATIONS_TABLE` and `MIGRATIONS_SCHEMA_PATH`
    pub fn from_env() -> MigrateResult<Self> {
        let defaults = Self::default();
        let config = Self {
            migrations_dir: get_env_optional("MIGRATIONS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.migrations_dir),
            migrations_table: get_env_or_default("MIGRATIONS_TABLE", &defaults.migrations_table),
            schema_path: get_env_optional("MIGRATIONS_SCHEMA_PATH").map(PathBuf::from),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from YAML; missing fields take their defaults
    pub fn from_yaml_str(yaml: &str) -> MigrateResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Builder-style setter for the ledger table
    pub fn with_table(mut self, table: &str) -> Self {
        self.migrations_table = table.to_string();
        self
    }

    /// Builder-style setter for the migrations directory
    pub fn with_migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    /// Builder-style setter for the schema dump directory
    pub fn with_schema_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.schema_path = Some(dir.into());
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> MigrateResult<()> {
        let table = self.migrations_table.as_str();
        if table.trim().is_empty() {
            return Err(MigrateError::Configuration(
                "Migrations table name cannot be empty".to_string(),
            ));
        }

        if !table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        {
            return Err(MigrateError::Configuration(format!(
                "Invalid migrations table name '{}', expected letters, digits, '_' or '.'",
                table
            )));
        }

        if table.split('.').any(|segment| segment.is_empty()) {
            return Err(MigrateError::Configuration(format!(
                "Invalid migrations table name '{}'",
                table
            )));
        }

        let last = table.rsplit('.').next().unwrap_or(table);
        if last.len() > MAX_IDENTIFIER_LENGTH {
            return Err(MigrateError::Configuration(format!(
                "Migrations table name '{}' exceeds {} characters",
                last, MAX_IDENTIFIER_LENGTH
            )));
        }

        Ok(())
    }
}

fn get_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn get_env_or_default(key: &str, default: &str) -> String {
    get_env_optional(key).unwrap_or_else(|| default.to_string())
}
