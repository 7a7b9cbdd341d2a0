//! Migration Loader - File system operations for migrations
//!
//! Files are named `<version>_<name>[.<dialect>].<up|down>.<sql|script>`.
//! `.sql` files hold raw SQL; `.script` files hold a YAML list of schema
//! changes. Anything else in the directory is ignored.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;

use super::definitions::{Migration, MigrationBody, MigrationDirection, ALL_DIALECTS};
use super::set::MigrationSet;
use crate::dialect::SchemaChange;
use crate::error::{MigrateError, MigrateResult};

static MIGRATION_FILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+)_([^.]+)(\.[a-z0-9]+)?\.(up|down)\.(sql|script)$").unwrap()
});

/// Body format of a migration file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationKind {
    Sql,
    Script,
}

impl MigrationKind {
    fn extension(self) -> &'static str {
        match self {
            MigrationKind::Sql => "sql",
            MigrationKind::Script => "script",
        }
    }
}

/// Up and down sets read from one directory
#[derive(Debug, Clone)]
pub struct LoadedMigrations {
    pub up: MigrationSet,
    pub down: MigrationSet,
}

/// Reads and creates migration files in a directory
#[derive(Debug, Clone)]
pub struct MigrationLoader {
    dir: PathBuf,
}

impl MigrationLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load every migration file; a missing directory yields empty sets
    pub fn load(&self) -> MigrateResult<LoadedMigrations> {
        let mut loaded = LoadedMigrations {
            up: MigrationSet::new(MigrationDirection::Up),
            down: MigrationSet::new(MigrationDirection::Down),
        };

        if !self.dir.exists() {
            tracing::debug!("Migrations directory {} does not exist", self.dir.display());
            return Ok(loaded);
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            if let Some(migration) = parse_migration_file(&path)? {
                match migration.direction {
                    MigrationDirection::Up => loaded.up.push(migration)?,
                    MigrationDirection::Down => loaded.down.push(migration)?,
                }
            }
        }

        loaded.up.sort();
        loaded.down.sort();
        tracing::debug!(
            "Loaded {} up and {} down migrations from {}",
            loaded.up.len(),
            loaded.down.len(),
            self.dir.display()
        );
        Ok(loaded)
    }

    /// Create an empty up/down pair stamped with the current UTC time
    pub fn create(&self, name: &str, kind: MigrationKind) -> MigrateResult<(PathBuf, PathBuf)> {
        let name = sanitize_name(name);
        if name.is_empty() {
            return Err(MigrateError::Configuration(
                "migration name cannot be empty".to_string(),
            ));
        }

        fs::create_dir_all(&self.dir)?;

        let version = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let up = self
            .dir
            .join(format!("{}_{}.up.{}", version, name, kind.extension()));
        let down = self
            .dir
            .join(format!("{}_{}.down.{}", version, name, kind.extension()));

        fs::write(&up, "")?;
        fs::write(&down, "")?;

        tracing::info!("> {}", up.display());
        tracing::info!("> {}", down.display());
        Ok((up, down))
    }
}

/// Parse one file; `None` when the name is not a migration file name
fn parse_migration_file(path: &Path) -> MigrateResult<Option<Migration>> {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return Ok(None);
    };
    let Some(caps) = MIGRATION_FILE.captures(file_name) else {
        return Ok(None);
    };

    let direction = match &caps[4] {
        "up" => MigrationDirection::Up,
        _ => MigrationDirection::Down,
    };
    let db_type = caps
        .get(3)
        .map(|m| m.as_str().trim_start_matches('.').to_string())
        .unwrap_or_else(|| ALL_DIALECTS.to_string());

    let content = fs::read_to_string(path)?;
    let body = match &caps[5] {
        "sql" => MigrationBody::Sql(content),
        _ => MigrationBody::Script(parse_script(path, &content)?),
    };

    Ok(Some(Migration {
        version: caps[1].to_string(),
        name: caps[2].to_string(),
        direction,
        db_type,
        body,
        path: Some(path.to_path_buf()),
    }))
}

fn parse_script(path: &Path, content: &str) -> MigrateResult<Vec<SchemaChange>> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_yaml::from_str(content).map_err(|e| MigrateError::InvalidMigrationFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn sanitize_name(name: &str) -> String {
    let mapped: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    mapped.trim_matches('_').to_string()
}
