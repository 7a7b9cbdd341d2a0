//! Ordered collection of migrations for one direction

use std::collections::HashSet;

use super::definitions::{compare_versions, Migration, MigrationDirection, ALL_DIALECTS};
use crate::dialect::normalize_name;
use crate::error::{MigrateError, MigrateResult};

/// Migrations of a single direction, kept in apply order after `sort`
#[derive(Debug, Clone)]
pub struct MigrationSet {
    direction: MigrationDirection,
    migrations: Vec<Migration>,
}

impl MigrationSet {
    pub fn new(direction: MigrationDirection) -> Self {
        Self {
            direction,
            migrations: Vec::new(),
        }
    }

    pub fn direction(&self) -> MigrationDirection {
        self.direction
    }

    /// Add a migration; the direction must match and the version must be new
    pub fn push(&mut self, migration: Migration) -> MigrateResult<()> {
        if migration.direction != self.direction {
            return Err(MigrateError::Configuration(format!(
                "cannot add {} migration {} to the {} set",
                migration.direction, migration.version, self.direction
            )));
        }
        // Dialect-specific variants of one version may coexist
        if self
            .migrations
            .iter()
            .any(|m| {
                m.version == migration.version
                    && normalize_name(&m.db_type) == normalize_name(&migration.db_type)
            })
        {
            return Err(MigrateError::DuplicateVersion {
                version: migration.version,
                direction: migration.direction,
            });
        }
        self.migrations.push(migration);
        Ok(())
    }

    /// Up sets ascend by version, Down sets descend
    pub fn sort(&mut self) {
        match self.direction {
            MigrationDirection::Up => self
                .migrations
                .sort_by(|a, b| compare_versions(&a.version, &b.version)),
            MigrationDirection::Down => self
                .migrations
                .sort_by(|a, b| compare_versions(&b.version, &a.version)),
        }
    }

    /// Keep only the migrations matching `predicate`, preserving order
    pub fn filter<F>(&mut self, mut predicate: F)
    where
        F: FnMut(&Migration) -> bool,
    {
        self.migrations.retain(|m| predicate(m));
    }

    /// Sorted copy holding only the migrations compatible with `dialect_name`.
    ///
    /// Each version appears once: a variant tagged for the dialect replaces the
    /// `all` variant of the same version.
    pub fn compatible_with(&self, dialect_name: &str) -> Self {
        let mut set = self.clone();
        set.filter(|m| m.is_compatible(dialect_name));
        let tagged: HashSet<String> = set
            .iter()
            .filter(|m| normalize_name(&m.db_type) != ALL_DIALECTS)
            .map(|m| m.version.clone())
            .collect();
        set.filter(|m| normalize_name(&m.db_type) != ALL_DIALECTS || !tagged.contains(&m.version));
        set.sort();
        set
    }

    pub fn find(&self, version: &str) -> Option<&Migration> {
        self.migrations.iter().find(|m| m.version == version)
    }

    /// The variant of `version` tagged `db_type`, else any variant of `version`
    pub fn find_variant(&self, version: &str, db_type: &str) -> Option<&Migration> {
        let db_type = normalize_name(db_type);
        self.migrations
            .iter()
            .find(|m| m.version == version && normalize_name(&m.db_type) == db_type)
            .or_else(|| self.find(version))
    }

    /// Keep the last `n` migrations
    pub fn retain_last(&mut self, n: usize) {
        if self.migrations.len() > n {
            self.migrations.drain(..self.migrations.len() - n);
        }
    }

    /// Keep the first `n` migrations
    pub fn truncate(&mut self, n: usize) {
        self.migrations.truncate(n);
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Migration> {
        self.migrations.iter()
    }

    pub fn versions(&self) -> Vec<&str> {
        self.migrations.iter().map(|m| m.version.as_str()).collect()
    }
}

impl<'a> IntoIterator for &'a MigrationSet {
    type Item = &'a Migration;
    type IntoIter = std::slice::Iter<'a, Migration>;

    fn into_iter(self) -> Self::IntoIter {
        self.migrations.iter()
    }
}
