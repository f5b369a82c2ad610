use std::fmt;

use rusqlite::Transaction;
use tidemark_common::{BoxError, Error, Result};

/// A single step of a migration, run against the open transaction.
pub type Operation =
    Box<dyn Fn(&Transaction<'_>) -> std::result::Result<(), BoxError> + Send + Sync>;

/// A versioned, named pair of reversible schema operations.
///
/// Both operations are optional at construction so that a record missing one
/// can be reported by the migrator instead of being silently accepted.
pub struct Migration {
    pub version: u64,
    pub description: String,
    pub up: Option<Operation>,
    pub down: Option<Operation>,
}

impl Migration {
    pub fn new(version: u64, description: impl Into<String>) -> Self {
        Self {
            version,
            description: description.into(),
            up: None,
            down: None,
        }
    }

    /// Migration whose operations execute the given SQL batches.
    pub fn sql(
        version: u64,
        description: impl Into<String>,
        up_sql: impl Into<String>,
        down_sql: impl Into<String>,
    ) -> Self {
        Self::new(version, description)
            .with_up(sql_operation(up_sql.into()))
            .with_down(sql_operation(down_sql.into()))
    }

    pub fn with_up<F>(mut self, op: F) -> Self
    where
        F: Fn(&Transaction<'_>) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.up = Some(Box::new(op));
        self
    }

    pub fn with_down<F>(mut self, op: F) -> Self
    where
        F: Fn(&Transaction<'_>) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.down = Some(Box::new(op));
        self
    }

    /// Structural checks a record must pass before any of its operations may run.
    pub fn validate(&self) -> Result<()> {
        if self.version == 0 || self.description.is_empty() {
            return Err(Error::Validation(format!(
                "version and description must be set (version={}, description={:?})",
                self.version, self.description
            )));
        }
        if self.up.is_none() || self.down.is_none() {
            return Err(Error::Validation(format!(
                "up and down must be set (version={}, description={})",
                self.version, self.description
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("description", &self.description)
            .field("up", &self.up.is_some())
            .field("down", &self.down.is_some())
            .finish()
    }
}

pub(crate) fn sql_operation(
    sql: String,
) -> impl Fn(&Transaction<'_>) -> std::result::Result<(), BoxError> + Send + Sync + 'static {
    move |tx| tx.execute_batch(&sql).map_err(BoxError::from)
}

/// The caller-owned collection of migrations a [`crate::Migrator`] works through.
#[derive(Debug, Default)]
pub struct Migrations {
    items: Vec<Migration>,
}

impl Migrations {
    pub fn new(items: Vec<Migration>) -> Self {
        Self { items }
    }

    pub fn push(&mut self, migration: Migration) {
        self.items.push(migration);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Migrations in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Migration> {
        self.items.iter()
    }

    /// A fresh view of the migrations ordered by ascending version.
    ///
    /// Recomputed on every call; the underlying collection is left untouched.
    pub fn sorted(&self) -> Vec<&Migration> {
        let mut sorted: Vec<&Migration> = self.items.iter().collect();
        sorted.sort_by_key(|m| m.version);
        sorted
    }

    pub fn get(&self, version: u64) -> Option<&Migration> {
        self.items.iter().find(|m| m.version == version)
    }
}

impl From<Vec<Migration>> for Migrations {
    fn from(items: Vec<Migration>) -> Self {
        Self::new(items)
    }
}

impl FromIterator<Migration> for Migrations {
    fn from_iter<I: IntoIterator<Item = Migration>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl Extend<Migration> for Migrations {
    fn extend<I: IntoIterator<Item = Migration>>(&mut self, iter: I) {
        self.items.extend(iter);
    }
}

impl<'a> IntoIterator for &'a Migrations {
    type Item = &'a Migration;
    type IntoIter = std::slice::Iter<'a, Migration>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &Transaction<'_>) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    fn runnable(version: u64, description: &str) -> Migration {
        Migration::new(version, description)
            .with_up(noop)
            .with_down(noop)
    }

    #[test]
    fn sorted_orders_by_version() {
        let migrations = Migrations::new(vec![
            runnable(1, "first migration"),
            runnable(4, "fourth migration"),
            runnable(3, "third migration"),
            runnable(5, "fifth migration"),
            runnable(2, "second migration"),
        ]);

        let versions: Vec<u64> = migrations.sorted().iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn sorted_is_repeatable_and_leaves_source_order() {
        let migrations: Migrations = [30, 10, 20]
            .into_iter()
            .map(|v| runnable(v, &format!("m{v}")))
            .collect();

        let first: Vec<u64> = migrations.sorted().iter().map(|m| m.version).collect();
        let second: Vec<u64> = migrations.sorted().iter().map(|m| m.version).collect();
        assert_eq!(first, vec![10, 20, 30]);
        assert_eq!(first, second);

        let original: Vec<u64> = migrations.iter().map(|m| m.version).collect();
        assert_eq!(original, vec![30, 10, 20]);
    }

    #[test]
    fn sorted_reflects_later_pushes() {
        let mut migrations = Migrations::new(vec![runnable(2, "two")]);
        assert_eq!(migrations.sorted()[0].version, 2);

        migrations.push(runnable(1, "one"));
        let versions: Vec<u64> = migrations.sorted().iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[test]
    fn validate_rejects_missing_version_or_description() {
        assert!(matches!(
            runnable(0, "zero").validate(),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            runnable(1, "").validate(),
            Err(Error::Validation(_))
        ));
        assert!(runnable(1, "ok").validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_operations() {
        let no_down = Migration::new(1, "no down").with_up(noop);
        let no_up = Migration::new(2, "no up").with_down(noop);
        let neither = Migration::new(3, "neither");

        for m in [no_down, no_up, neither] {
            let err = m.validate().unwrap_err();
            assert!(err.to_string().contains("up and down must be set"));
        }
    }

    #[test]
    fn debug_output_hides_closures() {
        let m = Migration::new(7, "seven").with_up(noop);
        let debug = format!("{m:?}");
        assert!(debug.contains("version: 7"));
        assert!(debug.contains("up: true"));
        assert!(debug.contains("down: false"));
    }

    #[test]
    fn get_finds_by_version_value() {
        let migrations = Migrations::new(vec![runnable(10, "ten"), runnable(20, "twenty")]);
        assert_eq!(migrations.get(20).map(|m| m.description.as_str()), Some("twenty"));
        assert!(migrations.get(2).is_none());
        assert_eq!(migrations.len(), 2);
        assert!(!migrations.is_empty());
    }
}
