use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tidemark_common::{Error, Result};
use tracing::debug;

/// One applied migration as recorded in the ledger table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub version: u64,
    pub description: String,
}

/// Persisted record of which migration versions have been applied.
///
/// Every method takes the connection explicitly so the migrator can run them
/// inside its own transaction (`Transaction` derefs to `Connection`).
#[derive(Debug, Clone, Copy)]
pub struct Ledger<'t> {
    table: &'t str,
}

impl<'t> Ledger<'t> {
    /// `table` must already have passed `IdentValidator::validate_table_name`.
    pub fn new(table: &'t str) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &str {
        self.table
    }

    /// Create the ledger table if it is missing. Safe to call on every run.
    pub fn ensure_table(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                version INTEGER UNIQUE NOT NULL,
                description VARCHAR(255) UNIQUE NOT NULL
            );",
            self.table
        ))
        .map_err(|e| Error::storage(format!("failed to create ledger table {}", self.table), e))?;
        Ok(())
    }

    pub fn exists(&self, conn: &Connection) -> Result<bool> {
        conn.query_row(
            "SELECT count(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
            params![self.table],
            |row| row.get(0),
        )
        .map_err(|e| Error::storage("failed to check ledger table", e))
    }

    /// Applied versions in ascending order.
    pub fn index(&self, conn: &Connection) -> Result<Vec<u64>> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT version FROM \"{}\" ORDER BY version ASC",
                self.table
            ))
            .map_err(|e| Error::storage("failed to prepare ledger query", e))?;

        let rows = stmt
            .query_map([], |row| row.get::<_, u64>(0))
            .map_err(|e| Error::storage("failed to read ledger", e))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::storage("failed to read ledger row", e))
    }

    /// Full ledger rows ordered by version.
    pub fn entries(&self, conn: &Connection) -> Result<Vec<LedgerEntry>> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT version, description FROM \"{}\" ORDER BY version ASC",
                self.table
            ))
            .map_err(|e| Error::storage("failed to prepare ledger query", e))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(LedgerEntry {
                    version: row.get(0)?,
                    description: row.get(1)?,
                })
            })
            .map_err(|e| Error::storage("failed to read ledger", e))?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(|e| Error::storage("failed to read ledger row", e))?);
        }
        Ok(entries)
    }

    /// Highest applied version, or 0 when nothing has been applied.
    pub fn latest(&self, conn: &Connection) -> Result<u64> {
        let version: Option<u64> = conn
            .query_row(
                &format!(
                    "SELECT version FROM \"{}\" ORDER BY version DESC LIMIT 1",
                    self.table
                ),
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::storage("failed to read current version", e))?;
        Ok(version.unwrap_or(0))
    }

    /// Record a migration as applied. A duplicate version or description
    /// surfaces as the constraint violation SQLite reports.
    pub fn insert(&self, conn: &Connection, version: u64, description: &str) -> Result<()> {
        conn.execute(
            &format!(
                "INSERT INTO \"{}\" (version, description) VALUES (?1, ?2)",
                self.table
            ),
            params![version, description],
        )
        .map_err(|e| {
            Error::storage(
                format!("failed to record migration (version={version}, description={description})"),
                e,
            )
        })?;
        debug!("ledger insert version={version}");
        Ok(())
    }

    pub fn delete(&self, conn: &Connection, version: u64) -> Result<()> {
        let removed = conn
            .execute(
                &format!("DELETE FROM \"{}\" WHERE version = ?1", self.table),
                params![version],
            )
            .map_err(|e| Error::storage(format!("failed to remove migration {version}"), e))?;
        debug!("ledger delete version={version} (rows={removed})");
        Ok(())
    }
}
