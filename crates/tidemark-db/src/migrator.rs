use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rusqlite::{Connection, InterruptHandle, OpenFlags, Transaction, TransactionBehavior};
use serde::Serialize;
use tidemark_common::{Error, IdentValidator, Result};
use tracing::{info, warn};

use crate::ledger::Ledger;
use crate::migration::{Migration, Migrations, Operation};

pub const DEFAULT_MIGRATION_TABLE: &str = "migrations";

/// Outcome of a successful [`Migrator::migrate_up`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpReport {
    /// Versions applied by this run, ascending.
    pub applied: Vec<u64>,
    /// Versions that were already in the ledger.
    pub skipped: Vec<u64>,
}

/// Outcome of a successful [`Migrator::migrate_down`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownReport {
    /// Versions reverted by this run, most recent first.
    pub reverted: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationState {
    Pending,
    Applied,
    /// Present in the ledger but not in the migration set.
    Orphaned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub version: u64,
    pub description: String,
    pub state: MigrationState,
}

/// Cancels an in-flight `migrate_up` / `migrate_down` from another thread or
/// from inside an operation.
///
/// A cancel interrupts the statement running at that moment and is also
/// checked before and after every operation and before commit, so a run that
/// sees it fails with [`Error::Cancelled`] and rolls back. The request is
/// consumed by the run that observes it. A cancel issued while no run is in
/// progress aborts the next run.
#[derive(Clone)]
pub struct CancelHandle {
    requested: Arc<AtomicBool>,
    interrupt: Arc<InterruptHandle>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.interrupt.interrupt();
    }

    pub fn is_cancelled(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("requested", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Applies and reverts a [`Migrations`] set against one SQLite connection.
///
/// Each `migrate_up` / `migrate_down` call runs in a single transaction. Any
/// error drops the transaction before commit, so the schema and the ledger are
/// left exactly as they were before the call.
#[derive(Debug)]
pub struct Migrator<'m> {
    conn: Connection,
    table: String,
    migrations: &'m Migrations,
    cancel: CancelHandle,
}

impl<'m> Migrator<'m> {
    pub fn open(db_path: impl AsRef<Path>, migrations: &'m Migrations) -> Result<Self> {
        let db_path = db_path.as_ref();
        info!("opening database at {}", db_path.display());
        let conn = Connection::open(db_path).map_err(|e| {
            Error::storage(
                format!("failed to open database at {}", db_path.display()),
                e,
            )
        })?;
        Ok(Self::with_connection(conn, migrations))
    }

    /// Like [`Migrator::open`], but fails instead of creating a missing file.
    pub fn open_existing(db_path: impl AsRef<Path>, migrations: &'m Migrations) -> Result<Self> {
        let db_path = db_path.as_ref();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(db_path, flags).map_err(|e| {
            Error::storage(
                format!("failed to open existing database at {}", db_path.display()),
                e,
            )
        })?;
        Ok(Self::with_connection(conn, migrations))
    }

    pub fn in_memory(migrations: &'m Migrations) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::storage("failed to open in-memory database", e))?;
        Ok(Self::with_connection(conn, migrations))
    }

    /// Use a connection the caller already opened and configured.
    pub fn with_connection(conn: Connection, migrations: &'m Migrations) -> Self {
        let cancel = CancelHandle {
            requested: Arc::new(AtomicBool::new(false)),
            interrupt: Arc::new(conn.get_interrupt_handle()),
        };
        Self {
            conn,
            table: DEFAULT_MIGRATION_TABLE.to_string(),
            migrations,
            cancel,
        }
    }

    /// Record applied migrations in `table` instead of `migrations`.
    ///
    /// Existing rows in the previous table are not carried over.
    pub fn with_migration_table(mut self, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        IdentValidator::validate_table_name(&table)?;
        self.table = table;
        Ok(self)
    }

    pub fn migration_table(&self) -> &str {
        &self.table
    }

    pub fn migrations(&self) -> &'m Migrations {
        self.migrations
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }

    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| Error::storage("failed to close database", e))
    }

    /// Apply every migration not yet in the ledger, in ascending version order.
    pub fn migrate_up(&mut self) -> Result<UpReport> {
        let ledger = Ledger::new(&self.table);
        let sorted = self.migrations.sorted();
        validate_all(&sorted)?;

        let cancel = self.cancel.clone();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::storage("failed to begin transaction", e))?;

        let report = apply_up(&tx, ledger, &sorted, &cancel).map_err(|e| cancel.resolve(e))?;

        cancel.checkpoint()?;
        tx.commit()
            .map_err(|e| cancel.resolve(Error::storage("failed to commit migrations", e)))?;
        Ok(report)
    }

    /// Revert the `amount` most recently applied migrations, newest first.
    ///
    /// Asking for more than are applied reverts all of them. Fails with
    /// [`Error::NothingToRevert`] when the ledger is empty.
    pub fn migrate_down(&mut self, amount: usize) -> Result<DownReport> {
        let ledger = Ledger::new(&self.table);
        let sorted = self.migrations.sorted();
        validate_all(&sorted)?;

        let cancel = self.cancel.clone();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::storage("failed to begin transaction", e))?;

        let report =
            apply_down(&tx, ledger, &sorted, amount, &cancel).map_err(|e| cancel.resolve(e))?;

        cancel.checkpoint()?;
        tx.commit()
            .map_err(|e| cancel.resolve(Error::storage("failed to commit rollback", e)))?;
        Ok(report)
    }

    /// Highest applied version, or 0 if nothing has been applied yet.
    ///
    /// Read-only: a database without a ledger table reports 0 and is left as is.
    pub fn current_version(&self) -> Result<u64> {
        let ledger = Ledger::new(&self.table);
        if !ledger.exists(&self.conn)? {
            return Ok(0);
        }
        ledger.latest(&self.conn)
    }

    /// Every known migration with its state, plus ledger rows that no longer
    /// have a matching migration.
    pub fn status(&self) -> Result<Vec<MigrationStatus>> {
        let ledger = Ledger::new(&self.table);
        let entries = if ledger.exists(&self.conn)? {
            ledger.entries(&self.conn)?
        } else {
            Vec::new()
        };

        let mut statuses: Vec<MigrationStatus> = self
            .migrations
            .sorted()
            .into_iter()
            .map(|m| MigrationStatus {
                version: m.version,
                description: m.description.clone(),
                state: if entries.iter().any(|e| e.version == m.version) {
                    MigrationState::Applied
                } else {
                    MigrationState::Pending
                },
            })
            .collect();

        for entry in entries {
            if self.migrations.get(entry.version).is_none() {
                warn!(
                    "ledger has version {} ({}) with no matching migration",
                    entry.version, entry.description
                );
                statuses.push(MigrationStatus {
                    version: entry.version,
                    description: entry.description,
                    state: MigrationState::Orphaned,
                });
            }
        }

        statuses.sort_by_key(|s| s.version);
        Ok(statuses)
    }
}

impl CancelHandle {
    /// Fail with [`Error::Cancelled`] if a cancel is pending, consuming it.
    fn checkpoint(&self) -> Result<()> {
        if self.requested.swap(false, Ordering::SeqCst) {
            warn!("migration run cancelled, rolling back");
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// An interrupted statement surfaces as whatever error the failing step
    /// produced; report it as a cancellation when one was requested.
    fn resolve(&self, err: Error) -> Error {
        match self.checkpoint() {
            Err(cancelled) => cancelled,
            Ok(()) => err,
        }
    }
}

fn apply_up(
    tx: &Transaction<'_>,
    ledger: Ledger<'_>,
    sorted: &[&Migration],
    cancel: &CancelHandle,
) -> Result<UpReport> {
    cancel.checkpoint()?;
    ledger.ensure_table(tx)?;
    let index = ledger.index(tx)?;

    let mut report = UpReport::default();
    for &migration in sorted {
        let up = operations(migration)?.0;

        if index.contains(&migration.version) {
            info!(
                "skipping migration (version={}, description={}) already applied",
                migration.version, migration.description
            );
            report.skipped.push(migration.version);
            continue;
        }

        cancel.checkpoint()?;
        up(tx).map_err(Error::Operation)?;
        cancel.checkpoint()?;
        ledger.insert(tx, migration.version, &migration.description)?;

        info!(
            "migration up (version={}, description={})",
            migration.version, migration.description
        );
        report.applied.push(migration.version);
    }
    Ok(report)
}

fn apply_down(
    tx: &Transaction<'_>,
    ledger: Ledger<'_>,
    sorted: &[&Migration],
    amount: usize,
    cancel: &CancelHandle,
) -> Result<DownReport> {
    cancel.checkpoint()?;
    ledger.ensure_table(tx)?;
    let index = ledger.index(tx)?;

    if index.is_empty() {
        return Err(Error::NothingToRevert);
    }
    let amount = amount.min(index.len());

    let mut report = DownReport::default();
    for &version in index.iter().rev().take(amount) {
        let migration = sorted
            .iter()
            .copied()
            .find(|m| m.version == version)
            .ok_or(Error::UnknownVersion(version))?;
        let down = operations(migration)?.1;

        if !index.contains(&migration.version) {
            return Err(Error::NotApplied {
                version: migration.version,
                description: migration.description.clone(),
            });
        }

        cancel.checkpoint()?;
        down(tx).map_err(Error::Operation)?;
        cancel.checkpoint()?;
        ledger.delete(tx, migration.version)?;

        info!(
            "migration down (version={}, description={})",
            migration.version, migration.description
        );
        report.reverted.push(migration.version);
    }
    Ok(report)
}

/// Reject the whole run before anything executes if any record is malformed.
fn validate_all(sorted: &[&Migration]) -> Result<()> {
    for migration in sorted {
        migration.validate()?;
    }
    Ok(())
}

/// Both operations of a record, or the validation error for a missing one.
fn operations(migration: &Migration) -> Result<(&Operation, &Operation)> {
    match (migration.up.as_ref(), migration.down.as_ref()) {
        (Some(up), Some(down)) => Ok((up, down)),
        _ => Err(Error::Validation(format!(
            "up and down must be set (version={}, description={})",
            migration.version, migration.description
        ))),
    }
}
