//! Versioned, transactional schema migrations for SQLite.
//!
//! ```no_run
//! use tidemark_db::{Migration, Migrations, Migrator};
//!
//! let migrations = Migrations::new(vec![
//!     Migration::sql(
//!         1,
//!         "create users",
//!         "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);",
//!         "DROP TABLE users;",
//!     ),
//!     Migration::new(2, "seed admin")
//!         .with_up(|tx| {
//!             tx.execute("INSERT INTO users (name) VALUES ('admin')", [])?;
//!             Ok(())
//!         })
//!         .with_down(|tx| {
//!             tx.execute("DELETE FROM users WHERE name = 'admin'", [])?;
//!             Ok(())
//!         }),
//! ]);
//!
//! let mut migrator = Migrator::open("app.db", &migrations)?;
//! migrator.migrate_up()?;
//! assert_eq!(migrator.current_version()?, 2);
//! # Ok::<(), tidemark_common::Error>(())
//! ```

pub mod ledger;
pub mod migration;
pub mod migrator;
pub mod source;

pub use ledger::{Ledger, LedgerEntry};
pub use migration::{Migration, Migrations, Operation};
pub use migrator::{
    CancelHandle, DEFAULT_MIGRATION_TABLE, DownReport, MigrationState, MigrationStatus, Migrator,
    UpReport,
};
pub use source::parse_migration_file;
