use anyhow::{Context, Result};
use tidemark_config::AppConfig;
use tidemark_db::{MigrationState, Migrations, Migrator};
use tracing::info;

/// Open the configured database with the configured ledger table.
fn open<'m>(config: &AppConfig, migrations: &'m Migrations) -> Result<Migrator<'m>> {
    let migrator = Migrator::open(&config.database.path, migrations)
        .context("failed to open database")?
        .with_migration_table(config.database.migration_table.as_str())?;
    Ok(migrator)
}

/// Open for commands that only read. A database file that does not exist yet
/// has nothing applied, so it is stood in for by an empty in-memory database
/// instead of being created on disk.
fn open_for_reading<'m>(config: &AppConfig, migrations: &'m Migrations) -> Result<Migrator<'m>> {
    let path = &config.database.path;
    let migrator = if path.exists() {
        Migrator::open_existing(path, migrations).context("failed to open database")?
    } else {
        info!("database {} does not exist yet", path.display());
        Migrator::in_memory(migrations)?
    };
    Ok(migrator.with_migration_table(config.database.migration_table.as_str())?)
}

fn load_migrations(config: &AppConfig) -> Result<Migrations> {
    let dir = &config.migrations.dir;
    Migrations::from_dir(dir)
        .with_context(|| format!("failed to load migrations from {}", dir.display()))
}

pub fn up(config: &AppConfig) -> Result<()> {
    let migrations = load_migrations(config)?;
    let mut migrator = open(config, &migrations)?;

    let report = migrator.migrate_up()?;
    if report.applied.is_empty() {
        println!("Already up to date ({} skipped).", report.skipped.len());
    } else {
        println!(
            "Applied {} migration(s): {}",
            report.applied.len(),
            join_versions(&report.applied)
        );
    }
    println!("Current version: {}", migrator.current_version()?);
    migrator.close()?;
    Ok(())
}

pub fn down(config: &AppConfig, steps: usize) -> Result<()> {
    let migrations = load_migrations(config)?;
    let mut migrator = open(config, &migrations)?;

    let report = migrator.migrate_down(steps)?;
    println!(
        "Reverted {} migration(s): {}",
        report.reverted.len(),
        join_versions(&report.reverted)
    );
    println!("Current version: {}", migrator.current_version()?);
    migrator.close()?;
    Ok(())
}

pub fn version(config: &AppConfig) -> Result<()> {
    let migrations = Migrations::default();
    let migrator = open_for_reading(config, &migrations)?;
    println!("{}", migrator.current_version()?);
    migrator.close()?;
    Ok(())
}

pub fn status(config: &AppConfig, json: bool) -> Result<()> {
    let migrations = load_migrations(config)?;
    let migrator = open_for_reading(config, &migrations)?;
    let statuses = migrator.status()?;
    migrator.close()?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&statuses).context("failed to serialize status")?
        );
        return Ok(());
    }

    if statuses.is_empty() {
        println!("No migrations found in {}", config.migrations.dir.display());
        return Ok(());
    }

    let pending = statuses
        .iter()
        .filter(|s| s.state == MigrationState::Pending)
        .count();
    info!("{} migration(s), {pending} pending", statuses.len());

    println!("{:<10} {:<9} DESCRIPTION", "VERSION", "STATE");
    for s in &statuses {
        let state = match s.state {
            MigrationState::Applied => "applied",
            MigrationState::Pending => "pending",
            MigrationState::Orphaned => "orphaned",
        };
        println!("{:<10} {:<9} {}", s.version, state, s.description);
    }
    Ok(())
}

fn join_versions(versions: &[u64]) -> String {
    versions
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    fn workspace() -> (tempfile::TempDir, AppConfig) {
        let dir = tempfile::tempdir().unwrap();
        let sql_dir = dir.path().join("migrations");
        fs::create_dir(&sql_dir).unwrap();
        fs::write(
            sql_dir.join("0001_create_users.sql"),
            "-- up\nCREATE TABLE users (id INTEGER PRIMARY KEY);\n-- down\nDROP TABLE users;\n",
        )
        .unwrap();
        fs::write(
            sql_dir.join("0002_create_posts.sql"),
            "-- up\nCREATE TABLE posts (id INTEGER PRIMARY KEY);\n-- down\nDROP TABLE posts;\n",
        )
        .unwrap();

        let mut config = AppConfig::default();
        config.database.path = dir.path().join("app.db");
        config.migrations.dir = sql_dir;
        (dir, config)
    }

    fn current_version(config: &AppConfig) -> u64 {
        let migrations = Migrations::default();
        open(config, &migrations).unwrap().current_version().unwrap()
    }

    #[test]
    fn join_versions_formats_list() {
        assert_eq!(join_versions(&[3, 2, 1]), "3, 2, 1");
        assert_eq!(join_versions(&[]), "");
    }

    #[test]
    fn up_status_down_against_a_file_database() {
        let (_dir, config) = workspace();

        version(&config).unwrap();
        up(&config).unwrap();
        assert_eq!(current_version(&config), 2);

        status(&config, false).unwrap();
        status(&config, true).unwrap();

        down(&config, 1).unwrap();
        assert_eq!(current_version(&config), 1);
    }

    #[test]
    fn read_only_commands_leave_a_missing_database_alone() {
        let (_dir, config) = workspace();
        assert!(!config.database.path.exists());

        version(&config).unwrap();
        status(&config, false).unwrap();
        status(&config, true).unwrap();
        assert!(!config.database.path.exists());

        up(&config).unwrap();
        assert!(config.database.path.exists());
    }

    #[test]
    fn down_with_nothing_applied_fails() {
        let (_dir, config) = workspace();
        let err = down(&config, 1).unwrap_err();
        assert!(err.to_string().contains("no migrations to roll back"));
    }

    #[test]
    fn custom_table_from_config_is_used() {
        let (_dir, mut config) = workspace();
        config.database.migration_table = "schema_history".to_string();
        up(&config).unwrap();

        let migrations = Migrations::default();
        let migrator = open(&config, &migrations).unwrap();
        assert_eq!(migrator.migration_table(), "schema_history");
        assert_eq!(migrator.current_version().unwrap(), 2);
    }

    #[test]
    fn missing_migrations_dir_is_reported() {
        let (_dir, mut config) = workspace();
        config.migrations.dir = config.migrations.dir.join("missing");
        let err = up(&config).unwrap_err();
        assert!(err.to_string().contains("failed to load migrations"));
    }
}
