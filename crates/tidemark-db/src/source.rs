//! Loading migrations from a directory of SQL files.
//!
//! Each file is named `<version>_<description>.sql`, e.g.
//! `0002_create_posts.sql`, and holds an `-- up` section followed by a
//! `-- down` section:
//!
//! ```sql
//! -- up
//! CREATE TABLE posts (id INTEGER PRIMARY KEY, title TEXT);
//!
//! -- down
//! DROP TABLE posts;
//! ```
//!
//! Underscores in the description part become spaces. A file that lacks one of
//! the sections produces a migration without that operation, which the
//! migrator refuses to run.

use std::path::Path;

use tidemark_common::{Error, Result};
use tracing::debug;

use crate::migration::{Migration, Migrations, sql_operation};

impl Migrations {
    /// Load every `*.sql` file in `dir` as a migration. Other files are ignored.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut migrations = Migrations::default();
        for path in paths {
            migrations.push(parse_migration_file(&path)?);
        }
        debug!("loaded {} migrations from {}", migrations.len(), dir.display());
        Ok(migrations)
    }
}

/// Parse a single `<version>_<description>.sql` file.
pub fn parse_migration_file(path: &Path) -> Result<Migration> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Validation(format!("invalid file name: {}", path.display())))?;
    let (version, description) = parse_file_stem(stem)?;

    let content = std::fs::read_to_string(path)?;
    let (up_sql, down_sql) = parse_sections(&content);

    let mut migration = Migration::new(version, description);
    if let Some(sql) = up_sql {
        migration = migration.with_up(sql_operation(sql));
    }
    if let Some(sql) = down_sql {
        migration = migration.with_down(sql_operation(sql));
    }
    Ok(migration)
}

fn parse_file_stem(stem: &str) -> Result<(u64, String)> {
    let (version, description) = stem.split_once('_').ok_or_else(|| {
        Error::Validation(format!(
            "migration file {stem:?} must be named <version>_<description>.sql"
        ))
    })?;

    let version: u64 = version.parse().map_err(|_| {
        Error::Validation(format!("migration file {stem:?} has a non-numeric version"))
    })?;

    Ok((version, description.replace('_', " ").trim().to_string()))
}

/// Split file content into its `-- up` and `-- down` sections.
///
/// A marker is a line that is exactly `-- up` or `-- down` once trimmed, in any
/// case. Other comments, including ones that start with those words, stay in
/// their section. A section is `None` when its marker is absent. Lines before
/// the first marker are ignored.
fn parse_sections(content: &str) -> (Option<String>, Option<String>) {
    enum Section {
        Preamble,
        Up,
        Down,
    }

    let mut up: Option<Vec<&str>> = None;
    let mut down: Option<Vec<&str>> = None;
    let mut current = Section::Preamble;

    for line in content.lines() {
        let marker = line.trim().to_ascii_lowercase();
        if marker == "-- up" {
            current = Section::Up;
            up.get_or_insert_with(Vec::new);
            continue;
        }
        if marker == "-- down" {
            current = Section::Down;
            down.get_or_insert_with(Vec::new);
            continue;
        }

        match current {
            Section::Preamble => {}
            Section::Up => up.get_or_insert_with(Vec::new).push(line),
            Section::Down => down.get_or_insert_with(Vec::new).push(line),
        }
    }

    let join = |lines: Vec<&str>| lines.join("\n").trim().to_string();
    (up.map(join), down.map(join))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn file_stem_gives_version_and_description() {
        assert_eq!(
            parse_file_stem("0002_create_posts").unwrap(),
            (2, "create posts".to_string())
        );
        assert_eq!(
            parse_file_stem("17_add_index_on_email").unwrap(),
            (17, "add index on email".to_string())
        );
    }

    #[test]
    fn malformed_file_stems_are_rejected() {
        assert!(parse_file_stem("create_posts").is_err());
        assert!(parse_file_stem("0003").is_err());
        assert!(parse_file_stem("v3_create").is_err());
    }

    #[test]
    fn sections_are_split_on_markers() {
        let content = "-- Migration: create posts\n\
                       -- up\n\
                       CREATE TABLE posts (id INTEGER);\n\
                       CREATE INDEX idx ON posts(id);\n\
                       \n\
                       -- Down\n\
                       DROP TABLE posts;\n";
        let (up, down) = parse_sections(content);
        assert_eq!(
            up.as_deref(),
            Some("CREATE TABLE posts (id INTEGER);\nCREATE INDEX idx ON posts(id);")
        );
        assert_eq!(down.as_deref(), Some("DROP TABLE posts;"));
    }

    #[test]
    fn comments_starting_with_up_or_down_stay_in_their_section() {
        let content = "-- up\n\
                       CREATE TABLE a (id INTEGER);\n\
                       -- down the line we may split this\n\
                       CREATE TABLE b (id INTEGER);\n\
                       -- down\n\
                       -- up next: drop b before a\n\
                       DROP TABLE b;\n\
                       DROP TABLE a;\n";
        let (up, down) = parse_sections(content);
        assert_eq!(
            up.as_deref(),
            Some(
                "CREATE TABLE a (id INTEGER);\n\
                 -- down the line we may split this\n\
                 CREATE TABLE b (id INTEGER);"
            )
        );
        assert_eq!(
            down.as_deref(),
            Some("-- up next: drop b before a\nDROP TABLE b;\nDROP TABLE a;")
        );
    }

    #[test]
    fn missing_marker_leaves_section_empty() {
        let (up, down) = parse_sections("-- up\nCREATE TABLE t (id INTEGER);\n");
        assert!(up.is_some());
        assert!(down.is_none());
    }

    #[test]
    fn marker_with_no_statements_is_an_explicit_no_op() {
        let (up, down) = parse_sections("-- up\nSELECT 1;\n-- down\n");
        assert_eq!(up.as_deref(), Some("SELECT 1;"));
        assert_eq!(down.as_deref(), Some(""));
    }

    #[test]
    fn from_dir_loads_sql_files_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("0002_create_posts.sql"),
            "-- up\nCREATE TABLE posts (id INTEGER);\n-- down\nDROP TABLE posts;\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("0001_create_users.sql"),
            "-- up\nCREATE TABLE users (id INTEGER);\n-- down\nDROP TABLE users;\n",
        )
        .unwrap();
        fs::write(dir.path().join("README.md"), "not a migration").unwrap();

        let migrations = Migrations::from_dir(dir.path()).unwrap();
        assert_eq!(migrations.len(), 2);

        let sorted = migrations.sorted();
        assert_eq!(sorted[0].version, 1);
        assert_eq!(sorted[0].description, "create users");
        assert!(sorted[0].validate().is_ok());
        assert_eq!(sorted[1].description, "create posts");
    }

    #[test]
    fn from_dir_rejects_badly_named_sql_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("create_users.sql"), "-- up\n-- down\n").unwrap();

        let err = Migrations::from_dir(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn from_dir_on_missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Migrations::from_dir(dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
