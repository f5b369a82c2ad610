use std::sync::LazyLock;

use regex::Regex;

use crate::{Error, Result};

/// Longest identifier accepted for the ledger table.
pub const MAX_IDENTIFIER_LEN: usize = 64;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

/// Validation for names that get interpolated into SQL text.
pub struct IdentValidator;

impl IdentValidator {
    /// Validate that a table name is a plain SQL identifier.
    ///
    /// Table names cannot be bound as statement parameters, so anything
    /// outside `[A-Za-z_][A-Za-z0-9_]*` is rejected before it reaches SQLite.
    pub fn validate_table_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::Config("migration table name cannot be empty".into()));
        }
        if name.len() > MAX_IDENTIFIER_LEN {
            return Err(Error::Config(format!(
                "migration table name too long ({} > {MAX_IDENTIFIER_LEN})",
                name.len()
            )));
        }
        if !IDENTIFIER.is_match(name) {
            return Err(Error::Config(format!(
                "migration table name {name:?} is not a valid identifier"
            )));
        }
        if name.to_ascii_lowercase().starts_with("sqlite_") {
            return Err(Error::Config(format!(
                "migration table name {name:?} uses the reserved sqlite_ prefix"
            )));
        }
        Ok(())
    }
}
