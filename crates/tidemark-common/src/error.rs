use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error type returned by a migration's up or down operation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid migration: {0}")]
    Validation(String),

    /// An up or down operation failed. The operation's own error is kept as is.
    #[error("{0}")]
    Operation(BoxError),

    #[error("storage error: {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    /// The run was cancelled through its `CancelHandle` and rolled back.
    #[error("migration run cancelled")]
    Cancelled,

    #[error("no migrations to roll back")]
    NothingToRevert,

    #[error("migration (version={version}, description={description}) is not applied")]
    NotApplied { version: u64, description: String },

    #[error("applied version {0} has no matching migration")]
    UnknownVersion(u64),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap a ledger or connection failure with a short description of what was attempted.
    pub fn storage(context: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::Storage {
            context: context.into(),
            source,
        }
    }

    /// Returns the underlying SQLite error for storage failures.
    pub fn sqlite_error(&self) -> Option<&rusqlite::Error> {
        match self {
            Self::Storage { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Whether this is a UNIQUE (or other) constraint violation raised by SQLite.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self.sqlite_error(),
            Some(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}
