use std::path::PathBuf;
use std::time::Duration;

use deadpool::managed::{PoolError, TimeoutType};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SqliteMiddlewareError {
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?} waiting for a pooled connection")]
    AcquireTimeout(Duration),

    #[error("connection pool is closed")]
    PoolClosed,

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Parameter conversion error: {0}")]
    ParameterError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("transaction currently active; operation not permitted ({0})")]
    TransactionActive(String),

    #[error("nested transactions are not supported")]
    NestedTransaction,

    #[error("transaction already completed")]
    TransactionFinished,

    /// ROLLBACK itself failed; `cause` is the error that triggered it.
    #[error("rollback failed: {source} (after: {cause})")]
    RollbackFailed {
        source: Box<SqliteMiddlewareError>,
        cause: Box<SqliteMiddlewareError>,
    },

    #[error("no migration files found in {0}")]
    NoMigrationFiles(PathBuf),

    #[error("migration file {0} has no '-- Down' section")]
    MissingDownSection(String),

    #[error("duplicate migration id {0}")]
    DuplicateMigrationId(i64),

    #[error("migration {id} ({name}) failed: {source}")]
    MigrationFailed {
        id: i64,
        name: String,
        source: Box<SqliteMiddlewareError>,
    },

    #[error("Other database error: {0}")]
    Other(String),
}

impl SqliteMiddlewareError {
    /// True when the underlying SQLite error is `SQLITE_BUSY`.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SqliteMiddlewareError::SqliteError(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::DatabaseBusy
        )
    }

    /// Map a pool checkout failure; a wait timeout reports the configured
    /// `acquire_timeout`.
    pub(crate) fn from_pool(
        err: PoolError<SqliteMiddlewareError>,
        acquire_timeout: Duration,
    ) -> Self {
        match err {
            PoolError::Backend(e) => e,
            PoolError::Closed => SqliteMiddlewareError::PoolClosed,
            PoolError::Timeout(TimeoutType::Wait) => {
                SqliteMiddlewareError::AcquireTimeout(acquire_timeout)
            }
            other => SqliteMiddlewareError::ConnectionError(format!("sqlite pool error: {other}")),
        }
    }
}
