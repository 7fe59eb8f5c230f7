use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use deadpool::managed::{Manager, Metrics, RecycleError, RecycleResult};
use rusqlite::OpenFlags;

use super::connection::SqliteConnection;
use crate::error::SqliteMiddlewareError;
use crate::pool::ConfigAndPool;

/// Options for configuring a `SQLite` pool.
///
/// Every field has a default (see [`SqliteOptions::new`]); an in-memory or
/// anonymous `db_path` pins the pool to a single connection regardless of
/// `min`/`max`, since each connection would otherwise see its own database.
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    pub db_path: String,
    /// Open flags; `OpenFlags::default()` is read/write/create/URI/no-mutex.
    pub mode: OpenFlags,
    /// Log every SQL text at debug level under `sqlite_middleware::sql`.
    pub verbose: bool,
    pub busy_timeout: Duration,
    pub foreign_keys: bool,
    pub wal_mode: bool,
    /// Extension libraries loaded, in order, into every new connection.
    pub load_extensions: Vec<PathBuf>,
    pub min: usize,
    pub max: usize,
    pub acquire_timeout: Duration,
    /// Default for transactions: `BEGIN IMMEDIATE` when true, `BEGIN` otherwise.
    pub trx_immediate: bool,
    /// Return released connections to the pool on the next scheduler tick.
    pub delay_release: bool,
}

impl SqliteOptions {
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            db_path,
            mode: OpenFlags::default(),
            verbose: false,
            busy_timeout: Duration::from_millis(1000),
            foreign_keys: true,
            wal_mode: true,
            load_extensions: Vec::new(),
            min: 1,
            max: 4,
            acquire_timeout: Duration::from_millis(1000),
            trx_immediate: true,
            delay_release: true,
        }
    }

    /// True for `:memory:`, the anonymous (empty) path and memory URIs.
    #[must_use]
    pub fn is_memory(&self) -> bool {
        let path = self.db_path.trim();
        path.is_empty()
            || path == ":memory:"
            || path.starts_with("file::memory:")
            || path.contains("mode=memory")
    }

    /// Effective `(min, max)` pool bounds.
    #[must_use]
    pub fn pool_bounds(&self) -> (usize, usize) {
        if self.is_memory() {
            return (1, 1);
        }
        let max = self.max.max(1);
        (self.min.min(max), max)
    }
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self::new(":memory:".into())
    }
}

/// Fluent builder for `SQLite` options.
#[derive(Debug, Clone)]
pub struct SqliteOptionsBuilder {
    opts: SqliteOptions,
}

impl SqliteOptionsBuilder {
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            opts: SqliteOptions::new(db_path),
        }
    }

    #[must_use]
    pub fn mode(mut self, mode: OpenFlags) -> Self {
        self.opts.mode = mode;
        self
    }

    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.opts.verbose = verbose;
        self
    }

    #[must_use]
    pub fn busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.opts.busy_timeout = busy_timeout;
        self
    }

    #[must_use]
    pub fn foreign_keys(mut self, foreign_keys: bool) -> Self {
        self.opts.foreign_keys = foreign_keys;
        self
    }

    #[must_use]
    pub fn wal_mode(mut self, wal_mode: bool) -> Self {
        self.opts.wal_mode = wal_mode;
        self
    }

    #[must_use]
    pub fn load_extension(mut self, path: impl Into<PathBuf>) -> Self {
        self.opts.load_extensions.push(path.into());
        self
    }

    #[must_use]
    pub fn min(mut self, min: usize) -> Self {
        self.opts.min = min;
        self
    }

    #[must_use]
    pub fn max(mut self, max: usize) -> Self {
        self.opts.max = max;
        self
    }

    #[must_use]
    pub fn acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.opts.acquire_timeout = acquire_timeout;
        self
    }

    #[must_use]
    pub fn trx_immediate(mut self, trx_immediate: bool) -> Self {
        self.opts.trx_immediate = trx_immediate;
        self
    }

    #[must_use]
    pub fn delay_release(mut self, delay_release: bool) -> Self {
        self.opts.delay_release = delay_release;
        self
    }

    #[must_use]
    pub fn finish(self) -> SqliteOptions {
        self.opts
    }

    /// Build a `ConfigAndPool` for `SQLite`.
    ///
    /// # Errors
    ///
    /// Returns `SqliteMiddlewareError` if the pool cannot be built or one of
    /// its first `min` connections cannot be opened.
    pub async fn build(self) -> Result<ConfigAndPool, SqliteMiddlewareError> {
        ConfigAndPool::new_sqlite(self.finish()).await
    }
}

/// deadpool manager creating configured `SQLite` connections.
#[derive(Debug)]
pub struct SqliteManager {
    options: Arc<SqliteOptions>,
}

impl SqliteManager {
    #[must_use]
    pub fn new(options: Arc<SqliteOptions>) -> Self {
        Self { options }
    }
}

impl Manager for SqliteManager {
    type Type = SqliteConnection;
    type Error = SqliteMiddlewareError;

    async fn create(&self) -> Result<SqliteConnection, SqliteMiddlewareError> {
        let options = Arc::clone(&self.options);
        let conn = tokio::task::spawn_blocking(move || open_connection(&options))
            .await
            .map_err(|e| {
                SqliteMiddlewareError::ConnectionError(format!("sqlite open join error: {e}"))
            })??;
        tracing::debug!(path = %self.options.db_path, "sqlite connection opened");
        Ok(SqliteConnection::new(
            conn,
            self.options.trx_immediate,
            self.options.verbose,
        ))
    }

    async fn recycle(
        &self,
        conn: &mut SqliteConnection,
        _metrics: &Metrics,
    ) -> RecycleResult<SqliteMiddlewareError> {
        if conn.is_broken() {
            return Err(RecycleError::Backend(SqliteMiddlewareError::ConnectionError(
                "connection marked broken".into(),
            )));
        }
        if conn.in_transaction() {
            return Err(RecycleError::Backend(SqliteMiddlewareError::ConnectionError(
                "connection returned with an open transaction".into(),
            )));
        }
        Ok(())
    }
}

/// Open one connection and apply the configured PRAGMA sequence.
///
/// # Errors
/// Any failing step aborts creation with its error.
pub(crate) fn open_connection(
    options: &SqliteOptions,
) -> Result<rusqlite::Connection, SqliteMiddlewareError> {
    let conn = rusqlite::Connection::open_with_flags(&options.db_path, options.mode)?;
    conn.busy_timeout(options.busy_timeout)?;
    load_extensions(&conn, &options.load_extensions)?;
    conn.pragma_update(None, "foreign_keys", options.foreign_keys)?;
    if options.wal_mode {
        // Memory and anonymous databases cannot switch to WAL and keep
        // "memory" or "delete".
        let journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
        if !journal_mode.eq_ignore_ascii_case("wal") && !options.is_memory() {
            return Err(SqliteMiddlewareError::ConfigError(format!(
                "failed to set WAL journal mode, got: {journal_mode}"
            )));
        }
    }
    Ok(conn)
}

#[cfg(feature = "load-extensions")]
#[allow(unsafe_code)]
fn load_extensions(
    conn: &rusqlite::Connection,
    paths: &[PathBuf],
) -> Result<(), SqliteMiddlewareError> {
    if paths.is_empty() {
        return Ok(());
    }
    // SAFETY: extension paths come from the pool options supplied by the
    // application; loading is re-disabled when the guard drops.
    unsafe {
        let _guard = rusqlite::LoadExtensionGuard::new(conn)?;
        for path in paths {
            tracing::debug!(extension = %path.display(), "loading sqlite extension");
            conn.load_extension(path, None)?;
        }
    }
    Ok(())
}

#[cfg(not(feature = "load-extensions"))]
fn load_extensions(
    _conn: &rusqlite::Connection,
    paths: &[PathBuf],
) -> Result<(), SqliteMiddlewareError> {
    if paths.is_empty() {
        Ok(())
    } else {
        Err(SqliteMiddlewareError::ConfigError(
            "extension loading requires the `load-extensions` feature".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_paths_are_pinned_to_one_connection() {
        for path in [":memory:", "", "file::memory:?cache=shared", "file:db?mode=memory"] {
            let opts = SqliteOptionsBuilder::new(path.into()).min(2).max(8).finish();
            assert!(opts.is_memory(), "{path} should be in-memory");
            assert_eq!(opts.pool_bounds(), (1, 1));
        }
    }

    #[test]
    fn memory_and_anonymous_paths_open_with_wal_requested() {
        for path in [":memory:", ""] {
            let opts = SqliteOptionsBuilder::new(path.into()).finish();
            assert!(opts.wal_mode);
            let conn = open_connection(&opts).unwrap();
            let mode: String = conn
                .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
                .unwrap();
            assert!(!mode.eq_ignore_ascii_case("wal"), "{path:?} reported {mode}");
        }
    }

    #[test]
    fn file_paths_keep_their_bounds() {
        let opts = SqliteOptionsBuilder::new("app.db".into()).min(6).max(3).finish();
        assert!(!opts.is_memory());
        assert_eq!(opts.pool_bounds(), (3, 3));

        let defaults = SqliteOptions::new("app.db".into());
        assert_eq!(defaults.pool_bounds(), (1, 4));
        assert_eq!(defaults.busy_timeout, Duration::from_millis(1000));
        assert!(defaults.trx_immediate && defaults.delay_release && defaults.wal_mode);
    }

    #[test]
    fn open_connection_applies_pragmas() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pragmas.db");
        let opts = SqliteOptionsBuilder::new(path.to_string_lossy().into_owned())
            .busy_timeout(Duration::from_millis(2500))
            .finish();
        let conn = open_connection(&opts).unwrap();

        let mode: String = conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
        let fk: i64 = conn
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
        let busy: i64 = conn
            .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(busy, 2500);
    }

    #[test]
    fn missing_extension_aborts_creation() {
        let opts = SqliteOptionsBuilder::new(":memory:".into())
            .load_extension("/nonexistent/extension.so")
            .finish();
        assert!(open_connection(&opts).is_err());
    }
}
