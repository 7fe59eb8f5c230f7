pub mod close;
pub mod connection;
pub mod interaction;
pub mod types;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use deadpool::Runtime;
use deadpool::managed::{Pool, Status};
use futures_util::future::try_join_all;

pub use connection::MiddlewarePoolConnection;
pub use types::{SqlitePool, SqlitePoolObject};

use crate::error::SqliteMiddlewareError;
use crate::sqlite::{SqliteManager, SqliteOptions, SqliteOptionsBuilder};

/// Configuration and connection pool for a `SQLite` database.
///
/// Cloning is cheap; clones share the same pool. Every SQL method acquires a
/// connection, runs one operation on it and releases it again, so consecutive
/// calls may land on different connections. Use
/// [`use_connection`](ConfigAndPool::use_connection) or a transaction to keep
/// several statements on one connection.
#[derive(Clone)]
pub struct ConfigAndPool {
    pool: SqlitePool,
    options: Arc<SqliteOptions>,
    closing: Arc<AtomicBool>,
}

impl ConfigAndPool {
    #[must_use]
    pub fn sqlite_builder(db_path: String) -> SqliteOptionsBuilder {
        SqliteOptionsBuilder::new(db_path)
    }

    /// Build the pool and open its first `min` connections.
    ///
    /// # Errors
    /// Returns `ConfigError` if the pool cannot be built, or the error of the
    /// first connection that fails to open.
    pub async fn new_sqlite(opts: SqliteOptions) -> Result<Self, SqliteMiddlewareError> {
        let (min, max) = opts.pool_bounds();
        if opts.is_memory() && opts.max != 1 {
            tracing::debug!(requested = opts.max, "in-memory database pinned to one connection");
        }
        let options = Arc::new(opts);

        let pool = Pool::builder(SqliteManager::new(Arc::clone(&options)))
            .max_size(max)
            .wait_timeout(Some(options.acquire_timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| {
                SqliteMiddlewareError::ConfigError(format!("Failed to create SQLite pool: {e}"))
            })?;

        let warm = try_join_all((0..min).map(|_| pool.get()))
            .await
            .map_err(|e| SqliteMiddlewareError::from_pool(e, options.acquire_timeout))?;
        drop(warm);
        tracing::debug!(path = %options.db_path, min, max, "sqlite pool ready");

        Ok(ConfigAndPool {
            pool,
            options,
            closing: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Check a connection out of the pool.
    ///
    /// # Errors
    /// Returns `PoolClosed` once [`close`](ConfigAndPool::close) has started,
    /// `AcquireTimeout` when no connection frees up within `acquire_timeout`,
    /// or the error raised while opening a new connection.
    pub async fn get_connection(&self) -> Result<MiddlewarePoolConnection, SqliteMiddlewareError> {
        if self.is_closing() {
            return Err(SqliteMiddlewareError::PoolClosed);
        }
        let obj = self
            .pool
            .get()
            .await
            .map_err(|e| SqliteMiddlewareError::from_pool(e, self.options.acquire_timeout))?;
        Ok(MiddlewarePoolConnection::new(obj, self.options.delay_release))
    }

    #[must_use]
    pub fn options(&self) -> &SqliteOptions {
        &self.options
    }

    /// Current size, idle count and bounds of the pool.
    #[must_use]
    pub fn status(&self) -> Status {
        self.pool.status()
    }

    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ConfigAndPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigAndPool")
            .field("options", &self.options)
            .field("status", &self.pool.status())
            .field("closing", &self.is_closing())
            .finish()
    }
}
