use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::Mutex;

use crate::error::SqliteMiddlewareError;

/// Shared handle to one physical `rusqlite` connection.
pub(crate) type SharedSqliteConnection = Arc<Mutex<rusqlite::Connection>>;

/// State shared by a root connection and every transaction proxy created from it.
#[derive(Debug)]
pub(crate) struct HandleState {
    /// Id of the transaction currently holding the handle, 0 when idle.
    pub(crate) active_trx: AtomicU64,
    next_trx: AtomicU64,
    pub(crate) broken: AtomicBool,
    /// Makes ROLLBACK report `SQLITE_BUSY` without touching the database.
    pub(crate) force_rollback_busy: AtomicBool,
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Root,
    Transaction(u64),
}

/// One open SQLite connection.
///
/// Cloning is cheap and yields another reference to the same physical handle;
/// operations issued through any clone run in issue order. A connection handed
/// to transaction work is a proxy: it shares the handle of the connection the
/// transaction was started on and is the only value allowed to issue SQL until
/// the transaction ends.
#[derive(Clone)]
pub struct SqliteConnection {
    pub(crate) handle: SharedSqliteConnection,
    pub(crate) state: Arc<HandleState>,
    pub(crate) trx_immediate: bool,
    pub(crate) role: Role,
}

impl SqliteConnection {
    pub(crate) fn new(conn: rusqlite::Connection, trx_immediate: bool, verbose: bool) -> Self {
        Self {
            handle: Arc::new(Mutex::new(conn)),
            state: Arc::new(HandleState {
                active_trx: AtomicU64::new(0),
                next_trx: AtomicU64::new(0),
                broken: AtomicBool::new(false),
                force_rollback_busy: AtomicBool::new(false),
                verbose,
            }),
            trx_immediate,
            role: Role::Root,
        }
    }

    /// Build the proxy for transaction `id`, sharing this connection's handle.
    pub(crate) fn proxy(&self, id: u64, immediate: bool) -> Self {
        Self {
            handle: Arc::clone(&self.handle),
            state: Arc::clone(&self.state),
            trx_immediate: immediate,
            role: Role::Transaction(id),
        }
    }

    pub(crate) fn next_trx_id(&self) -> u64 {
        self.state.next_trx.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// True for the connection handed to transaction work.
    #[must_use]
    pub fn is_transaction(&self) -> bool {
        matches!(self.role, Role::Transaction(_))
    }

    /// True while a managed transaction holds this physical connection.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.state.active_trx.load(Ordering::SeqCst) != 0
    }

    /// Whether transactions on this connection default to `BEGIN IMMEDIATE`.
    #[must_use]
    pub fn trx_immediate(&self) -> bool {
        self.trx_immediate
    }

    /// A connection is broken after a failed rollback or an abandoned transaction.
    /// The pool destroys broken connections instead of reusing them.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.state.broken.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_broken(&self) {
        self.state.broken.store(true, Ordering::SeqCst);
    }

    /// Force every ROLLBACK on this handle to fail with `SQLITE_BUSY`.
    #[doc(hidden)]
    pub fn set_force_rollback_busy_for_tests(&self, force: bool) {
        self.state.force_rollback_busy.store(force, Ordering::SeqCst);
    }

    pub(crate) fn force_rollback_busy_for_tests(&self) -> bool {
        self.state.force_rollback_busy.load(Ordering::SeqCst)
    }

    /// Run synchronous `rusqlite` logic against the underlying connection.
    ///
    /// # Errors
    /// Returns `TransactionActive` while a transaction holds the connection, or
    /// whatever `func` returns.
    pub async fn with_connection<F, R>(&self, func: F) -> Result<R, SqliteMiddlewareError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R, SqliteMiddlewareError> + Send + 'static,
        R: Send + 'static,
    {
        self.ensure_not_in_tx("with connection")?;
        run_blocking(self.conn_handle(), func).await
    }

    /// Resolve once every operation already queued on this handle has finished.
    ///
    /// # Errors
    /// Returns `TransactionActive` while a transaction holds the connection.
    pub async fn wait(&self) -> Result<(), SqliteMiddlewareError> {
        self.ensure_not_in_tx("wait")?;
        drop(self.handle.lock().await);
        Ok(())
    }

    /// Close the driver handle.
    ///
    /// When other clones still reference the handle it is closed once the last
    /// of them is dropped.
    ///
    /// # Errors
    /// Returns the driver error if SQLite refuses to close the handle.
    pub async fn close(self) -> Result<(), SqliteMiddlewareError> {
        let SqliteConnection { handle, .. } = self;
        match Arc::try_unwrap(handle) {
            Ok(mutex) => {
                let conn = mutex.into_inner();
                tokio::task::spawn_blocking(move || {
                    conn.close()
                        .map_err(|(_, e)| SqliteMiddlewareError::SqliteError(e))
                })
                .await
                .map_err(|e| {
                    SqliteMiddlewareError::ExecutionError(format!(
                        "sqlite close join error: {e}"
                    ))
                })??;
                tracing::debug!("sqlite connection closed");
                Ok(())
            }
            Err(shared) => {
                tracing::debug!(
                    references = Arc::strong_count(&shared),
                    "sqlite connection still referenced; closing when last reference drops"
                );
                Ok(())
            }
        }
    }

    pub(crate) fn conn_handle(&self) -> SharedSqliteConnection {
        Arc::clone(&self.handle)
    }

    /// Fail fast unless this value may issue SQL right now.
    pub(crate) fn ensure_not_in_tx(&self, ctx: &str) -> Result<(), SqliteMiddlewareError> {
        let active = self.state.active_trx.load(Ordering::SeqCst);
        match self.role {
            Role::Root if active != 0 => {
                Err(SqliteMiddlewareError::TransactionActive(ctx.to_owned()))
            }
            Role::Transaction(id) if active != id => Err(SqliteMiddlewareError::TransactionFinished),
            _ => Ok(()),
        }
    }

    pub(crate) fn log_sql(&self, sql: &str) {
        if self.state.verbose {
            tracing::debug!(target: "sqlite_middleware::sql", role = ?self.role, "{sql}");
        }
    }
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("role", &self.role)
            .field("in_transaction", &self.in_transaction())
            .field("trx_immediate", &self.trx_immediate)
            .field("broken", &self.is_broken())
            .finish_non_exhaustive()
    }
}

pub(crate) async fn run_blocking<F, R>(
    conn: SharedSqliteConnection,
    func: F,
) -> Result<R, SqliteMiddlewareError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, SqliteMiddlewareError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = conn.blocking_lock();
        func(&mut guard)
    })
    .await
    .map_err(|e| {
        SqliteMiddlewareError::ExecutionError(format!("sqlite spawn_blocking join error: {e}"))
    })?
}
