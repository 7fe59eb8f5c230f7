use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use super::core::{HandleState, Role};
use super::{SqliteConnection, run_blocking};
use crate::error::SqliteMiddlewareError;

const ROLLBACK_BUSY_RETRIES: &[Duration] = &[
    Duration::from_millis(10),
    Duration::from_millis(25),
    Duration::from_millis(50),
];

fn begin_sql(immediate: bool) -> &'static str {
    if immediate { "BEGIN IMMEDIATE" } else { "BEGIN" }
}

/// Issue ROLLBACK, retrying while SQLite reports the database busy.
///
/// Nothing is issued when SQLite already left the transaction on its own.
pub(crate) fn rollback_with_busy_retries(
    conn: &rusqlite::Connection,
    force_busy: bool,
) -> Result<(), SqliteMiddlewareError> {
    if force_busy {
        return Err(SqliteMiddlewareError::SqliteError(
            rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error {
                    code: rusqlite::ErrorCode::DatabaseBusy,
                    extended_code: rusqlite::ffi::SQLITE_BUSY,
                },
                None,
            ),
        ));
    }

    for (idx, delay) in ROLLBACK_BUSY_RETRIES.iter().copied().enumerate() {
        if conn.is_autocommit() {
            return Ok(());
        }
        let result = conn
            .execute_batch("ROLLBACK")
            .map_err(SqliteMiddlewareError::SqliteError);
        match result {
            Err(ref err) if err.is_busy() && idx + 1 < ROLLBACK_BUSY_RETRIES.len() => {
                thread::sleep(delay);
            }
            _ => return result,
        }
    }

    Err(SqliteMiddlewareError::ExecutionError(
        "rollback retries exhausted".into(),
    ))
}

/// Holds the transaction guard of a physical connection; clears it when dropped.
struct ActiveTransaction {
    state: Arc<HandleState>,
    id: u64,
    settled: bool,
}

impl ActiveTransaction {
    fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for ActiveTransaction {
    fn drop(&mut self) {
        if !self.settled {
            // Dropped mid-transaction: BEGIN was issued but neither COMMIT nor
            // ROLLBACK completed, so the handle must not be reused.
            tracing::warn!(trx = self.id, "transaction abandoned; connection marked broken");
            self.state.broken.store(true, Ordering::SeqCst);
        }
        let _ = self.state.active_trx.compare_exchange(
            self.id,
            0,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

impl SqliteConnection {
    /// Claim the transaction guard. No SQL is issued when this fails.
    fn enter_transaction(&self) -> Result<ActiveTransaction, SqliteMiddlewareError> {
        if matches!(self.role, Role::Transaction(_)) {
            return Err(SqliteMiddlewareError::NestedTransaction);
        }
        let id = self.next_trx_id();
        self.state
            .active_trx
            .compare_exchange(0, id, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| SqliteMiddlewareError::TransactionActive("transaction".into()))?;
        Ok(ActiveTransaction {
            state: Arc::clone(&self.state),
            id,
            settled: false,
        })
    }

    /// Run `work` inside a transaction using this connection's immediate-mode default.
    ///
    /// See [`SqliteConnection::transaction_with`].
    ///
    /// # Errors
    /// Same as [`SqliteConnection::transaction_with`].
    pub async fn transaction<F, Fut, T>(&self, work: F) -> Result<T, SqliteMiddlewareError>
    where
        F: FnOnce(SqliteConnection) -> Fut,
        Fut: Future<Output = Result<T, SqliteMiddlewareError>>,
    {
        self.transaction_with(self.trx_immediate, work).await
    }

    /// Run `work` inside a transaction.
    ///
    /// `work` receives the transaction connection, which shares this
    /// connection's handle; every statement of the transaction must go through
    /// it. The transaction commits when `work` succeeds and rolls back when
    /// `work` or COMMIT fails.
    ///
    /// ```rust,no_run
    /// use sqlite_middleware::prelude::*;
    ///
    /// # async fn demo(conn: SqliteConnection) -> Result<(), SqliteMiddlewareError> {
    /// let id = conn
    ///     .transaction_with(true, |trx| async move {
    ///         let res = trx.run("INSERT INTO t (name) VALUES (?1)", "alice").await?;
    ///         trx.run("INSERT INTO audit (t_id) VALUES (?1)", res.last_id).await?;
    ///         Ok(res.last_id)
    ///     })
    ///     .await?;
    /// # let _ = id;
    /// # Ok(()) }
    /// ```
    ///
    /// # Errors
    /// - `NestedTransaction` when called on a transaction connection;
    /// - `TransactionActive` when this connection already runs a transaction;
    /// - the error of BEGIN, of `work`, or of COMMIT (after a successful rollback);
    /// - `RollbackFailed` when ROLLBACK itself fails. The connection is then
    ///   marked broken.
    pub async fn transaction_with<F, Fut, T>(
        &self,
        immediate: bool,
        work: F,
    ) -> Result<T, SqliteMiddlewareError>
    where
        F: FnOnce(SqliteConnection) -> Fut,
        Fut: Future<Output = Result<T, SqliteMiddlewareError>>,
    {
        let active = self.enter_transaction()?;
        let trx = self.proxy(active.id, immediate);

        if let Err(err) = trx.exec(begin_sql(immediate)).await {
            active.settle();
            return Err(err);
        }
        tracing::debug!(trx = active.id, immediate, "transaction started");

        let outcome = match work(trx.clone()).await {
            Ok(value) => trx.exec("COMMIT").await.map(|()| value),
            Err(err) => Err(err),
        };

        let result = match outcome {
            Ok(value) => {
                tracing::debug!(trx = active.id, "transaction committed");
                Ok(value)
            }
            Err(cause) => match trx.rollback().await {
                Ok(()) => {
                    tracing::debug!(trx = active.id, error = %cause, "transaction rolled back");
                    Err(cause)
                }
                Err(source) => {
                    self.mark_broken();
                    Err(SqliteMiddlewareError::RollbackFailed {
                        source: Box::new(source),
                        cause: Box::new(cause),
                    })
                }
            },
        };
        active.settle();
        result
    }

    /// Run synchronous `work` on the raw connection inside a transaction, in a
    /// single blocking hop.
    ///
    /// # Errors
    /// Same as [`SqliteConnection::transaction_with`]; a panic inside `work`
    /// is reported as `ExecutionError` after rolling back.
    pub async fn transaction_blocking<F, T>(&self, work: F) -> Result<T, SqliteMiddlewareError>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T, SqliteMiddlewareError> + Send + 'static,
        T: Send + 'static,
    {
        self.transaction_blocking_with(self.trx_immediate, work)
            .await
    }

    /// [`SqliteConnection::transaction_blocking`] with an explicit immediate mode.
    ///
    /// # Errors
    /// Same as [`SqliteConnection::transaction_blocking`].
    pub async fn transaction_blocking_with<F, T>(
        &self,
        immediate: bool,
        work: F,
    ) -> Result<T, SqliteMiddlewareError>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T, SqliteMiddlewareError> + Send + 'static,
        T: Send + 'static,
    {
        let active = self.enter_transaction()?;
        let trx = self.proxy(active.id, immediate);
        trx.log_sql(begin_sql(immediate));

        let force_busy = self.force_rollback_busy_for_tests();
        let result = run_blocking(trx.conn_handle(), move |guard| {
            guard.execute_batch(begin_sql(immediate))?;
            let outcome = catch_unwind(AssertUnwindSafe(|| work(guard)))
                .unwrap_or_else(|_| {
                    Err(SqliteMiddlewareError::ExecutionError(
                        "transaction body panicked".into(),
                    ))
                })
                .and_then(|value| {
                    guard.execute_batch("COMMIT")?;
                    Ok(value)
                });
            match outcome {
                Ok(value) => Ok(value),
                Err(cause) => match rollback_with_busy_retries(guard, force_busy) {
                    Ok(()) => Err(cause),
                    Err(source) => Err(SqliteMiddlewareError::RollbackFailed {
                        source: Box::new(source),
                        cause: Box::new(cause),
                    }),
                },
            }
        })
        .await;

        if matches!(result, Err(SqliteMiddlewareError::RollbackFailed { .. })) {
            self.mark_broken();
        }
        active.settle();
        result
    }

    async fn rollback(&self) -> Result<(), SqliteMiddlewareError> {
        self.ensure_not_in_tx("rollback")?;
        self.log_sql("ROLLBACK");
        let force_busy = self.force_rollback_busy_for_tests();
        run_blocking(self.conn_handle(), move |guard| {
            rollback_with_busy_retries(guard, force_busy)
        })
        .await
    }
}
