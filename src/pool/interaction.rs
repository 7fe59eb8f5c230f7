use std::future::Future;

use super::ConfigAndPool;
use crate::error::SqliteMiddlewareError;
use crate::params::Params;
use crate::results::{CustomDbRow, ResultSet};
use crate::sqlite::{RunResult, SqliteConnection};

impl ConfigAndPool {
    /// Execute a batch of statements on a pooled connection.
    ///
    /// # Errors
    /// Returns acquisition errors or the driver error.
    pub async fn exec(&self, sql: &str) -> Result<(), SqliteMiddlewareError> {
        let conn = self.get_connection().await?;
        conn.exec(sql).await
    }

    /// Execute one statement on a pooled connection.
    ///
    /// # Errors
    /// Returns acquisition errors or the driver error.
    pub async fn run(
        &self,
        sql: &str,
        params: impl Into<Params>,
    ) -> Result<RunResult, SqliteMiddlewareError> {
        let conn = self.get_connection().await?;
        conn.run(sql, params).await
    }

    /// Fetch the first row of a query on a pooled connection.
    ///
    /// # Errors
    /// Returns acquisition errors or the driver error.
    pub async fn get(
        &self,
        sql: &str,
        params: impl Into<Params>,
    ) -> Result<Option<CustomDbRow>, SqliteMiddlewareError> {
        let conn = self.get_connection().await?;
        conn.get(sql, params).await
    }

    /// Fetch every row of a query on a pooled connection.
    ///
    /// # Errors
    /// Returns acquisition errors or the driver error.
    pub async fn all(
        &self,
        sql: &str,
        params: impl Into<Params>,
    ) -> Result<ResultSet, SqliteMiddlewareError> {
        let conn = self.get_connection().await?;
        conn.all(sql, params).await
    }

    /// Stream the rows of a query on a pooled connection.
    ///
    /// # Errors
    /// Returns acquisition errors, the driver error, or the first error
    /// returned by `on_row`.
    pub async fn each<F>(
        &self,
        sql: &str,
        params: impl Into<Params>,
        on_row: F,
    ) -> Result<usize, SqliteMiddlewareError>
    where
        F: FnMut(CustomDbRow) -> Result<(), SqliteMiddlewareError> + Send,
    {
        let conn = self.get_connection().await?;
        conn.each(sql, params, on_row).await
    }

    /// Hold one connection across several statements.
    ///
    /// After `work` settles, anything still queued on the connection is
    /// awaited before it is released.
    ///
    /// ```rust,no_run
    /// use sqlite_middleware::prelude::*;
    ///
    /// # async fn demo(cap: ConfigAndPool) -> Result<(), SqliteMiddlewareError> {
    /// let total = cap
    ///     .use_connection(|conn| async move {
    ///         conn.exec("CREATE TEMP TABLE scratch (n INTEGER)").await?;
    ///         conn.run("INSERT INTO scratch (n) VALUES (?1), (?2)", params![1, 2]).await?;
    ///         let row = conn.get("SELECT SUM(n) AS total FROM scratch", ()).await?;
    ///         Ok(row.and_then(|r| r.get("total").and_then(|v| v.as_int().copied())))
    ///     })
    ///     .await?;
    /// # let _ = total;
    /// # Ok(()) }
    /// ```
    ///
    /// # Errors
    /// Returns acquisition errors or the error of `work`.
    pub async fn use_connection<F, Fut, T>(&self, work: F) -> Result<T, SqliteMiddlewareError>
    where
        F: FnOnce(SqliteConnection) -> Fut,
        Fut: Future<Output = Result<T, SqliteMiddlewareError>>,
    {
        let conn = self.get_connection().await?;
        let result = work(SqliteConnection::clone(&conn)).await;
        let flushed = conn.wait().await;
        let value = result?;
        flushed?;
        Ok(value)
    }

    /// Run synchronous `rusqlite` logic on a pooled connection.
    ///
    /// # Errors
    /// Returns acquisition errors or the error of `work`.
    pub async fn use_blocking<F, R>(&self, work: F) -> Result<R, SqliteMiddlewareError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R, SqliteMiddlewareError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.get_connection().await?;
        conn.with_connection(work).await
    }

    /// Run `work` in a transaction on a pooled connection, using the pool's
    /// immediate-mode default.
    ///
    /// # Errors
    /// See [`SqliteConnection::transaction_with`].
    pub async fn transaction<F, Fut, T>(&self, work: F) -> Result<T, SqliteMiddlewareError>
    where
        F: FnOnce(SqliteConnection) -> Fut,
        Fut: Future<Output = Result<T, SqliteMiddlewareError>>,
    {
        let conn = self.get_connection().await?;
        conn.transaction(work).await
    }

    /// Run `work` in a transaction on a pooled connection.
    ///
    /// # Errors
    /// See [`SqliteConnection::transaction_with`].
    pub async fn transaction_with<F, Fut, T>(
        &self,
        immediate: bool,
        work: F,
    ) -> Result<T, SqliteMiddlewareError>
    where
        F: FnOnce(SqliteConnection) -> Fut,
        Fut: Future<Output = Result<T, SqliteMiddlewareError>>,
    {
        let conn = self.get_connection().await?;
        conn.transaction_with(immediate, work).await
    }

    /// Run synchronous `work` in a transaction on a pooled connection.
    ///
    /// # Errors
    /// See [`SqliteConnection::transaction_blocking`].
    pub async fn transaction_blocking<F, T>(&self, work: F) -> Result<T, SqliteMiddlewareError>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T, SqliteMiddlewareError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.get_connection().await?;
        conn.transaction_blocking(work).await
    }
}
