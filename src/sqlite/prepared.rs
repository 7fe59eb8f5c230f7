use std::sync::Arc;

use super::connection::{SqliteConnection, run_blocking, stream_rows};
use super::query;
use crate::error::SqliteMiddlewareError;
use crate::params::Params;
use crate::results::{CustomDbRow, ResultSet};

/// Handle to a statement compiled on one connection.
///
/// The compiled form lives in the connection's statement cache; this handle
/// carries the SQL text, the current bindings and the metadata of its most
/// recent execution. `finalize` consumes the handle, so it cannot be used
/// afterwards.
#[derive(Debug)]
pub struct SqlitePreparedStatement {
    connection: SqliteConnection,
    query: Arc<str>,
    bound: Params,
    last_id: i64,
    changes: usize,
}

impl SqlitePreparedStatement {
    pub(crate) fn new(connection: SqliteConnection, query: Arc<str>, bound: Params) -> Self {
        Self {
            connection,
            query,
            bound,
            last_id: 0,
            changes: 0,
        }
    }

    /// Access the raw SQL string of the prepared statement.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.query
    }

    /// Rowid reported by the most recent `run`.
    #[must_use]
    pub fn last_id(&self) -> i64 {
        self.last_id
    }

    /// Rows changed by the most recent `run`.
    #[must_use]
    pub fn changes(&self) -> usize {
        self.changes
    }

    /// Replace the bindings used by later executions that pass no parameters.
    ///
    /// # Errors
    /// Returns `ParameterError` or the driver error if the values do not fit
    /// the statement.
    pub async fn bind(
        &mut self,
        params: impl Into<Params>,
    ) -> Result<&mut Self, SqliteMiddlewareError> {
        let params = params.into();
        let checked = params.clone();
        self.call("bind", move |guard, sql| {
            let mut stmt = guard.prepare_cached(sql)?;
            checked.bind_to(&mut stmt)
        })
        .await?;
        self.bound = params;
        Ok(self)
    }

    /// Execute the statement, recording `last_id` and `changes`.
    ///
    /// Empty `params` reuse the current bindings. Anything else rebinds and,
    /// once the execution succeeds, replaces the current bindings; the same
    /// holds for `get`, `all` and `each`.
    ///
    /// # Errors
    /// Returns the driver error or `ParameterError`.
    pub async fn run(
        &mut self,
        params: impl Into<Params>,
    ) -> Result<&mut Self, SqliteMiddlewareError> {
        let given = params.into();
        let params = self.effective(&given);
        let result = self
            .call("run", move |guard, sql| query::execute(guard, sql, &params))
            .await?;
        self.last_id = result.last_id;
        self.changes = result.changes;
        self.remember(given);
        Ok(self)
    }

    /// Fetch the first row, if any.
    ///
    /// # Errors
    /// Returns the driver error or `ParameterError`.
    pub async fn get(
        &mut self,
        params: impl Into<Params>,
    ) -> Result<Option<CustomDbRow>, SqliteMiddlewareError> {
        let given = params.into();
        let params = self.effective(&given);
        let row = self
            .call("get", move |guard, sql| query::query_one(guard, sql, &params))
            .await?;
        self.remember(given);
        Ok(row)
    }

    /// Fetch every row, in order.
    ///
    /// # Errors
    /// Returns the driver error or `ParameterError`.
    pub async fn all(
        &mut self,
        params: impl Into<Params>,
    ) -> Result<ResultSet, SqliteMiddlewareError> {
        let given = params.into();
        let params = self.effective(&given);
        let rows = self
            .call("all", move |guard, sql| query::query_all(guard, sql, &params))
            .await?;
        self.remember(given);
        Ok(rows)
    }

    /// Stream rows to `on_row`; see [`SqliteConnection::each`].
    ///
    /// # Errors
    /// Returns the driver error or the first error returned by `on_row`.
    pub async fn each<F>(
        &mut self,
        params: impl Into<Params>,
        on_row: F,
    ) -> Result<usize, SqliteMiddlewareError>
    where
        F: FnMut(CustomDbRow) -> Result<(), SqliteMiddlewareError> + Send,
    {
        self.connection.ensure_not_in_tx("statement each")?;
        let given = params.into();
        let params = self.effective(&given);
        let delivered =
            stream_rows(&self.connection, self.query.to_string(), params, on_row).await?;
        self.remember(given);
        Ok(delivered)
    }

    /// Reset execution state. Bindings are kept.
    ///
    /// # Errors
    /// Returns the driver error if the statement can no longer be compiled
    /// (for example after its table was dropped).
    pub async fn reset(&mut self) -> Result<&mut Self, SqliteMiddlewareError> {
        self.call("reset", |guard, sql| {
            // checking a cached statement back in resets it
            drop(guard.prepare_cached(sql)?);
            Ok(())
        })
        .await?;
        self.last_id = 0;
        self.changes = 0;
        Ok(self)
    }

    /// Release the statement.
    ///
    /// # Errors
    /// Returns `TransactionActive` while a transaction holds the connection.
    pub async fn finalize(self) -> Result<(), SqliteMiddlewareError> {
        self.connection.ensure_not_in_tx("finalize")?;
        let Self { connection, query, .. } = self;
        run_blocking(connection.conn_handle(), move |guard| {
            // drop the compiled form instead of returning it to the cache
            guard.prepare_cached(&query)?.discard();
            Ok(())
        })
        .await
    }

    fn effective(&self, params: &Params) -> Params {
        if params.is_empty() {
            self.bound.clone()
        } else {
            params.clone()
        }
    }

    fn remember(&mut self, params: Params) {
        if !params.is_empty() {
            self.bound = params;
        }
    }

    async fn call<F, R>(&self, ctx: &str, func: F) -> Result<R, SqliteMiddlewareError>
    where
        F: FnOnce(&rusqlite::Connection, &str) -> Result<R, SqliteMiddlewareError>
            + Send
            + 'static,
        R: Send + 'static,
    {
        self.connection.ensure_not_in_tx(ctx)?;
        self.connection.log_sql(&self.query);
        let sql = Arc::clone(&self.query);
        run_blocking(self.connection.conn_handle(), move |guard| func(&*guard, sql.as_ref())).await
    }
}
