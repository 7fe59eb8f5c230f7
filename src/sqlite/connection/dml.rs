use super::{SqliteConnection, run_blocking};
use crate::error::SqliteMiddlewareError;
use crate::params::Params;
use crate::sqlite::query::{self, RunResult};

impl SqliteConnection {
    /// Execute one statement and report the last inserted rowid and change count.
    ///
    /// # Errors
    /// Returns `TransactionActive` while a transaction holds the connection, or
    /// the driver error.
    pub async fn run(
        &self,
        sql: &str,
        params: impl Into<Params>,
    ) -> Result<RunResult, SqliteMiddlewareError> {
        self.ensure_not_in_tx("run")?;
        self.log_sql(sql);
        let sql_owned = sql.to_owned();
        let params = params.into();
        run_blocking(self.conn_handle(), move |guard| {
            query::execute(guard, &sql_owned, &params)
        })
        .await
    }

    /// Execute a batch of `;`-separated statements without parameters.
    ///
    /// # Errors
    /// Returns `TransactionActive` while a transaction holds the connection, or
    /// the driver error.
    pub async fn exec(&self, sql: &str) -> Result<(), SqliteMiddlewareError> {
        self.ensure_not_in_tx("exec")?;
        self.log_sql(sql);
        let sql_owned = sql.to_owned();
        run_blocking(self.conn_handle(), move |guard| {
            guard
                .execute_batch(&sql_owned)
                .map_err(SqliteMiddlewareError::SqliteError)
        })
        .await
    }
}
