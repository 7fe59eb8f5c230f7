use std::sync::Arc;

use super::{SqliteConnection, run_blocking};
use crate::error::SqliteMiddlewareError;
use crate::params::Params;
use crate::sqlite::prepared::SqlitePreparedStatement;

impl SqliteConnection {
    /// Compile a statement and bind its initial parameters.
    ///
    /// The compiled statement stays in the connection's statement cache, so
    /// later executions through the returned handle skip re-preparing.
    ///
    /// # Errors
    /// Returns `TransactionActive` while a transaction holds the connection, the
    /// driver error if the SQL does not compile, or `ParameterError`.
    pub async fn prepare(
        &self,
        sql: &str,
        params: impl Into<Params>,
    ) -> Result<SqlitePreparedStatement, SqliteMiddlewareError> {
        self.ensure_not_in_tx("prepare")?;
        self.log_sql(sql);
        let query: Arc<str> = Arc::from(sql);
        let params = params.into();
        let query_clone = Arc::clone(&query);
        let params_clone = params.clone();
        run_blocking(self.conn_handle(), move |guard| {
            let mut stmt = guard.prepare_cached(&query_clone)?;
            params_clone.bind_to(&mut stmt)
        })
        .await?;
        Ok(SqlitePreparedStatement::new(self.clone(), query, params))
    }
}
