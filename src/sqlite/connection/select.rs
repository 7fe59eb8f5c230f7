use tokio::sync::mpsc;

use super::{SqliteConnection, run_blocking};
use crate::error::SqliteMiddlewareError;
use crate::params::Params;
use crate::results::{CustomDbRow, ResultSet};
use crate::sqlite::query::{self, Columns};

/// Rows buffered between the driver thread and the `each` callback.
const ROW_CHANNEL_CAPACITY: usize = 64;

impl SqliteConnection {
    /// Fetch the first row of a query, or `None` when it returns nothing.
    ///
    /// # Errors
    /// Returns `TransactionActive` while a transaction holds the connection, or
    /// the driver error.
    pub async fn get(
        &self,
        sql: &str,
        params: impl Into<Params>,
    ) -> Result<Option<CustomDbRow>, SqliteMiddlewareError> {
        self.ensure_not_in_tx("get")?;
        self.log_sql(sql);
        let sql_owned = sql.to_owned();
        let params = params.into();
        run_blocking(self.conn_handle(), move |guard| {
            query::query_one(guard, &sql_owned, &params)
        })
        .await
    }

    /// Fetch every row of a query, in order.
    ///
    /// # Errors
    /// Returns `TransactionActive` while a transaction holds the connection, or
    /// the driver error.
    pub async fn all(
        &self,
        sql: &str,
        params: impl Into<Params>,
    ) -> Result<ResultSet, SqliteMiddlewareError> {
        self.ensure_not_in_tx("all")?;
        self.log_sql(sql);
        let sql_owned = sql.to_owned();
        let params = params.into();
        run_blocking(self.conn_handle(), move |guard| {
            query::query_all(guard, &sql_owned, &params)
        })
        .await
    }

    /// Stream rows one at a time to `on_row` and return how many were delivered.
    ///
    /// When `on_row` fails no further rows are delivered and its first error is
    /// returned once the driver side has stopped.
    ///
    /// # Errors
    /// Returns `TransactionActive` while a transaction holds the connection, the
    /// driver error, or the first error returned by `on_row`.
    pub async fn each<F>(
        &self,
        sql: &str,
        params: impl Into<Params>,
        on_row: F,
    ) -> Result<usize, SqliteMiddlewareError>
    where
        F: FnMut(CustomDbRow) -> Result<(), SqliteMiddlewareError> + Send,
    {
        self.ensure_not_in_tx("each")?;
        self.log_sql(sql);
        stream_rows(self, sql.to_owned(), params.into(), on_row).await
    }
}

pub(crate) async fn stream_rows<F>(
    conn: &SqliteConnection,
    sql: String,
    params: Params,
    mut on_row: F,
) -> Result<usize, SqliteMiddlewareError>
where
    F: FnMut(CustomDbRow) -> Result<(), SqliteMiddlewareError> + Send,
{
    let (tx, mut rx) = mpsc::channel::<CustomDbRow>(ROW_CHANNEL_CAPACITY);

    let producer = run_blocking(conn.conn_handle(), move |guard| {
        let mut stmt = guard.prepare_cached(&sql)?;
        params.bind_to(&mut stmt)?;
        let columns = Columns::of(&stmt);
        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next()? {
            if tx.blocking_send(columns.row(row)?).is_err() {
                // consumer stopped after a callback error
                break;
            }
        }
        Ok(())
    });

    let consumer = async move {
        let mut delivered = 0usize;
        while let Some(row) = rx.recv().await {
            if let Err(err) = on_row(row) {
                return (delivered, Some(err));
            }
            delivered += 1;
        }
        (delivered, None)
    };

    let (driver_result, (delivered, callback_error)) = tokio::join!(producer, consumer);
    if let Some(err) = callback_error {
        return Err(err);
    }
    driver_result?;
    Ok(delivered)
}
