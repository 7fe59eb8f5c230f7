use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::Statement;

use crate::error::SqliteMiddlewareError;
use crate::params::Params;
use crate::results::{CustomDbRow, ResultSet};
use crate::types::RowValues;

/// Outcome of `run`: the statement-level metadata SQLite reports after execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    /// Rowid of the most recent successful INSERT on the connection.
    pub last_id: i64,
    /// Rows modified by this statement.
    pub changes: usize,
    /// The SQL text that was executed.
    pub sql: String,
}

/// Column names of a prepared statement plus a lookup index shared by its rows.
pub(crate) struct Columns {
    names: Arc<Vec<String>>,
    index: Arc<HashMap<String, usize>>,
}

impl Columns {
    pub(crate) fn of(stmt: &Statement<'_>) -> Self {
        let names: Vec<String> = stmt
            .column_names()
            .iter()
            .map(std::string::ToString::to_string)
            .collect();
        let index = crate::results::column_index(&names);
        Self {
            names: Arc::new(names),
            index: Arc::new(index),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.names.len()
    }

    pub(crate) fn row(&self, row: &rusqlite::Row<'_>) -> Result<CustomDbRow, SqliteMiddlewareError> {
        let mut values = Vec::with_capacity(self.len());
        for idx in 0..self.len() {
            values.push(RowValues::from_sqlite(row.get_ref(idx)?));
        }
        Ok(CustomDbRow::with_index(
            Arc::clone(&self.names),
            Arc::clone(&self.index),
            values,
        ))
    }
}

/// Execute one statement and report rowid/changes.
///
/// Rows produced by the statement (`RETURNING`, `SELECT`, most `PRAGMA`s) are
/// stepped through and discarded. Read-only statements report zero changes.
///
/// # Errors
/// Returns the driver error, or `ParameterError` if binding fails.
pub(crate) fn execute(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &Params,
) -> Result<RunResult, SqliteMiddlewareError> {
    let mut stmt = conn.prepare_cached(sql)?;
    params.bind_to(&mut stmt)?;
    let readonly = stmt.readonly();
    let mut rows = stmt.raw_query();
    while rows.next()?.is_some() {}
    drop(rows);
    let changes = if readonly {
        0
    } else {
        usize::try_from(conn.changes()).unwrap_or(usize::MAX)
    };
    Ok(RunResult {
        last_id: conn.last_insert_rowid(),
        changes,
        sql: sql.to_owned(),
    })
}

/// Fetch the first row, if any.
///
/// # Errors
/// Returns the driver error, or `ParameterError` if binding fails.
pub(crate) fn query_one(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &Params,
) -> Result<Option<CustomDbRow>, SqliteMiddlewareError> {
    let mut stmt = conn.prepare_cached(sql)?;
    params.bind_to(&mut stmt)?;
    let columns = Columns::of(&stmt);
    let mut rows = stmt.raw_query();
    match rows.next()? {
        Some(row) => Ok(Some(columns.row(row)?)),
        None => Ok(None),
    }
}

/// Materialize every row into a `ResultSet`.
///
/// # Errors
/// Returns the driver error, or `ParameterError` if binding fails.
pub(crate) fn query_all(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &Params,
) -> Result<ResultSet, SqliteMiddlewareError> {
    let mut stmt = conn.prepare_cached(sql)?;
    params.bind_to(&mut stmt)?;
    let columns = Columns::of(&stmt);
    let mut result_set = ResultSet::with_capacity(10);
    result_set.set_column_names(Arc::clone(&columns.names));
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        result_set.add_row(columns.row(row)?);
    }
    Ok(result_set)
}
