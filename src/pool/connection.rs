use std::ops::Deref;

use deadpool::managed::Object;

use super::types::SqlitePoolObject;
use crate::sqlite::SqliteConnection;

/// A connection checked out of a [`ConfigAndPool`](super::ConfigAndPool).
///
/// Dereferences to [`SqliteConnection`]. Dropping it releases the connection:
/// broken connections are taken out of the pool and closed; healthy ones go
/// back to the idle set, one scheduler tick later when `delay_release` is on.
pub struct MiddlewarePoolConnection {
    conn: Option<SqlitePoolObject>,
    delay_release: bool,
}

impl MiddlewarePoolConnection {
    pub(crate) fn new(conn: SqlitePoolObject, delay_release: bool) -> Self {
        Self {
            conn: Some(conn),
            delay_release,
        }
    }

    /// Remove the connection from the pool for good and close it.
    ///
    /// # Errors
    /// Returns the driver error if the handle fails to close.
    pub async fn destroy(mut self) -> Result<(), crate::SqliteMiddlewareError> {
        match self.conn.take() {
            Some(obj) => Object::take(obj).close().await,
            None => Ok(()),
        }
    }
}

impl Deref for MiddlewarePoolConnection {
    type Target = SqliteConnection;

    fn deref(&self) -> &SqliteConnection {
        // only `destroy` and `drop` empty the slot, and both consume `self`
        self.conn
            .as_deref()
            .unwrap_or_else(|| unreachable!("pooled connection already released"))
    }
}

impl std::fmt::Debug for MiddlewarePoolConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewarePoolConnection")
            .field("conn", &self.conn.as_deref())
            .field("delay_release", &self.delay_release)
            .finish()
    }
}

impl Drop for MiddlewarePoolConnection {
    fn drop(&mut self) {
        let Some(obj) = self.conn.take() else {
            return;
        };
        let handle = tokio::runtime::Handle::try_current().ok();

        if obj.is_broken() {
            tracing::warn!("evicting broken sqlite connection from pool");
            let conn = Object::take(obj);
            if let Some(handle) = handle {
                handle.spawn(async move {
                    if let Err(err) = conn.close().await {
                        tracing::warn!(error = %err, "failed to close evicted sqlite connection");
                    }
                });
            }
            return;
        }

        match handle {
            Some(handle) if self.delay_release => {
                handle.spawn(async move {
                    tokio::task::yield_now().await;
                    drop(obj);
                });
            }
            _ => drop(obj),
        }
    }
}
