use std::sync::atomic::Ordering;
use std::time::Duration;

use deadpool::managed::Object;
use futures_util::future::join_all;

use super::ConfigAndPool;
use super::types::SqlitePoolObject;
use crate::error::SqliteMiddlewareError;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);
const IDLE_GRAB_TIMEOUT: Duration = Duration::from_millis(50);

impl ConfigAndPool {
    /// Drain and close the pool.
    ///
    /// New acquisitions fail with `PoolClosed` from the moment this is called.
    /// Connections currently checked out are left to finish; each is closed as
    /// soon as it comes back. Resolves once every connection has been closed.
    /// Calling it again is a no-op.
    ///
    /// # Errors
    /// Returns the first error raised while closing a driver handle. Every
    /// connection is still closed and the pool is shut down.
    pub async fn close(&self) -> Result<(), SqliteMiddlewareError> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let size = self.pool.status().size;
        tracing::debug!(size, "draining sqlite pool");

        let mut held: Vec<SqlitePoolObject> = Vec::with_capacity(size);
        for acquired in join_all((0..size).map(|_| self.pool.get())).await {
            match acquired {
                Ok(obj) => held.push(obj),
                Err(err) => tracing::warn!(error = %err, "pool drain could not acquire connection"),
            }
        }

        let mut first_error: Option<SqliteMiddlewareError> = None;
        let last = held.pop();
        for obj in held {
            record(&mut first_error, Object::take(obj).close().await);
        }

        // Hold one connection so the pool cannot hand out the last slot while
        // stragglers come back.
        let target = usize::from(last.is_some());
        while self.pool.status().size > target {
            if self.pool.status().available > 0 {
                if let Ok(Ok(obj)) =
                    tokio::time::timeout(IDLE_GRAB_TIMEOUT, self.pool.get()).await
                {
                    record(&mut first_error, Object::take(obj).close().await);
                    continue;
                }
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        if let Some(obj) = last {
            record(&mut first_error, Object::take(obj).close().await);
        }
        self.pool.close();
        tracing::debug!("sqlite pool closed");

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn record(slot: &mut Option<SqliteMiddlewareError>, result: Result<(), SqliteMiddlewareError>) {
    if let Err(err) = result {
        tracing::warn!(error = %err, "failed to close sqlite connection");
        slot.get_or_insert(err);
    }
}
