use std::time::Duration;

use sqlite_middleware::prelude::*;
use tempfile::tempdir;
use tokio::time::sleep;

fn unique_db_path(prefix: &str) -> String {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(format!("{prefix}.db"));
    std::mem::forget(dir);
    path.to_string_lossy().into_owned()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sqlite_close_waits_for_in_flight_work() -> Result<(), Box<dyn std::error::Error>> {
    let cap = ConfigAndPool::sqlite_builder(unique_db_path("drain"))
        .min(2)
        .max(3)
        .build()
        .await?;
    cap.exec("CREATE TABLE jobs (id INTEGER PRIMARY KEY, done INTEGER NOT NULL)")
        .await?;

    let worker = {
        let cap = cap.clone();
        tokio::spawn(async move {
            cap.use_connection(|conn| async move {
                sleep(Duration::from_millis(150)).await;
                conn.run("INSERT INTO jobs (done) VALUES (?1)", 1).await?;
                Ok(())
            })
            .await
        })
    };
    // Let the worker check its connection out before draining starts.
    sleep(Duration::from_millis(30)).await;

    cap.close().await?;
    worker.await??;

    assert!(cap.is_closing());
    assert_eq!(cap.status().size, 0);

    let err = cap.get("SELECT 1", ()).await.unwrap_err();
    assert!(matches!(err, SqliteMiddlewareError::PoolClosed));

    // The committed write survived the drain.
    let reopened = ConfigAndPool::sqlite_builder(cap.options().db_path.clone())
        .build()
        .await?;
    let row = reopened
        .get("SELECT COUNT(*) AS cnt FROM jobs", ())
        .await?
        .expect("row");
    assert_eq!(row.get("cnt").and_then(RowValues::as_int), Some(&1));
    reopened.close().await?;
    Ok(())
}

#[tokio::test]
async fn sqlite_close_twice_is_a_noop() -> Result<(), SqliteMiddlewareError> {
    let cap = ConfigAndPool::sqlite_builder(":memory:".into()).build().await?;
    cap.exec("CREATE TABLE t (id INTEGER)").await?;
    cap.close().await?;
    cap.close().await?;
    assert_eq!(cap.status().size, 0);

    let err = cap.get_connection().await.unwrap_err();
    assert!(matches!(err, SqliteMiddlewareError::PoolClosed));
    Ok(())
}

#[tokio::test]
async fn sqlite_destroyed_connection_leaves_pool() -> Result<(), SqliteMiddlewareError> {
    let cap = ConfigAndPool::sqlite_builder(unique_db_path("destroy"))
        .min(1)
        .max(2)
        .build()
        .await?;
    let conn = cap.get_connection().await?;
    assert_eq!(cap.status().size, 1);
    conn.destroy().await?;
    assert_eq!(cap.status().size, 0);

    // A fresh connection replaces it on demand.
    cap.exec("CREATE TABLE t (id INTEGER)").await?;
    assert_eq!(cap.status().size, 1);
    cap.close().await?;
    Ok(())
}
