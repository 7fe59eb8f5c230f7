use std::sync::Arc;
use std::time::Duration;

use sqlite_middleware::prelude::*;
use tempfile::tempdir;

fn unique_db_path(prefix: &str) -> String {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(format!("{prefix}.db"));
    std::mem::forget(dir);
    path.to_string_lossy().into_owned()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sqlite_tx_concurrency_and_rollbacks() -> Result<(), Box<dyn std::error::Error>> {
    let cap = Arc::new(
        ConfigAndPool::sqlite_builder(unique_db_path("stress"))
            .max(4)
            .busy_timeout(Duration::from_secs(5))
            .acquire_timeout(Duration::from_secs(5))
            .build()
            .await?,
    );
    cap.exec(
        "CREATE TABLE stress (id INTEGER PRIMARY KEY, val TEXT NOT NULL);
         INSERT INTO stress (id, val) VALUES (0, 'seed');",
    )
    .await?;

    // Successful inserts use unique ids; failing tasks reuse id 0 to hit the primary key.
    let mut handles = Vec::new();
    for i in 1..=100i64 {
        let cap = Arc::clone(&cap);
        handles.push(tokio::spawn(async move {
            cap.transaction(|trx| async move {
                let mut stmt = trx
                    .prepare("INSERT INTO stress (id, val) VALUES (?1, ?2)", ())
                    .await?;
                stmt.run(params![i, format!("ok-{i}")]).await?;
                Ok(())
            })
            .await
        }));
    }
    for _ in 0..50 {
        let cap = Arc::clone(&cap);
        handles.push(tokio::spawn(async move {
            let res = cap
                .transaction(|trx| async move {
                    trx.run("INSERT INTO stress (id, val) VALUES (?1, ?2)", params![0, "dupe"])
                        .await?;
                    Ok(())
                })
                .await;
            match res {
                Err(SqliteMiddlewareError::SqliteError(_)) => Ok(()),
                Err(other) => Err(other),
                Ok(()) => Err(SqliteMiddlewareError::ExecutionError(
                    "expected constraint failure".into(),
                )),
            }
        }));
    }

    for h in handles {
        h.await??;
    }

    // 1 seed + 100 successes, nothing from the rollback paths.
    let row = cap
        .get("SELECT COUNT(*) AS cnt FROM stress", ())
        .await?
        .expect("row");
    assert_eq!(row.get("cnt").and_then(RowValues::as_int), Some(&101));

    // No connection came back with an open transaction.
    let status = cap.status();
    assert!(status.size <= 4);
    cap.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sqlite_tx_blocks_non_tx_commands() -> Result<(), Box<dyn std::error::Error>> {
    let cap = ConfigAndPool::sqlite_builder(unique_db_path("block"))
        .build()
        .await?;
    let conn = cap.get_connection().await?;
    conn.exec("CREATE TABLE t1 (id INTEGER)").await?;
    let outside = SqliteConnection::clone(&conn);

    conn.transaction(|trx| async move {
        trx.run("INSERT INTO t1 (id) VALUES (?1)", 1).await?;
        let err = outside.exec("INSERT INTO t1 (id) VALUES (2)").await.unwrap_err();
        assert!(format!("{err}").contains("transaction currently active; operation not permitted"));
        let err = outside.prepare("SELECT 1", ()).await.unwrap_err();
        assert!(matches!(err, SqliteMiddlewareError::TransactionActive(_)));
        let err = outside.wait().await.unwrap_err();
        assert!(matches!(err, SqliteMiddlewareError::TransactionActive(_)));
        Ok(())
    })
    .await?;

    let all = conn.all("SELECT id FROM t1", ()).await?;
    assert_eq!(all.len(), 1);
    Ok(())
}
