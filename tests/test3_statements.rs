use sqlite_middleware::prelude::*;

async fn seeded() -> Result<ConfigAndPool, SqliteMiddlewareError> {
    let cap = ConfigAndPool::sqlite_builder(":memory:".into()).build().await?;
    cap.exec(
        "CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT NOT NULL, qty INTEGER NOT NULL);",
    )
    .await?;
    Ok(cap)
}

#[tokio::test]
async fn sqlite_prepared_statement_lifecycle() -> Result<(), SqliteMiddlewareError> {
    let cap = seeded().await?;
    let conn = cap.get_connection().await?;

    let mut insert = conn
        .prepare("INSERT INTO items (label, qty) VALUES (?1, ?2)", ())
        .await?;
    assert_eq!(insert.sql(), "INSERT INTO items (label, qty) VALUES (?1, ?2)");

    insert.run(params!["apple", 3]).await?;
    assert_eq!(insert.last_id(), 1);
    assert_eq!(insert.changes(), 1);

    // Bound values are reused by executions that pass nothing.
    insert.bind(params!["pear", 5]).await?.run(()).await?;
    assert_eq!(insert.last_id(), 2);
    insert.run(()).await?;
    assert_eq!(insert.last_id(), 3);

    insert.reset().await?;
    assert_eq!(insert.last_id(), 0);
    assert_eq!(insert.changes(), 0);
    insert.finalize().await?;

    let mut select = conn
        .prepare("SELECT label, qty FROM items WHERE qty >= :min ORDER BY id", named_params! { "min" => 4 })
        .await?;
    let rows = select.all(()).await?;
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.get("label").and_then(RowValues::as_text) == Some("pear")));

    let first = select
        .get(named_params! { "min" => 0 })
        .await?
        .expect("a row");
    assert_eq!(first.get("label").and_then(RowValues::as_text), Some("apple"));

    let mut seen = Vec::new();
    let delivered = select
        .each(named_params! { "min" => 0 }, |row| {
            if let Some(qty) = row.get("qty").and_then(RowValues::as_int) {
                seen.push(*qty);
            }
            Ok(())
        })
        .await?;
    assert_eq!(delivered, 3);
    assert_eq!(seen, vec![3, 5, 5]);
    select.finalize().await?;
    Ok(())
}

#[tokio::test]
async fn sqlite_prepare_reports_bad_sql_and_bad_params() -> Result<(), SqliteMiddlewareError> {
    let cap = seeded().await?;
    let conn = cap.get_connection().await?;

    let err = conn.prepare("SELEKT nonsense", ()).await.unwrap_err();
    assert!(matches!(err, SqliteMiddlewareError::SqliteError(_)));

    let err = conn
        .prepare("SELECT * FROM items WHERE id = :id", named_params! { "nope" => 1 })
        .await
        .unwrap_err();
    assert!(matches!(err, SqliteMiddlewareError::ParameterError(_)));
    Ok(())
}

#[tokio::test]
async fn sqlite_each_stops_after_callback_error() -> Result<(), SqliteMiddlewareError> {
    let cap = seeded().await?;
    cap.transaction_blocking(|conn| {
        let mut stmt = conn.prepare("INSERT INTO items (label, qty) VALUES (?1, ?2)")?;
        for i in 1..=500i64 {
            stmt.execute(sqlite_middleware::rusqlite::params![format!("item-{i}"), i])?;
        }
        Ok(())
    })
    .await?;

    let mut seen = 0usize;
    let err = cap
        .each("SELECT id FROM items ORDER BY id", (), |row| {
            seen += 1;
            match row.get("id").and_then(RowValues::as_int) {
                Some(3) => Err(SqliteMiddlewareError::Other("stop at 3".into())),
                _ => Ok(()),
            }
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SqliteMiddlewareError::Other(ref m) if m == "stop at 3"));
    assert_eq!(seen, 3);

    let delivered = cap
        .each("SELECT id FROM items WHERE qty > ?1", 250, |_row| Ok(()))
        .await?;
    assert_eq!(delivered, 250);

    // The connection is fully usable after an aborted stream.
    let row = cap.get("SELECT COUNT(*) AS cnt FROM items", ()).await?.expect("row");
    assert_eq!(row.get("cnt").and_then(RowValues::as_int), Some(&500));
    Ok(())
}

#[tokio::test]
async fn sqlite_explicit_params_become_current_bindings() -> Result<(), SqliteMiddlewareError> {
    let cap = seeded().await?;
    let conn = cap.get_connection().await?;

    let mut insert = conn
        .prepare("INSERT INTO items (label, qty) VALUES (?1, ?2)", params!["pear", 5])
        .await?;
    insert.run(()).await?;
    insert.run(params!["kiwi", 1]).await?;
    // The most recent explicit values are reused, not the prepare-time ones.
    insert.run(()).await?;

    // A failed execution leaves the bindings alone.
    let err = insert.run(params!["extra", 1, 2]).await.unwrap_err();
    assert!(matches!(err, SqliteMiddlewareError::ParameterError(_)));
    insert.run(()).await?;
    insert.finalize().await?;

    let mut select = conn
        .prepare("SELECT label FROM items WHERE qty = ?1 ORDER BY id", 5)
        .await?;
    assert_eq!(select.all(()).await?.len(), 1);
    assert_eq!(select.all(1).await?.len(), 3);
    let labels: Vec<String> = select
        .all(())
        .await?
        .iter()
        .filter_map(|r| r.get("label").and_then(RowValues::as_text).map(str::to_owned))
        .collect();
    assert_eq!(labels, vec!["kiwi", "kiwi", "kiwi"]);
    select.finalize().await?;
    Ok(())
}
