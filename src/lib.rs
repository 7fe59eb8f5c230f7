//! Pooled async `SQLite` connections with managed transactions and file-based
//! migrations.
//!
//! ```rust,no_run
//! use sqlite_middleware::prelude::*;
//!
//! # async fn demo() -> Result<(), SqliteMiddlewareError> {
//! let cap = ConfigAndPool::sqlite_builder("app.db".into())
//!     .max(4)
//!     .build()
//!     .await?;
//! cap.migrate(MigrateOptions::default()).await?;
//!
//! cap.transaction(|trx| async move {
//!     trx.run("INSERT INTO users (name) VALUES (?1)", "alice").await?;
//!     Ok(())
//! })
//! .await?;
//!
//! let users = cap.all("SELECT id, name FROM users", ()).await?;
//! # let _ = users;
//! cap.close().await?;
//! # Ok(()) }
//! ```

pub mod error;
pub mod migrate;
pub mod params;
pub mod pool;
pub mod prelude;
pub mod results;
pub mod sqlite;
pub mod types;

pub use error::SqliteMiddlewareError;
pub use migrate::{Force, MigrateOptions, Migration, MigrationReport, load_migrations};
pub use params::Params;
pub use pool::{ConfigAndPool, MiddlewarePoolConnection};
pub use results::{CustomDbRow, ResultSet};
pub use sqlite::{
    RunResult, SqliteConnection, SqliteOptions, SqliteOptionsBuilder, SqlitePreparedStatement,
};
pub use types::RowValues;

// Re-exported so callers can name driver types (`OpenFlags`, raw connections in
// blocking closures) without a direct dependency.
pub use rusqlite;
