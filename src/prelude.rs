//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and macros
//! to make it easier to get started with the library.

pub use crate::error::SqliteMiddlewareError;
pub use crate::migrate::{Force, MigrateOptions, Migration, MigrationReport, load_migrations};
pub use crate::params::Params;
pub use crate::pool::{ConfigAndPool, MiddlewarePoolConnection};
pub use crate::results::{CustomDbRow, ResultSet};
pub use crate::sqlite::{
    RunResult, SqliteConnection, SqliteOptions, SqliteOptionsBuilder, SqlitePreparedStatement,
};
pub use crate::types::RowValues;
pub use crate::{named_params, params};
