//! Versioned schema migrations.
//!
//! Migration files live in one directory and are named `<id>.<name>.sql`. The
//! body holds the forward SQL, then a `-- Down` line, then the SQL that undoes
//! it. Applied migrations are recorded, together with their own up/down text,
//! in a table of the database so they can be reverted after their file is gone.

mod files;
mod runner;

use std::path::PathBuf;

use serde::Serialize;

pub use files::{load_migrations, parse_migration};

pub const DEFAULT_MIGRATIONS_TABLE: &str = "migrations";
pub const DEFAULT_MIGRATIONS_PATH: &str = "./migrations";

/// One migration, parsed from a file or read back from the migrations table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Migration {
    pub id: i64,
    pub name: String,
    pub up: String,
    pub down: String,
}

/// Which migrations to redo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Force {
    /// Revert and re-apply the most recent migration.
    Last,
    /// Revert everything above this id; nothing above it is applied.
    Id(i64),
}

#[derive(Debug, Clone)]
pub struct MigrateOptions {
    pub force: Option<Force>,
    pub table: String,
    pub migrations_path: PathBuf,
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self {
            force: None,
            table: DEFAULT_MIGRATIONS_TABLE.to_owned(),
            migrations_path: PathBuf::from(DEFAULT_MIGRATIONS_PATH),
        }
    }
}

impl MigrateOptions {
    #[must_use]
    pub fn with_force(mut self, force: Force) -> Self {
        self.force = Some(force);
        self
    }

    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    #[must_use]
    pub fn with_migrations_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.migrations_path = path.into();
        self
    }
}

/// Ids touched by one `migrate` run, in the order they ran.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub reverted: Vec<i64>,
    pub applied: Vec<i64>,
}

impl MigrationReport {
    /// True when the run changed nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.reverted.is_empty() && self.applied.is_empty()
    }
}
