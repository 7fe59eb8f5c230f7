use deadpool::managed::{Object, Pool};

use crate::sqlite::SqliteManager;

/// Bounded pool of `SQLite` connections.
pub type SqlitePool = Pool<SqliteManager>;

/// A connection checked out of [`SqlitePool`].
pub type SqlitePoolObject = Object<SqliteManager>;
