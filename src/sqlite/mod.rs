// SQLite module: connections, statements and pool configuration.
//
// - config: options, builder and the deadpool manager opening connections
// - connection: the connection wrapper and its transaction state machine
// - prepared: statement handles
// - query: statement execution and row extraction on the blocking side

pub mod config;
pub mod connection;
pub mod prepared;
pub mod query;

pub use config::{SqliteManager, SqliteOptions, SqliteOptionsBuilder};
pub use connection::SqliteConnection;
pub use prepared::SqlitePreparedStatement;
pub use query::RunResult;
