mod core;
mod dml;
mod prepared;
mod select;
mod tx;

pub(crate) use self::core::run_blocking;
pub(crate) use self::select::stream_rows;
pub use self::core::SqliteConnection;
