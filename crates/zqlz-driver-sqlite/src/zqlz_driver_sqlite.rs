//! SQLite database driver implementation

mod connection;
mod driver;
mod statement;

#[cfg(test)]
mod tests;

pub use connection::{DEFAULT_STATEMENT_CACHE_CAPACITY, SqliteCancelHandle, SqliteConnection};
pub use driver::{SqliteConnectionFactory, SqliteDriver};
pub use statement::SqlitePreparedStatement;
