//! Liveness checks for database connections
//!
//! # Example
//!
//! ```ignore
//! use zqlz_connection::health::ping_database;
//!
//! let latency = ping_database(&*connection, None, Duration::from_secs(5)).await?;
//! ```

mod ping;

#[cfg(test)]
mod tests;

pub use ping::{PingError, PingResult, ping_database};
