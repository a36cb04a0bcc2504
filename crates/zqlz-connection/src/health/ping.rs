//! Database ping implementation
//!
//! Provides lightweight liveness checking, either by running a configured
//! check query or by asking the driver's native validity probe, and measures
//! how long it took.

use std::time::{Duration, Instant};
use zqlz_core::Connection;

/// Result of a ping operation
pub type PingResult = Result<Duration, PingError>;

/// Error that can occur during a ping operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingError {
    /// The connection is closed
    ConnectionClosed,
    /// Query execution failed
    QueryFailed(String),
    /// The driver's validity probe reported the connection as unusable
    Invalid,
    /// Ping timed out
    Timeout,
}

impl std::fmt::Display for PingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PingError::ConnectionClosed => write!(f, "Connection is closed"),
            PingError::QueryFailed(msg) => write!(f, "Ping query failed: {}", msg),
            PingError::Invalid => write!(f, "Connection reported itself invalid"),
            PingError::Timeout => write!(f, "Ping timed out"),
        }
    }
}

impl std::error::Error for PingError {}

/// Ping a database connection to check if it's alive.
///
/// With a `check_query`, runs it and bounds it by `timeout`. Without one,
/// delegates to [`Connection::is_valid`]. Returns the round-trip time.
///
/// # Example
///
/// ```ignore
/// use zqlz_connection::health::ping_database;
///
/// let latency = ping_database(&*connection, Some("SELECT 1"), Duration::from_secs(5)).await?;
/// println!("Database latency: {:?}", latency);
/// ```
pub async fn ping_database(
    conn: &dyn Connection,
    check_query: Option<&str>,
    timeout: Duration,
) -> PingResult {
    // Check if connection is already closed
    if conn.is_closed() {
        return Err(PingError::ConnectionClosed);
    }

    let start = Instant::now();
    match check_query {
        Some(query) => match tokio::time::timeout(timeout, conn.query(query, &[])).await {
            Ok(Ok(_)) => Ok(start.elapsed()),
            Ok(Err(e)) => Err(PingError::QueryFailed(e.to_string())),
            Err(_) => Err(PingError::Timeout),
        },
        None => match tokio::time::timeout(timeout, conn.is_valid(timeout)).await {
            Ok(true) => Ok(start.elapsed()),
            Ok(false) => Err(PingError::Invalid),
            Err(_) => Err(PingError::Timeout),
        },
    }
}
