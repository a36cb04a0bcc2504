//! Pooled database connections
//!
//! Glues the generic [`ResourcePool`](crate::pool::ResourcePool) to database
//! connections: every pooled connection owns a prepared statement cache,
//! is validated with a check query or the driver's native probe, and is
//! cleaned up (rollback, auto-commit restored) before it goes back idle.
//!
//! # Example
//!
//! ```ignore
//! use zqlz_connection::{ConnectionPool, PoolConfig};
//! use zqlz_core::StatementSignature;
//!
//! let pool = ConnectionPool::new(PoolConfig::new(1, 8), factory)?;
//! let conn = pool.get().await?;
//! let stmt = conn.prepare(&StatementSignature::new("SELECT * FROM users WHERE id = ?")).await?;
//! let rows = stmt.query(&[Value::Int64(42)]).await?;
//! conn.close().await?;
//! ```

mod connection_pool;
mod handle;
mod provider;

#[cfg(test)]
mod tests;

pub use connection_pool::{ConnectionPool, PooledConnection};
pub use handle::{CloseStatement, PooledConnectionHandle, StatementHandle};
pub use provider::{ConnectionFactory, ConnectionProvider, DriverConnectionFactory};
