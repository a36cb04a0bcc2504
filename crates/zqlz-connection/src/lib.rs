//! ZQLZ Connection - Connection pooling and prepared statement caching
//!
//! This crate provides a generic resource pool with admission control,
//! health checking and background reclamation, and builds a database
//! connection pool on top of it in which every connection keeps its own
//! cache of prepared statements.

mod handle;
pub mod health;
pub mod pool;
pub mod statement_cache;

pub use handle::{
    CloseStatement, ConnectionFactory, ConnectionPool, ConnectionProvider,
    DriverConnectionFactory, PooledConnection, PooledConnectionHandle, StatementHandle,
};
pub use health::{PingError, PingResult, ping_database};
pub use pool::{
    HousekeepingReport, PoolConfig, PoolError, PoolStats, Pooled, ResourceId, ResourcePool,
    ResourceProvider, WaitPolicy,
};
pub use statement_cache::{CacheStats, StatementCache, StatementProfile, StatementTiming};
