//! Connection pool built on the generic resource pool

use std::ops::Deref;
use std::sync::Arc;

use zqlz_core::Result;

use super::handle::PooledConnectionHandle;
use super::provider::{ConnectionFactory, ConnectionProvider};
use crate::pool::{PoolConfig, PoolError, PoolStats, Pooled, ResourceId, ResourcePool};
use crate::statement_cache::{CacheStats, StatementTiming};

/// A connection pool that manages a set of database connections
///
/// Each connection carries its own prepared statement cache. Connections
/// are automatically returned to the pool when the [`PooledConnection`]
/// wrapper is dropped.
#[derive(Clone)]
pub struct ConnectionPool {
    pool: ResourcePool<ConnectionProvider>,
}

impl ConnectionPool {
    /// Create a new connection pool with the given configuration and factory
    pub fn new<F: ConnectionFactory>(config: PoolConfig, factory: F) -> Result<Self> {
        let provider = ConnectionProvider::new(
            factory,
            config.statement_cache_size(),
            config.check_query().map(str::to_string),
            config.check_timeout(),
        );
        Ok(Self {
            pool: ResourcePool::new(config, provider)?,
        })
    }

    /// Get a connection from the pool
    ///
    /// Reuses the most recently returned connection when one is idle,
    /// otherwise opens a new one or waits according to the configured
    /// wait policy.
    pub async fn get(&self) -> std::result::Result<PooledConnection, PoolError> {
        let inner = self.pool.acquire().await?;
        Ok(PooledConnection { inner: Some(inner) })
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Get a copy of the pool configuration
    pub fn config(&self) -> PoolConfig {
        self.pool.config()
    }

    /// The underlying resource pool, for sizing and administrative operations
    pub fn pool(&self) -> &ResourcePool<ConnectionProvider> {
        &self.pool
    }

    /// Resize the statement cache of every connection, current and future.
    ///
    /// Zero disables statement caching and closes all cached statements.
    pub fn set_statement_cache_size(&self, size: usize) {
        self.pool
            .update_config(|config| config.set_statement_cache_size(size));
        self.pool.provider().set_statement_cache_size(size);
        for handle in self.pool.handles() {
            handle.set_statement_cache_size(size);
        }
    }

    /// Up to `n` statements with the highest total execution time
    pub fn statement_profile(&self, n: usize) -> Vec<StatementTiming> {
        self.pool.provider().profile().top(n)
    }

    /// Close the pool and every idle connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// A connection borrowed from the pool
///
/// When dropped, the connection is returned to the front of the idle queue.
/// A connection dropped in the middle of a transaction is closed instead.
pub struct PooledConnection {
    inner: Option<Pooled<ConnectionProvider>>,
}

impl PooledConnection {
    pub fn id(&self) -> ResourceId {
        self.pooled().id()
    }

    /// Get the pooled handle as an Arc
    pub fn handle(&self) -> &Arc<PooledConnectionHandle> {
        self.pooled().handle()
    }

    pub fn statement_cache_stats(&self) -> CacheStats {
        self.handle().statement_cache_stats()
    }

    /// Return the connection cleanly.
    ///
    /// Restores auto-commit and clears warnings; if that fails the
    /// connection is closed and removed from the pool, and the error is
    /// returned.
    pub async fn close(self) -> Result<()> {
        self.return_to_pool(false).await
    }

    /// Like [`close`](Self::close), with `to_end` queueing the connection
    /// behind the other idle ones.
    pub async fn return_to_pool(mut self, to_end: bool) -> Result<()> {
        let Some(pooled) = self.inner.take() else {
            return Ok(());
        };
        match pooled.handle().reset_for_return().await {
            Ok(()) => {
                pooled.release(to_end);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(resource_id = %pooled.id(), error = %e, "connection reset failed, discarding");
                pooled.discard(true).await;
                Err(e)
            }
        }
    }

    /// Remove a connection the caller found to be broken
    pub async fn discard(mut self) {
        if let Some(pooled) = self.inner.take() {
            pooled.discard(true).await;
        }
    }

    fn pooled(&self) -> &Pooled<ConnectionProvider> {
        self.inner.as_ref().expect("connection taken")
    }
}

impl Deref for PooledConnection {
    type Target = PooledConnectionHandle;

    fn deref(&self) -> &Self::Target {
        self.handle().as_ref()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(pooled) = self.inner.take() {
            let connection = pooled.handle().connection();
            if connection.is_closed() || !connection.auto_commit() {
                pooled.mark_dirty();
            } else {
                connection.clear_warnings();
            }
        }
    }
}
