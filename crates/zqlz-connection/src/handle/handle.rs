//! A pooled connection together with its statement cache

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use zqlz_core::{
    CallableStatement, Connection, PreparedStatement, QueryResult, Result, StatementResult,
    StatementSignature, Value, ZqlzError,
};

use crate::health::ping_database;
use crate::statement_cache::{Admission, CacheStats, EvictionListener, StatementCache, StatementProfile};

/// Closes prepared statements the cache lets go of
pub struct CloseStatement;

impl EvictionListener<Arc<dyn PreparedStatement>> for CloseStatement {
    fn on_evict(&self, signature: &StatementSignature, statement: Arc<dyn PreparedStatement>) {
        if let Err(e) = statement.close() {
            tracing::warn!(statement = %signature, error = %e, "failed to close evicted statement");
        }
    }
}

/// A connection owned by a pool, with a per-connection statement cache.
///
/// Statements prepared through [`prepare`](Self::prepare) are reused on
/// identical requests. Dropping the handle does not close the connection;
/// the pool calls [`close`](Self::close) when it releases it.
pub struct PooledConnectionHandle {
    connection: Arc<dyn Connection>,
    statements: StatementCache<Arc<dyn PreparedStatement>, CloseStatement>,
    check_query: Option<String>,
    check_timeout: Duration,
    profile: Arc<StatementProfile>,
    /// Statement used by the most recent operation, cancelled on close
    last_statement: Mutex<Option<Weak<dyn PreparedStatement>>>,
}

impl PooledConnectionHandle {
    pub fn new(
        connection: Arc<dyn Connection>,
        statement_cache_size: usize,
        check_query: Option<String>,
        check_timeout: Duration,
        profile: Arc<StatementProfile>,
    ) -> Self {
        Self {
            connection,
            statements: StatementCache::new(statement_cache_size, CloseStatement),
            check_query,
            check_timeout,
            profile,
            last_statement: Mutex::new(None),
        }
    }

    /// The underlying connection
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn driver_name(&self) -> &str {
        self.connection.driver_name()
    }

    /// Prepare a statement, reusing a cached one when the signature matches.
    ///
    /// Cached statements come back with their bound parameters cleared.
    pub async fn prepare(&self, signature: &StatementSignature) -> Result<StatementHandle> {
        if let Some(statement) = self.statements.get(signature) {
            statement.clear_parameters();
            self.remember(&statement);
            return Ok(StatementHandle::new(statement, true, self.profile.clone()));
        }

        let prepared = self.connection.prepare(signature).await?;
        let (statement, cached) = match self.statements.insert(signature.clone(), prepared) {
            Admission::Cached(statement) => {
                statement.clear_parameters();
                (statement, true)
            }
            Admission::Uncached(statement) => (statement, false),
        };
        self.remember(&statement);
        Ok(StatementHandle::new(statement, cached, self.profile.clone()))
    }

    /// Run a statement without preparing it
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let started = Instant::now();
        let result = self.connection.execute(sql, params).await;
        self.profile.record(sql, started.elapsed());
        result
    }

    /// Run a query without preparing it
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let started = Instant::now();
        let result = self.connection.query(sql, params).await;
        self.profile.record(sql, started.elapsed());
        result
    }

    /// Liveness check: the check query if configured, else the native probe.
    ///
    /// Never fails; any problem counts as invalid.
    pub async fn is_valid(&self) -> bool {
        match ping_database(
            self.connection.as_ref(),
            self.check_query.as_deref(),
            self.check_timeout,
        )
        .await
        {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %e, "connection failed liveness check");
                false
            }
        }
    }

    /// Bring the connection back to a clean state before it goes idle.
    ///
    /// Rolls back and restores auto-commit if a transaction was left open,
    /// and clears warnings. An error means the connection must be discarded.
    pub async fn reset_for_return(&self) -> Result<()> {
        if self.connection.is_closed() {
            return Err(ZqlzError::Connection("connection is closed".into()));
        }
        if !self.connection.auto_commit() {
            self.connection.rollback().await?;
            self.connection.set_auto_commit(true).await?;
        }
        self.connection.clear_warnings();
        self.last_statement.lock().take();
        Ok(())
    }

    /// Change how many statements this connection keeps; zero closes them all
    pub fn set_statement_cache_size(&self, size: usize) {
        self.statements.set_capacity(size);
    }

    pub fn statement_cache_stats(&self) -> CacheStats {
        self.statements.stats()
    }

    pub fn cached_statement_count(&self) -> usize {
        self.statements.len()
    }

    /// Close the connection for good.
    ///
    /// Cancels the last statement, closes every cached statement, rolls back
    /// an open transaction and closes the connection. A connection that is
    /// already half dead is tolerated up to the final close.
    pub async fn close(&self) -> Result<()> {
        let last = self.last_statement.lock().take();
        if let Some(statement) = last.and_then(|weak| weak.upgrade()) {
            statement.cancel();
        }

        self.statements.clear();

        if !self.connection.is_closed() && !self.connection.auto_commit() {
            if let Err(e) = self.connection.rollback().await {
                tracing::warn!(error = %e, "rollback before close failed");
            }
        }
        self.connection.close().await
    }

    fn remember(&self, statement: &Arc<dyn PreparedStatement>) {
        *self.last_statement.lock() = Some(Arc::downgrade(statement));
    }
}

/// A statement obtained from [`PooledConnectionHandle::prepare`]
///
/// Cached statements stay open for reuse when the handle is dropped;
/// uncached ones are closed.
pub struct StatementHandle {
    statement: Arc<dyn PreparedStatement>,
    cached: bool,
    profile: Arc<StatementProfile>,
    finished: bool,
}

impl StatementHandle {
    fn new(statement: Arc<dyn PreparedStatement>, cached: bool, profile: Arc<StatementProfile>) -> Self {
        Self {
            statement,
            cached,
            profile,
            finished: false,
        }
    }

    pub fn sql(&self) -> &str {
        self.statement.sql()
    }

    /// Whether the statement lives in the connection's cache
    pub fn is_cached(&self) -> bool {
        self.cached
    }

    /// Bind a value to the 1-based parameter `index`
    pub fn bind(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        self.statement.bind(index, value.into())
    }

    pub async fn execute(&self, params: &[Value]) -> Result<StatementResult> {
        let started = Instant::now();
        let result = self.statement.execute(params).await;
        self.profile.record(self.statement.sql(), started.elapsed());
        result
    }

    pub async fn query(&self, params: &[Value]) -> Result<QueryResult> {
        let started = Instant::now();
        let result = self.statement.query(params).await;
        self.profile.record(self.statement.sql(), started.elapsed());
        result
    }

    /// Stored-procedure operations, when prepared from a callable signature
    pub fn as_callable(&self) -> Option<&dyn CallableStatement> {
        self.statement.as_callable()
    }

    pub fn cancel(&self) {
        self.statement.cancel();
    }

    /// Finish with the statement. Uncached statements are closed now.
    pub fn close(mut self) -> Result<()> {
        self.finished = true;
        if self.cached {
            Ok(())
        } else {
            self.statement.close()
        }
    }
}

impl Drop for StatementHandle {
    fn drop(&mut self) {
        if !self.finished && !self.cached {
            if let Err(e) = self.statement.close() {
                tracing::warn!(error = %e, "failed to close uncached statement");
            }
        }
    }
}
