//! Tests for pooled connections and their statement caches

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use zqlz_core::{
    CallableStatement, Connection, ConnectionConfig, CursorConcurrency, CursorOptions,
    CursorType, DatabaseDriver, PreparedStatement, QueryResult, Result, StatementResult,
    StatementSignature, Value, ZqlzError,
};

use super::connection_pool::ConnectionPool;
use super::provider::{ConnectionFactory, DriverConnectionFactory};
use crate::pool::{FailureKind, PoolConfig};

/// Mock prepared statement recording binds, cancels and closes
struct MockStatement {
    sql: String,
    callable: bool,
    bound: Mutex<Vec<(usize, Value)>>,
    out_types: Mutex<Vec<(usize, String)>>,
    closes: AtomicUsize,
    cancels: AtomicUsize,
}

impl MockStatement {
    fn bound(&self) -> Vec<(usize, Value)> {
        self.bound.lock().clone()
    }

    fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PreparedStatement for MockStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn bind(&self, index: usize, value: Value) -> Result<()> {
        if index == 0 {
            return Err(ZqlzError::Statement("parameter indexes start at 1".into()));
        }
        self.bound.lock().push((index, value));
        Ok(())
    }

    fn clear_parameters(&self) {
        self.bound.lock().clear();
    }

    async fn execute(&self, _params: &[Value]) -> Result<StatementResult> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        Ok(StatementResult::affected(1))
    }

    async fn query(&self, _params: &[Value]) -> Result<QueryResult> {
        Ok(QueryResult::empty())
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    fn as_callable(&self) -> Option<&dyn CallableStatement> {
        if self.callable { Some(self) } else { None }
    }
}

impl CallableStatement for MockStatement {
    fn register_out_parameter(&self, index: usize, sql_type: &str) -> Result<()> {
        self.out_types.lock().push((index, sql_type.to_string()));
        Ok(())
    }

    fn out_parameter(&self, index: usize) -> Option<Value> {
        self.out_types
            .lock()
            .iter()
            .find(|(i, _)| *i == index)
            .map(|_| Value::Int64(index as i64))
    }
}

/// Mock connection with transaction state and scriptable failures
#[derive(Default)]
struct MockConnection {
    prepared: Mutex<Vec<Arc<MockStatement>>>,
    auto_commit: AtomicBool,
    rollbacks: AtomicUsize,
    fail_rollback: AtomicBool,
    query_fails: AtomicBool,
    invalid: AtomicBool,
    closed: AtomicBool,
    warnings: Mutex<Vec<String>>,
}

impl MockConnection {
    fn new() -> Self {
        let conn = Self::default();
        conn.auto_commit.store(true, Ordering::SeqCst);
        conn
    }

    fn prepare_count(&self) -> usize {
        self.prepared.lock().len()
    }

    fn statement(&self, index: usize) -> Arc<MockStatement> {
        self.prepared.lock()[index].clone()
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn driver_name(&self) -> &str {
        "mock"
    }

    async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<StatementResult> {
        self.warnings.lock().push("1 row truncated".into());
        Ok(StatementResult::affected(1))
    }

    async fn query(&self, _sql: &str, _params: &[Value]) -> Result<QueryResult> {
        if self.query_fails.load(Ordering::SeqCst) {
            return Err(ZqlzError::Connection("broken pipe".into()));
        }
        Ok(QueryResult::empty())
    }

    async fn prepare(&self, signature: &StatementSignature) -> Result<Arc<dyn PreparedStatement>> {
        let statement = Arc::new(MockStatement {
            sql: signature.sql().to_string(),
            callable: signature.is_callable(),
            bound: Mutex::new(Vec::new()),
            out_types: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
        });
        self.prepared.lock().push(statement.clone());
        Ok(statement)
    }

    async fn is_valid(&self, _timeout: Duration) -> bool {
        !self.is_closed() && !self.invalid.load(Ordering::SeqCst)
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit.load(Ordering::SeqCst)
    }

    async fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        self.auto_commit.store(auto_commit, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        if self.fail_rollback.load(Ordering::SeqCst) {
            return Err(ZqlzError::Connection("connection reset by peer".into()));
        }
        Ok(())
    }

    fn warnings(&self) -> Vec<String> {
        self.warnings.lock().clone()
    }

    fn clear_warnings(&self) {
        self.warnings.lock().clear();
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Mock factory that keeps every connection it created
#[derive(Default)]
struct MockConnectionFactory {
    connections: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockConnectionFactory {
    fn count(&self) -> usize {
        self.connections.lock().len()
    }

    fn connection(&self, index: usize) -> Arc<MockConnection> {
        self.connections.lock()[index].clone()
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        let conn = Arc::new(MockConnection::new());
        self.connections.lock().push(conn.clone());
        Ok(conn)
    }
}

fn test_config(max_size: usize) -> PoolConfig {
    PoolConfig::new(0, max_size).with_housekeeping_period_ms(0)
}

fn test_pool(config: PoolConfig) -> (ConnectionPool, Arc<MockConnectionFactory>) {
    let factory = Arc::new(MockConnectionFactory::default());
    let pool = ConnectionPool::new(config, factory.clone()).expect("create pool");
    (pool, factory)
}

// =============================================================================
// Statement caching
// =============================================================================

#[tokio::test]
async fn test_prepare_reuses_cached_statement() {
    let (pool, factory) = test_pool(test_config(2));
    let conn = pool.get().await.expect("get connection");
    let signature = StatementSignature::new("SELECT * FROM users WHERE id = ?");

    let first = conn.prepare(&signature).await.expect("prepare");
    first.bind(1, 42i64).expect("bind");
    assert!(first.is_cached());
    drop(first);

    let second = conn.prepare(&signature).await.expect("prepare again");
    assert!(second.is_cached());

    let mock = factory.connection(0);
    assert_eq!(mock.prepare_count(), 1);
    // Parameters from the previous use are cleared on reuse
    assert!(mock.statement(0).bound().is_empty());
    assert_eq!(mock.statement(0).close_count(), 0);

    let stats = conn.statement_cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn test_cursor_option_change_prepares_again() {
    let (pool, factory) = test_pool(test_config(2));
    let conn = pool.get().await.expect("get connection");

    let read_only = StatementSignature::new("SELECT * FROM t").with_cursor(CursorOptions::new(
        CursorType::ScrollSensitive,
        CursorConcurrency::ReadOnly,
    ));
    let updatable = StatementSignature::new("SELECT * FROM t").with_cursor(CursorOptions::new(
        CursorType::ScrollSensitive,
        CursorConcurrency::Updatable,
    ));

    conn.prepare(&read_only).await.expect("prepare");
    conn.prepare(&updatable).await.expect("prepare");
    conn.prepare(&read_only).await.expect("prepare");

    assert_eq!(factory.connection(0).prepare_count(), 2);
    assert_eq!(conn.statement_cache_stats().hits, 1);
}

#[tokio::test]
async fn test_cache_capacity_two_evicts_first_statement() {
    let (pool, factory) = test_pool(test_config(1).with_statement_cache_size(2));
    let conn = pool.get().await.expect("get connection");

    for sql in ["SELECT 'A'", "SELECT 'B'", "SELECT 'C'"] {
        conn.prepare(&StatementSignature::new(sql)).await.expect("prepare");
    }

    let mock = factory.connection(0);
    assert_eq!(mock.statement(0).close_count(), 1);
    assert_eq!(mock.statement(1).close_count(), 0);
    assert_eq!(mock.statement(2).close_count(), 0);
    assert_eq!(conn.cached_statement_count(), 2);
}

#[tokio::test]
async fn test_statement_cache_survives_return_to_pool() {
    let (pool, factory) = test_pool(test_config(1));
    let signature = StatementSignature::new("SELECT 1");

    let conn = pool.get().await.expect("get connection");
    conn.prepare(&signature).await.expect("prepare");
    conn.close().await.expect("return connection");

    let conn = pool.get().await.expect("get connection");
    let statement = conn.prepare(&signature).await.expect("prepare");
    assert!(statement.is_cached());
    assert_eq!(factory.count(), 1);
    assert_eq!(factory.connection(0).prepare_count(), 1);
}

#[tokio::test]
async fn test_disabling_cache_closes_statements_on_every_connection() {
    let (pool, factory) = test_pool(test_config(2));
    let signature = StatementSignature::new("SELECT 1");

    let busy = pool.get().await.expect("get connection");
    busy.prepare(&signature).await.expect("prepare");
    let idle = pool.get().await.expect("get connection");
    idle.prepare(&signature).await.expect("prepare");
    drop(idle);

    pool.set_statement_cache_size(0);

    assert_eq!(factory.connection(0).statement(0).close_count(), 1);
    assert_eq!(factory.connection(1).statement(0).close_count(), 1);
    assert_eq!(pool.config().statement_cache_size(), 0);

    // Uncached statements are closed as soon as the caller is done
    let statement = busy.prepare(&signature).await.expect("prepare");
    assert!(!statement.is_cached());
    drop(statement);
    assert_eq!(factory.connection(0).statement(1).close_count(), 1);
    assert_eq!(busy.cached_statement_count(), 0);
}

#[tokio::test]
async fn test_cache_size_applies_to_new_connections() {
    let (pool, factory) = test_pool(test_config(2));
    pool.set_statement_cache_size(1);

    let conn = pool.get().await.expect("get connection");
    conn.prepare(&StatementSignature::new("SELECT 1")).await.expect("prepare");
    conn.prepare(&StatementSignature::new("SELECT 2")).await.expect("prepare");

    assert_eq!(conn.statement_cache_stats().capacity, 1);
    assert_eq!(factory.connection(0).statement(0).close_count(), 1);
}

#[tokio::test]
async fn test_callable_statement_extension() {
    let (pool, _factory) = test_pool(test_config(1));
    let conn = pool.get().await.expect("get connection");

    let plain = conn
        .prepare(&StatementSignature::new("{call refresh(?)}"))
        .await
        .expect("prepare");
    assert!(plain.as_callable().is_none());

    let call = conn
        .prepare(&StatementSignature::callable("{call refresh(?)}"))
        .await
        .expect("prepare");
    let callable = call.as_callable().expect("callable extension");
    callable
        .register_out_parameter(1, "INTEGER")
        .expect("register out parameter");
    call.execute(&[]).await.expect("execute");
    assert_eq!(callable.out_parameter(1), Some(Value::Int64(1)));
}

#[tokio::test]
async fn test_statement_profile_records_executions() {
    let (pool, _factory) = test_pool(test_config(1));
    let conn = pool.get().await.expect("get connection");

    let insert = conn
        .prepare(&StatementSignature::new("INSERT INTO t VALUES (?)"))
        .await
        .expect("prepare");
    insert.execute(&[Value::Int64(1)]).await.expect("execute");
    insert.execute(&[Value::Int64(2)]).await.expect("execute");
    conn.query("SELECT 1", &[]).await.expect("query");

    let profile = pool.statement_profile(10);
    assert_eq!(profile[0].sql, "INSERT INTO t VALUES (?)");
    assert_eq!(profile[0].count, 2);
    assert!(profile.iter().any(|t| t.sql == "SELECT 1" && t.count == 1));
}

// =============================================================================
// Return and close
// =============================================================================

#[tokio::test]
async fn test_clean_return_restores_auto_commit_and_clears_warnings() {
    let (pool, factory) = test_pool(test_config(1));
    let conn = pool.get().await.expect("get connection");

    conn.connection().set_auto_commit(false).await.expect("begin");
    conn.execute("UPDATE t SET x = 1", &[]).await.expect("execute");
    let id = conn.id();
    conn.close().await.expect("return connection");

    let mock = factory.connection(0);
    assert!(mock.auto_commit.load(Ordering::SeqCst));
    assert_eq!(mock.rollbacks.load(Ordering::SeqCst), 1);
    assert!(mock.warnings().is_empty());
    assert!(!mock.is_closed());

    let again = pool.get().await.expect("get connection");
    assert_eq!(again.id(), id);
}

#[tokio::test]
async fn test_failed_reset_discards_connection() {
    let (pool, factory) = test_pool(test_config(1));
    let conn = pool.get().await.expect("get connection");
    let signature = StatementSignature::new("SELECT 1");
    conn.prepare(&signature).await.expect("prepare");

    let mock = factory.connection(0);
    conn.connection().set_auto_commit(false).await.expect("begin");
    mock.fail_rollback.store(true, Ordering::SeqCst);

    assert!(conn.close().await.is_err());
    assert!(mock.is_closed());
    assert_eq!(mock.statement(0).close_count(), 1);
    assert_eq!(pool.stats().total(), 0);

    // The pool replaces it with a fresh connection
    let replacement = pool.get().await.expect("get connection");
    assert_eq!(factory.count(), 2);
    drop(replacement);
}

#[tokio::test]
async fn test_drop_mid_transaction_retires_connection() {
    let (pool, factory) = test_pool(test_config(1));
    let conn = pool.get().await.expect("get connection");
    conn.connection().set_auto_commit(false).await.expect("begin");
    drop(conn);

    let stats = pool.stats();
    assert_eq!(stats.idle(), 0);
    assert_eq!(stats.dirty(), 1);

    pool.pool().run_housekeeping().await;
    let mock = factory.connection(0);
    assert!(mock.is_closed());
    assert_eq!(mock.rollbacks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_handle_close_cleans_up_everything() {
    let (pool, factory) = test_pool(test_config(1));
    let conn = pool.get().await.expect("get connection");

    conn.prepare(&StatementSignature::new("SELECT 1")).await.expect("prepare");
    let running = conn
        .prepare(&StatementSignature::new("SELECT 2"))
        .await
        .expect("prepare");
    drop(running);
    conn.discard().await;

    let mock = factory.connection(0);
    assert!(mock.is_closed());
    assert_eq!(mock.statement(0).close_count(), 1);
    assert_eq!(mock.statement(1).close_count(), 1);
    // The statement used last is cancelled before the connection closes
    assert_eq!(mock.statement(1).cancels.load(Ordering::SeqCst), 1);
    assert_eq!(pool.stats().total(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connections_checked_out_from_spawned_tasks() {
    let (pool, factory) = test_pool(test_config(2));

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            let conn = pool.get().await.expect("get connection");
            conn.prepare(&StatementSignature::new("SELECT 1"))
                .await
                .expect("prepare");
            conn.close().await.expect("return connection");
        }));
    }
    for task in tasks {
        task.await.expect("join");
    }

    assert!(factory.count() <= 2);
    assert_eq!(pool.stats().busy(), 0);
}

#[tokio::test]
async fn test_pool_close_closes_idle_connections() {
    let (pool, factory) = test_pool(test_config(2));
    let conn = pool.get().await.expect("get connection");
    conn.close().await.expect("return connection");

    pool.close().await;
    assert!(factory.connection(0).is_closed());
    assert!(pool.get().await.is_err());
}

// =============================================================================
// Liveness
// =============================================================================

#[tokio::test]
async fn test_check_query_failure_replaces_connection() {
    let config = test_config(2)
        .with_check_interval_ms(0)
        .with_check_query("SELECT 1");
    let (pool, factory) = test_pool(config);

    let conn = pool.get().await.expect("get connection");
    let first_id = conn.id();
    drop(conn);

    factory.connection(0).query_fails.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(2)).await;
    let conn = pool.get().await.expect("get connection");

    assert_ne!(conn.id(), first_id);
    assert_eq!(factory.count(), 2);
    assert_eq!(pool.stats().failures().get(FailureKind::Check), 1);
}

#[tokio::test]
async fn test_native_probe_used_without_check_query() {
    let (pool, factory) = test_pool(test_config(2).with_check_interval_ms(0));

    drop(pool.get().await.expect("get connection"));
    // Check query failures are irrelevant without a configured check query
    factory.connection(0).query_fails.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(2)).await;
    drop(pool.get().await.expect("get connection"));
    assert_eq!(factory.count(), 1);

    factory.connection(0).invalid.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(2)).await;
    let conn = pool.get().await.expect("get connection");
    assert_eq!(factory.count(), 2);
    assert_eq!(conn.handle().connection().driver_name(), "mock");
}

#[tokio::test]
async fn test_stats_describe_connections() {
    let (pool, _factory) = test_pool(test_config(2));
    let conn = pool.get().await.expect("get connection");
    conn.prepare(&StatementSignature::new("SELECT 1")).await.expect("prepare");

    let stats = pool.stats();
    assert_eq!(
        stats.resources()[0].description.as_deref(),
        Some("mock connection, 1 cached statements")
    );
}

// =============================================================================
// Driver factory
// =============================================================================

struct MockDriver {
    connects: AtomicUsize,
}

#[async_trait]
impl DatabaseDriver for MockDriver {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        if config.get_string("database").is_none() {
            return Err(ZqlzError::Configuration("database is required".into()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockConnection::new()))
    }
}

#[tokio::test]
async fn test_driver_connection_factory() {
    let driver = Arc::new(MockDriver {
        connects: AtomicUsize::new(0),
    });
    let factory = DriverConnectionFactory::new(driver.clone(), ConnectionConfig::new_sqlite(":memory:"));
    let pool = ConnectionPool::new(test_config(1), factory).expect("create pool");

    let conn = pool.get().await.expect("get connection");
    assert_eq!(conn.driver_name(), "mock");
    assert_eq!(driver.connects.load(Ordering::SeqCst), 1);

    let broken = DriverConnectionFactory::new(driver.clone(), ConnectionConfig::new("mock", "no db"));
    let pool = ConnectionPool::new(test_config(1), broken).expect("create pool");
    assert!(pool.get().await.is_err());
}
