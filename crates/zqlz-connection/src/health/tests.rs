//! Tests for the health module

use super::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use zqlz_core::{
    Connection, PreparedStatement, QueryResult, Result, StatementResult, StatementSignature,
    Value, ZqlzError,
};

/// Mock connection with a scriptable check query and validity probe
#[derive(Default)]
struct MockConnection {
    closed: AtomicBool,
    query_fails: AtomicBool,
    invalid: AtomicBool,
    query_delay: Option<Duration>,
}

#[async_trait]
impl Connection for MockConnection {
    fn driver_name(&self) -> &str {
        "mock"
    }

    async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<StatementResult> {
        Ok(StatementResult::default())
    }

    async fn query(&self, _sql: &str, _params: &[Value]) -> Result<QueryResult> {
        if let Some(delay) = self.query_delay {
            tokio::time::sleep(delay).await;
        }
        if self.query_fails.load(Ordering::SeqCst) {
            return Err(ZqlzError::Query("server has gone away".into()));
        }
        Ok(QueryResult::empty())
    }

    async fn prepare(&self, _signature: &StatementSignature) -> Result<Arc<dyn PreparedStatement>> {
        Err(ZqlzError::NotSupported("mock".into()))
    }

    async fn is_valid(&self, _timeout: Duration) -> bool {
        !self.invalid.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

const TIMEOUT: Duration = Duration::from_secs(1);

mod ping_tests {
    use super::*;

    #[test]
    fn test_ping_error_display() {
        let err = PingError::ConnectionClosed;
        assert_eq!(err.to_string(), "Connection is closed");

        let err = PingError::QueryFailed("test error".to_string());
        assert_eq!(err.to_string(), "Ping query failed: test error");

        let err = PingError::Invalid;
        assert_eq!(err.to_string(), "Connection reported itself invalid");

        let err = PingError::Timeout;
        assert_eq!(err.to_string(), "Ping timed out");
    }

    #[tokio::test]
    async fn test_ping_with_check_query() {
        let conn = MockConnection::default();
        assert!(ping_database(&conn, Some("SELECT 1"), TIMEOUT).await.is_ok());

        conn.query_fails.store(true, Ordering::SeqCst);
        let result = ping_database(&conn, Some("SELECT 1"), TIMEOUT).await;
        assert!(matches!(result, Err(PingError::QueryFailed(_))));
    }

    #[tokio::test]
    async fn test_ping_uses_native_probe_without_query() {
        let conn = MockConnection::default();
        // A failing check query does not matter when none is configured
        conn.query_fails.store(true, Ordering::SeqCst);
        assert!(ping_database(&conn, None, TIMEOUT).await.is_ok());

        conn.invalid.store(true, Ordering::SeqCst);
        assert_eq!(
            ping_database(&conn, None, TIMEOUT).await,
            Err(PingError::Invalid)
        );
    }

    #[tokio::test]
    async fn test_ping_closed_connection() {
        let conn = MockConnection::default();
        conn.close().await.expect("close");
        assert_eq!(
            ping_database(&conn, Some("SELECT 1"), TIMEOUT).await,
            Err(PingError::ConnectionClosed)
        );
    }

    #[tokio::test]
    async fn test_ping_times_out() {
        let conn = MockConnection {
            query_delay: Some(Duration::from_millis(500)),
            ..Default::default()
        };
        let result = ping_database(&conn, Some("SELECT 1"), Duration::from_millis(20)).await;
        assert_eq!(result, Err(PingError::Timeout));
    }
}
