//! Connection and prepared statement traits

use crate::{QueryResult, Result, StatementResult, StatementSignature, Value, ZqlzError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Handle for cancelling a running query from any thread.
///
/// This trait allows database drivers to provide a way to interrupt
/// long-running queries. The handle is safe to call from any thread
/// and can be called multiple times (subsequent calls are no-ops).
pub trait QueryCancelHandle: Send + Sync {
    /// Cancel the currently running query on the associated connection.
    ///
    /// This method is safe to call from any thread and is idempotent.
    /// If no query is running, this is a no-op.
    fn cancel(&self);
}

/// A database connection
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g., "sqlite", "postgresql", "mysql")
    fn driver_name(&self) -> &str;

    /// Execute a statement that modifies data (INSERT/UPDATE/DELETE)
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Execute a query that returns rows (SELECT)
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Prepare a statement described by `signature`
    ///
    /// Drivers that cannot honour a requested option (for example a
    /// callable statement on a database without stored procedures) return
    /// `ZqlzError::NotSupported`.
    async fn prepare(&self, signature: &StatementSignature) -> Result<Arc<dyn PreparedStatement>>;

    /// Shallow validity probe.
    ///
    /// The default only looks at the closed flag. Drivers with a cheap
    /// native probe should override it and respect `timeout`.
    async fn is_valid(&self, _timeout: Duration) -> bool {
        !self.is_closed()
    }

    /// Whether each statement commits on its own
    fn auto_commit(&self) -> bool {
        true
    }

    /// Switch auto-commit mode
    async fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        if auto_commit {
            Ok(())
        } else {
            Err(ZqlzError::NotSupported(format!(
                "{} connections do not support manual transactions",
                self.driver_name()
            )))
        }
    }

    /// Commit the current transaction, if any
    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    /// Roll back the current transaction, if any
    async fn rollback(&self) -> Result<()> {
        Ok(())
    }

    /// Warnings accumulated since the last call to `clear_warnings`
    fn warnings(&self) -> Vec<String> {
        Vec::new()
    }

    /// Discard accumulated warnings
    fn clear_warnings(&self) {}

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;

    /// Get a handle that can be used to cancel running queries.
    ///
    /// Returns `None` if the driver does not support query cancellation.
    /// The returned handle is safe to use from any thread.
    fn cancel_handle(&self) -> Option<Arc<dyn QueryCancelHandle>> {
        None
    }
}

/// A prepared statement.
///
/// Parameters can be bound ahead of time with [`bind`](Self::bind) or passed
/// per call; explicit parameters win over bound ones.
#[async_trait]
pub trait PreparedStatement: Send + Sync {
    /// The SQL text the statement was prepared from
    fn sql(&self) -> &str;

    /// Bind a value to the 1-based parameter `index`
    fn bind(&self, index: usize, value: Value) -> Result<()>;

    /// Forget every bound parameter, keeping the prepared plan
    fn clear_parameters(&self);

    /// Execute the prepared statement
    async fn execute(&self, params: &[Value]) -> Result<StatementResult>;

    /// Run the prepared statement as a query
    async fn query(&self, params: &[Value]) -> Result<QueryResult>;

    /// Cancel the statement if it is currently running
    fn cancel(&self) {}

    /// Deallocate the statement. Further use fails.
    fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// Stored-procedure capabilities, present only for callable statements
    fn as_callable(&self) -> Option<&dyn CallableStatement> {
        None
    }
}

/// Extra capabilities of a statement prepared from a callable signature
pub trait CallableStatement: Send + Sync {
    /// Declare the SQL type of the 1-based OUT parameter `index`
    fn register_out_parameter(&self, index: usize, sql_type: &str) -> Result<()>;

    /// Value of an OUT parameter after the last execution
    fn out_parameter(&self, index: usize) -> Option<Value>;
}
