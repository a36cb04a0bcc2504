//! SQLite prepared statements
//!
//! rusqlite statements borrow their connection, so a prepared statement keeps
//! the SQL text and its parameter slots and runs through the connection's own
//! compiled-statement cache on every execution. Closing a statement evicts its
//! entry from that cache, finalizing the compiled statement.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{InterruptHandle, params_from_iter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use zqlz_core::{PreparedStatement, QueryResult, Result, StatementResult, Value, ZqlzError};

use crate::connection::{SharedConnection, open_connection, run_query, values_to_rusqlite};

/// A statement prepared on a [`SqliteConnection`](crate::SqliteConnection)
pub struct SqlitePreparedStatement {
    conn: SharedConnection,
    interrupt_handle: Arc<InterruptHandle>,
    sql: String,
    /// Bound values by position; slot 0 holds parameter 1
    parameters: Mutex<Vec<Value>>,
    generated_keys: bool,
    closed: AtomicBool,
}

impl SqlitePreparedStatement {
    pub(crate) fn new(
        conn: SharedConnection,
        interrupt_handle: Arc<InterruptHandle>,
        sql: String,
        parameter_count: usize,
        generated_keys: bool,
    ) -> Self {
        Self {
            conn,
            interrupt_handle,
            sql,
            parameters: Mutex::new(vec![Value::Null; parameter_count]),
            generated_keys,
            closed: AtomicBool::new(false),
        }
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.lock().len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ZqlzError::Statement("statement is closed".into()));
        }
        Ok(())
    }

    /// Explicit parameters win over bound ones
    fn effective_params(&self, params: &[Value]) -> Vec<Value> {
        if params.is_empty() {
            self.parameters.lock().clone()
        } else {
            params.to_vec()
        }
    }
}

#[async_trait]
impl PreparedStatement for SqlitePreparedStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn bind(&self, index: usize, value: Value) -> Result<()> {
        self.ensure_open()?;
        let mut parameters = self.parameters.lock();
        let count = parameters.len();
        match index.checked_sub(1).and_then(|slot| parameters.get_mut(slot)) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(ZqlzError::Statement(format!(
                "parameter index {} out of range (statement has {} parameters)",
                index, count
            ))),
        }
    }

    fn clear_parameters(&self) {
        self.parameters.lock().fill(Value::Null);
    }

    #[tracing::instrument(skip(self, params), fields(sql_preview = %self.sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, params: &[Value]) -> Result<StatementResult> {
        self.ensure_open()?;
        let values = values_to_rusqlite(&self.effective_params(params));

        let guard = self.conn.lock();
        let conn = open_connection(&guard)?;
        let mut stmt = conn
            .prepare_cached(&self.sql)
            .map_err(|e| ZqlzError::Statement(format!("Failed to prepare statement: {}", e)))?;
        let rows_affected = stmt
            .execute(params_from_iter(values.iter()))
            .map_err(|e| ZqlzError::Query(format!("Failed to execute statement: {}", e)))?;

        let mut result = StatementResult::affected(rows_affected as u64);
        if self.generated_keys && rows_affected > 0 {
            result.generated_keys.push(Value::Int64(conn.last_insert_rowid()));
        }
        tracing::debug!(affected_rows = rows_affected, "prepared statement executed");
        Ok(result)
    }

    #[tracing::instrument(skip(self, params), fields(sql_preview = %self.sql.chars().take(100).collect::<String>()))]
    async fn query(&self, params: &[Value]) -> Result<QueryResult> {
        self.ensure_open()?;
        let params = self.effective_params(params);

        let guard = self.conn.lock();
        let conn = open_connection(&guard)?;
        let mut stmt = conn
            .prepare_cached(&self.sql)
            .map_err(|e| ZqlzError::Statement(format!("Failed to prepare statement: {}", e)))?;
        run_query(&mut stmt, &params)
    }

    fn cancel(&self) {
        self.interrupt_handle.interrupt();
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let guard = self.conn.lock();
        if let Some(conn) = guard.as_ref() {
            match conn.prepare_cached(&self.sql) {
                Ok(stmt) => stmt.discard(),
                Err(e) => tracing::debug!(error = %e, "no compiled statement to finalize"),
            }
        }
        tracing::trace!(sql_preview = %self.sql.chars().take(100).collect::<String>(), "statement closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
