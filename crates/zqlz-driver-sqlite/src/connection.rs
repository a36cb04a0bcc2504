//! SQLite connection implementation

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection as RusqliteConnection, InterruptHandle, OpenFlags, params_from_iter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use zqlz_core::{
    ColumnMeta, Connection, CursorConcurrency, CursorType, PreparedStatement, QueryCancelHandle,
    QueryResult, Result, Row, StatementResult, StatementSignature, Value, ZqlzError,
};

use crate::statement::SqlitePreparedStatement;

/// Compiled statements rusqlite keeps per connection unless told otherwise.
///
/// Sized above the pool's default statement cache so every statement the
/// pool caches stays compiled.
pub const DEFAULT_STATEMENT_CACHE_CAPACITY: usize = 64;

/// The rusqlite connection, shared with the statements prepared on it.
/// `None` once the connection has been closed.
pub(crate) type SharedConnection = Arc<Mutex<Option<RusqliteConnection>>>;

/// Cancel handle for SQLite queries.
///
/// This wraps the rusqlite `InterruptHandle` and can be called from any thread
/// to interrupt a running query. The interrupted query will return SQLITE_INTERRUPT.
pub struct SqliteCancelHandle {
    interrupt_handle: Arc<InterruptHandle>,
}

impl QueryCancelHandle for SqliteCancelHandle {
    fn cancel(&self) {
        tracing::debug!("interrupting SQLite query");
        self.interrupt_handle.interrupt();
    }
}

/// SQLite connection wrapper
///
/// Tracks auto-commit itself: switching auto-commit off opens a transaction,
/// and every commit or rollback in manual mode starts the next one.
pub struct SqliteConnection {
    conn: SharedConnection,
    interrupt_handle: Arc<InterruptHandle>,
    auto_commit: AtomicBool,
}

impl SqliteConnection {
    /// Open a SQLite database
    pub fn open(path: &str) -> Result<Self> {
        Self::open_with_statement_cache(path, DEFAULT_STATEMENT_CACHE_CAPACITY)
    }

    /// Open a SQLite database keeping up to `capacity` compiled statements
    pub fn open_with_statement_cache(path: &str, capacity: usize) -> Result<Self> {
        tracing::info!(path = %path, statement_cache = capacity, "opening SQLite database");
        let expanded_path = Self::expand_path(path)?;

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = if path == ":memory:" {
            RusqliteConnection::open_in_memory().map_err(|e| {
                ZqlzError::Connection(format!("Failed to open in-memory database: {}", e))
            })?
        } else {
            if !expanded_path.starts_with("file:") {
                let file_path = std::path::Path::new(&expanded_path);
                if let Some(parent) = file_path.parent()
                    && !parent.exists()
                {
                    return Err(ZqlzError::Connection(format!(
                        "Parent directory does not exist: {}",
                        parent.display()
                    )));
                }
            }

            RusqliteConnection::open_with_flags(&expanded_path, flags).map_err(|e| {
                ZqlzError::Connection(format!(
                    "Failed to open SQLite database at '{}': {}",
                    expanded_path, e
                ))
            })?
        };

        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| ZqlzError::Connection(format!("Failed to enable foreign keys: {}", e)))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| ZqlzError::Connection(format!("Failed to set journal mode: {}", e)))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| ZqlzError::Connection(format!("Failed to set synchronous mode: {}", e)))?;
        // Pooled connections contend for the same file
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| ZqlzError::Connection(format!("Failed to set busy timeout: {}", e)))?;

        conn.set_prepared_statement_cache_capacity(capacity);
        let interrupt_handle = Arc::new(conn.get_interrupt_handle());

        tracing::info!(path = %expanded_path, "SQLite database connection established");
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            interrupt_handle,
            auto_commit: AtomicBool::new(true),
        })
    }

    /// Expand path to handle ~ (home directory) and relative paths
    fn expand_path(path: &str) -> Result<String> {
        if path == ":memory:" || path.starts_with("file:") {
            return Ok(path.to_string());
        }

        let expanded = if let Some(rest) = path.strip_prefix("~/") {
            match std::env::var_os("HOME") {
                Some(home) => std::path::PathBuf::from(home)
                    .join(rest)
                    .to_string_lossy()
                    .to_string(),
                None => {
                    return Err(ZqlzError::Configuration(
                        "Unable to determine HOME directory".into(),
                    ));
                }
            }
        } else if path.starts_with('~') {
            return Err(ZqlzError::Configuration(
                "User-specific home directories (~user) are not supported".into(),
            ));
        } else {
            path.to_string()
        };

        let path_buf = std::path::PathBuf::from(&expanded);
        if path_buf.is_relative() {
            Ok(std::env::current_dir()
                .map_err(ZqlzError::Io)?
                .join(path_buf)
                .to_string_lossy()
                .to_string())
        } else {
            Ok(expanded)
        }
    }

    /// Whether SQLite itself has a transaction open
    pub fn in_transaction(&self) -> bool {
        self.conn
            .lock()
            .as_ref()
            .is_some_and(|conn| !conn.is_autocommit())
    }

    /// Statements SQLite currently holds compiled for this connection
    #[cfg(test)]
    pub(crate) fn live_statement_count(&self) -> usize {
        let guard = self.conn.lock();
        let Some(conn) = guard.as_ref() else {
            return 0;
        };
        let mut count = 0;
        // SAFETY: the lock keeps the connection open and the statements are only walked
        unsafe {
            let db = conn.handle();
            let mut stmt = rusqlite::ffi::sqlite3_next_stmt(db, std::ptr::null_mut());
            while !stmt.is_null() {
                count += 1;
                stmt = rusqlite::ffi::sqlite3_next_stmt(db, stmt);
            }
        }
        count
    }

    fn run_batch(&self, sql: &str) -> Result<()> {
        let guard = self.conn.lock();
        let conn = open_connection(&guard)?;
        conn.execute_batch(sql)
            .map_err(|e| ZqlzError::Query(format!("Failed to run {}: {}", sql, e)))
    }

    /// End the current transaction with `verb` and, in manual mode, open the next
    fn finish_transaction(&self, verb: &str) -> Result<()> {
        let guard = self.conn.lock();
        let conn = open_connection(&guard)?;
        if !conn.is_autocommit() {
            conn.execute_batch(verb)
                .map_err(|e| ZqlzError::Query(format!("Failed to {}: {}", verb.to_lowercase(), e)))?;
        }
        if !self.auto_commit.load(Ordering::SeqCst) {
            conn.execute_batch("BEGIN DEFERRED")
                .map_err(|e| ZqlzError::Query(format!("Failed to begin transaction: {}", e)))?;
        }
        Ok(())
    }
}

/// The open connection behind `guard`, failing if it has been closed
pub(crate) fn open_connection<'a>(
    guard: &'a MutexGuard<'_, Option<RusqliteConnection>>,
) -> Result<&'a RusqliteConnection> {
    guard
        .as_ref()
        .ok_or_else(|| ZqlzError::Connection("SQLite connection is closed".into()))
}

#[async_trait]
impl Connection for SqliteConnection {
    fn driver_name(&self) -> &str {
        "sqlite"
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let guard = self.conn.lock();
        let conn = open_connection(&guard)?;
        let rows_affected = conn
            .execute(sql, params_from_iter(values_to_rusqlite(params).iter()))
            .map_err(|e| ZqlzError::Query(format!("Failed to execute statement: {}", e)))?;

        tracing::debug!(affected_rows = rows_affected, "statement executed");
        Ok(StatementResult::affected(rows_affected as u64))
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let guard = self.conn.lock();
        let conn = open_connection(&guard)?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| ZqlzError::Query(format!("Failed to prepare query: {}", e)))?;
        run_query(&mut stmt, params)
    }

    #[tracing::instrument(skip(self, signature), fields(statement = %signature))]
    async fn prepare(&self, signature: &StatementSignature) -> Result<Arc<dyn PreparedStatement>> {
        if signature.is_callable() {
            return Err(ZqlzError::NotSupported(
                "SQLite does not support stored procedure calls".into(),
            ));
        }
        if let Some(cursor) = signature.cursor()
            && (cursor.cursor_type != CursorType::ForwardOnly
                || cursor.concurrency == CursorConcurrency::Updatable)
        {
            return Err(ZqlzError::NotSupported(
                "SQLite only supports forward-only, read-only cursors".into(),
            ));
        }

        let parameter_count = {
            let guard = self.conn.lock();
            let conn = open_connection(&guard)?;
            let stmt = conn
                .prepare_cached(signature.sql())
                .map_err(|e| ZqlzError::Statement(format!("Failed to prepare statement: {}", e)))?;
            stmt.parameter_count()
        };

        let generated_keys = signature
            .generated_keys()
            .is_some_and(|keys| keys.is_requested());

        tracing::debug!(parameter_count, "statement prepared");
        Ok(Arc::new(SqlitePreparedStatement::new(
            self.conn.clone(),
            self.interrupt_handle.clone(),
            signature.sql().to_string(),
            parameter_count,
            generated_keys,
        )))
    }

    async fn is_valid(&self, _timeout: Duration) -> bool {
        let guard = self.conn.lock();
        match guard.as_ref() {
            Some(conn) => conn
                .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .is_ok(),
            None => false,
        }
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit.load(Ordering::SeqCst)
    }

    async fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        let was = self.auto_commit.swap(auto_commit, Ordering::SeqCst);
        match (was, auto_commit) {
            (true, false) => {
                tracing::debug!("beginning SQLite transaction");
                if let Err(e) = self.run_batch("BEGIN DEFERRED") {
                    self.auto_commit.store(true, Ordering::SeqCst);
                    return Err(e);
                }
            }
            (false, true) => {
                if self.in_transaction() {
                    self.run_batch("COMMIT")?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.finish_transaction("COMMIT")
    }

    async fn rollback(&self) -> Result<()> {
        self.finish_transaction("ROLLBACK")
    }

    async fn close(&self) -> Result<()> {
        let Some(conn) = self.conn.lock().take() else {
            return Ok(());
        };
        tracing::info!("closing SQLite connection");
        conn.close().map_err(|(_, e)| {
            ZqlzError::Connection(format!("Failed to close SQLite connection: {}", e))
        })
    }

    fn is_closed(&self) -> bool {
        self.conn.lock().is_none()
    }

    fn cancel_handle(&self) -> Option<Arc<dyn QueryCancelHandle>> {
        Some(Arc::new(SqliteCancelHandle {
            interrupt_handle: self.interrupt_handle.clone(),
        }))
    }
}

/// Run a prepared rusqlite statement and collect every row
pub(crate) fn run_query(stmt: &mut rusqlite::Statement<'_>, params: &[Value]) -> Result<QueryResult> {
    let start_time = Instant::now();

    let mut column_names: Vec<String> = Vec::with_capacity(stmt.column_count());
    let mut columns: Vec<ColumnMeta> = Vec::with_capacity(stmt.column_count());
    for (idx, col) in stmt.columns().iter().enumerate() {
        let name = col.name().to_string();
        column_names.push(name.clone());
        columns.push(ColumnMeta {
            name,
            data_type: col.decl_type().unwrap_or("DYNAMIC").to_string(),
            nullable: true,
            ordinal: idx,
        });
    }

    let mut rows = Vec::new();
    let mut query_rows = stmt
        .query(params_from_iter(values_to_rusqlite(params).iter()))
        .map_err(|e| ZqlzError::Query(format!("Failed to execute query: {}", e)))?;

    while let Some(row) = query_rows
        .next()
        .map_err(|e| ZqlzError::Query(format!("Failed to fetch row: {}", e)))?
    {
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(rusqlite_to_value(row, i)?);
        }
        rows.push(Row::new(column_names.clone(), values));
    }

    let execution_time_ms = start_time.elapsed().as_millis() as u64;
    tracing::debug!(
        row_count = rows.len(),
        execution_time_ms = execution_time_ms,
        "query executed successfully"
    );
    Ok(QueryResult {
        columns,
        rows,
        execution_time_ms,
        warnings: Vec::new(),
    })
}

pub(crate) fn values_to_rusqlite(values: &[Value]) -> Vec<rusqlite::types::Value> {
    values.iter().map(value_to_rusqlite).collect()
}

fn value_to_rusqlite(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(if *b { 1 } else { 0 }),
        Value::Int32(i) => rusqlite::types::Value::Integer(*i as i64),
        Value::Int64(i) => rusqlite::types::Value::Integer(*i),
        Value::Float64(f) => rusqlite::types::Value::Real(*f),
        Value::Decimal(d) => rusqlite::types::Value::Text(d.clone()),
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
        Value::Bytes(b) => rusqlite::types::Value::Blob(b.clone()),
        Value::Json(j) => rusqlite::types::Value::Text(j.to_string()),
    }
}

/// Convert rusqlite row value to our Value type
fn rusqlite_to_value(row: &rusqlite::Row, idx: usize) -> Result<Value> {
    use rusqlite::types::ValueRef;

    let value_ref = row
        .get_ref(idx)
        .map_err(|e| ZqlzError::Query(e.to_string()))?;

    let value = match value_ref {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).to_string()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    };

    Ok(value)
}
