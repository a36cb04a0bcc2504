//! SQLite driver implementation

use async_trait::async_trait;
use std::sync::Arc;
use zqlz_connection::ConnectionFactory;
use zqlz_core::{Connection, ConnectionConfig, DatabaseDriver, Result, ZqlzError};

use crate::SqliteConnection;
use crate::connection::DEFAULT_STATEMENT_CACHE_CAPACITY;

/// SQLite database driver
pub struct SqliteDriver;

impl SqliteDriver {
    /// Create a new SQLite driver instance
    pub fn new() -> Self {
        tracing::debug!("SQLite driver initialized");
        Self
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn database_path(config: &ConnectionConfig) -> Result<String> {
    config
        .get_string("path")
        .or_else(|| config.get_string("database"))
        .ok_or_else(|| {
            ZqlzError::Configuration(
                "SQLite requires 'path' or 'database' parameter. Example: { \"path\": \"/path/to/database.db\" }".into(),
            )
        })
}

#[async_trait]
impl DatabaseDriver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn display_name(&self) -> &'static str {
        "SQLite"
    }

    #[tracing::instrument(skip(self, config), fields(path = config.get_string("path").or_else(|| config.get_string("database")).as_deref()))]
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        let path = database_path(config)?;

        let conn = SqliteConnection::open(&path).map_err(|e| {
            tracing::error!(error = %e, "failed to connect to SQLite database");
            ZqlzError::Connection(format!("Failed to connect to SQLite database: {}", e))
        })?;

        tracing::info!(path = %path, "SQLite connection created");
        Ok(Arc::new(conn))
    }
}

/// Opens SQLite connections to one database for a
/// [`ConnectionPool`](zqlz_connection::ConnectionPool)
///
/// Every pooled connection opens its own handle on the same file, so an
/// in-memory path gives each connection a private database.
#[derive(Debug, Clone)]
pub struct SqliteConnectionFactory {
    path: String,
    statement_cache_capacity: usize,
}

impl SqliteConnectionFactory {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            statement_cache_capacity: DEFAULT_STATEMENT_CACHE_CAPACITY,
        }
    }

    /// Compiled statements each connection keeps. Should be at least the
    /// pool's `statement_cache_size`, or cached statements get re-parsed.
    pub fn with_statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }

    pub fn from_config(config: &ConnectionConfig) -> Result<Self> {
        Ok(Self::new(database_path(config)?))
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl ConnectionFactory for SqliteConnectionFactory {
    #[tracing::instrument(skip(self), fields(path = %self.path))]
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        Ok(Arc::new(SqliteConnection::open_with_statement_cache(
            &self.path,
            self.statement_cache_capacity,
        )?))
    }
}
