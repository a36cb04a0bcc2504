//! Database driver trait definition

use crate::{Connection, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A database driver: knows how to open connections for a configuration
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Driver identifier (e.g., "sqlite", "postgres")
    fn id(&self) -> &'static str {
        self.name()
    }

    /// Driver name
    fn name(&self) -> &'static str;

    /// Human readable name
    fn display_name(&self) -> &'static str {
        self.name()
    }

    /// Open a new connection
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>>;

    /// Open a connection, run a trivial query and close it again
    async fn test_connection(&self, config: &ConnectionConfig) -> Result<()> {
        let conn = self.connect(config).await?;
        conn.query("SELECT 1", &[]).await?;
        conn.close().await
    }
}

/// Connection configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Display name
    pub name: String,
    /// Driver ID (e.g., "postgres", "mysql", "sqlite")
    pub driver: String,
    /// Host address (empty for file-based databases)
    #[serde(default)]
    pub host: String,
    /// Port number (0 for default or file-based)
    #[serde(default)]
    pub port: u16,
    /// Database name or file path
    #[serde(default)]
    pub database: Option<String>,
    /// Username
    #[serde(default)]
    pub username: Option<String>,
    /// Password
    #[serde(default)]
    pub password: Option<String>,
    /// Additional connection parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl ConnectionConfig {
    /// Create a new configuration with default values
    pub fn new(driver: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            driver: driver.to_string(),
            ..Default::default()
        }
    }

    /// Create a SQLite configuration
    pub fn new_sqlite(database_path: &str) -> Self {
        let mut config = Self::new("sqlite", "SQLite Database");
        config.database = Some(database_path.to_string());
        config
    }

    /// Set a connection parameter
    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        let val = value.into();
        let str_val = match val {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        self.params.insert(key.to_string(), str_val);
        self
    }

    /// Get a string parameter
    pub fn get_string(&self, key: &str) -> Option<String> {
        // First check params
        if let Some(val) = self.params.get(key) {
            return Some(val.clone());
        }
        // Check known fields
        match key {
            "host" => Some(self.host.clone()),
            "database" | "path" => self.database.clone(),
            "username" | "user" => self.username.clone(),
            "password" => self.password.clone(),
            _ => None,
        }
    }
}
