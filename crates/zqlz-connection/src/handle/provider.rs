//! Connection factories and the pool provider built on them

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use zqlz_core::{Connection, ConnectionConfig, DatabaseDriver, Result};

use super::handle::PooledConnectionHandle;
use crate::pool::ResourceProvider;
use crate::statement_cache::StatementProfile;

/// Factory trait for creating new connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Create a new connection
    async fn create(&self) -> Result<Arc<dyn Connection>>;
}

#[async_trait]
impl<T: ConnectionFactory> ConnectionFactory for Arc<T> {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        (**self).create().await
    }
}

/// Opens connections through a [`DatabaseDriver`] with a fixed configuration
pub struct DriverConnectionFactory {
    driver: Arc<dyn DatabaseDriver>,
    config: ConnectionConfig,
}

impl DriverConnectionFactory {
    pub fn new(driver: Arc<dyn DatabaseDriver>, config: ConnectionConfig) -> Self {
        Self { driver, config }
    }
}

#[async_trait]
impl ConnectionFactory for DriverConnectionFactory {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        self.driver.connect(&self.config).await
    }
}

/// [`ResourceProvider`] that wraps factory connections in [`PooledConnectionHandle`]s
pub struct ConnectionProvider {
    factory: Box<dyn ConnectionFactory>,
    statement_cache_size: AtomicUsize,
    check_query: Option<String>,
    check_timeout: Duration,
    profile: Arc<StatementProfile>,
}

impl ConnectionProvider {
    pub fn new<F: ConnectionFactory>(
        factory: F,
        statement_cache_size: usize,
        check_query: Option<String>,
        check_timeout: Duration,
    ) -> Self {
        Self {
            factory: Box::new(factory),
            statement_cache_size: AtomicUsize::new(statement_cache_size),
            check_query,
            check_timeout,
            profile: Arc::new(StatementProfile::default()),
        }
    }

    /// Cache size given to connections allocated from now on
    pub fn statement_cache_size(&self) -> usize {
        self.statement_cache_size.load(Ordering::Relaxed)
    }

    pub(crate) fn set_statement_cache_size(&self, size: usize) {
        self.statement_cache_size.store(size, Ordering::Relaxed);
    }

    /// Execution profile shared by every connection of this provider
    pub fn profile(&self) -> &Arc<StatementProfile> {
        &self.profile
    }
}

#[async_trait]
impl ResourceProvider for ConnectionProvider {
    type Handle = Arc<PooledConnectionHandle>;

    async fn allocate(&self) -> Result<Self::Handle> {
        let connection = self.factory.create().await?;
        tracing::debug!(driver = %connection.driver_name(), "opened pooled connection");
        Ok(Arc::new(PooledConnectionHandle::new(
            connection,
            self.statement_cache_size(),
            self.check_query.clone(),
            self.check_timeout,
            self.profile.clone(),
        )))
    }

    async fn release(&self, handle: Self::Handle) -> Result<()> {
        handle.close().await
    }

    async fn check(&self, handle: &Self::Handle) -> bool {
        handle.is_valid().await
    }

    fn describe(&self, handle: &Self::Handle) -> Option<String> {
        Some(format!(
            "{} connection, {} cached statements",
            handle.driver_name(),
            handle.cached_statement_count()
        ))
    }
}
