//! Errors that cross the pool boundary

use std::time::Duration;

use thiserror::Error;
use zqlz_core::ZqlzError;

/// Failure of [`ResourcePool::acquire`](super::ResourcePool::acquire).
///
/// Failed health checks, busy timeouts and release failures never show up
/// here; they are logged and counted in the pool statistics instead.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No resource became available within the wait budget
    #[error("Pool exhausted: no resource available after waiting {waited:?}")]
    Exhausted { waited: Duration },

    /// The provider failed to create a new resource
    #[error("Failed to allocate pooled resource: {0}")]
    Allocation(#[source] ZqlzError),

    /// The pool was closed
    #[error("Pool is closed")]
    Closed,
}

impl PoolError {
    /// Whether retrying later may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            PoolError::Exhausted { .. } => true,
            PoolError::Allocation(e) => !matches!(e, ZqlzError::Configuration(_)),
            PoolError::Closed => false,
        }
    }
}

impl From<PoolError> for ZqlzError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted { .. } => ZqlzError::Timeout(err.to_string()),
            PoolError::Allocation(source) => source,
            PoolError::Closed => ZqlzError::Connection(err.to_string()),
        }
    }
}
