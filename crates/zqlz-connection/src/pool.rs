//! Generic resource pooling
//!
//! [`ResourcePool`] hands out resources created by a [`ResourceProvider`],
//! bounding how many exist at once and reclaiming the ones that go stale.
//! Resources move between three collections under the pool lock:
//!
//! - **idle**: ready for reuse, most recently returned first
//! - **busy**: held by exactly one caller
//! - **dirty**: unusable, waiting for housekeeping to release them
//!
//! Provider calls (allocate, release, check) always happen outside the lock.
//!
//! # Example
//!
//! ```ignore
//! use zqlz_connection::pool::{PoolConfig, ResourcePool};
//!
//! let config = PoolConfig::new(1, 8)
//!     .with_max_wait_ms(5_000)
//!     .with_max_idle_time_ms(300_000);
//!
//! let pool = ResourcePool::new(config, provider)?;
//! let resource = pool.acquire().await?;
//! // Use resource...
//! // Returned to the front of the idle queue on drop
//! ```

mod config;
mod error;
mod housekeeping;
mod pool;
mod provider;
mod scheduler;
mod stats;


pub use config::{PoolConfig, WaitPolicy};
pub use error::PoolError;
pub use housekeeping::HousekeepingReport;
pub use pool::{Pooled, ResourcePool};
pub use provider::{ResourceId, ResourceProvider};
pub use stats::{
    FailureCounts, FailureKind, PoolStats, ResourceDescriptor, ResourceState, Timing,
};
