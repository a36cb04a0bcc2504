//! Resource provider trait and the pool's per-resource bookkeeping

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use zqlz_core::Result;

/// Supplies, releases and validates the handles a [`ResourcePool`](super::ResourcePool) manages.
///
/// The pool never calls a provider while holding its lock, so implementations
/// may block on I/O freely.
#[async_trait]
pub trait ResourceProvider: Send + Sync + 'static {
    /// The pooled handle. Cloning must be cheap (typically an `Arc`).
    type Handle: Clone + Send + Sync + 'static;

    /// Create a new handle
    async fn allocate(&self) -> Result<Self::Handle>;

    /// Destroy a handle. Errors are logged by the pool and otherwise ignored.
    async fn release(&self, handle: Self::Handle) -> Result<()>;

    /// Check that an idle handle is still usable.
    ///
    /// Must not fail; any problem is reported as `false`.
    async fn check(&self, handle: &Self::Handle) -> bool;

    /// Optional description included in per-resource statistics
    fn describe(&self, _handle: &Self::Handle) -> Option<String> {
        None
    }
}

/// Identifier the pool assigns to each resource it allocates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(pub u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A handle plus the timestamps the pool needs to manage it
pub(crate) struct PooledResource<H> {
    pub(crate) id: ResourceId,
    pub(crate) handle: H,
    pub(crate) allocated_at: Instant,
    pub(crate) last_checked_at: Instant,
    pub(crate) last_get_at: Option<Instant>,
    pub(crate) last_return_at: Option<Instant>,
    pub(crate) dirty: bool,
}

impl<H> PooledResource<H> {
    pub(crate) fn new(id: ResourceId, handle: H) -> Self {
        let now = Instant::now();
        Self {
            id,
            handle,
            allocated_at: now,
            last_checked_at: now,
            last_get_at: None,
            last_return_at: None,
            dirty: false,
        }
    }

    /// Whether the resource has gone unchecked for longer than `interval`
    pub(crate) fn needs_check(&self, interval: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_checked_at) > interval
    }

    pub(crate) fn mark_checked(&mut self, now: Instant) {
        self.last_checked_at = now;
    }

    pub(crate) fn mark_get(&mut self, now: Instant) {
        self.last_get_at = Some(now);
    }

    /// Record the return and report how long the resource was busy
    pub(crate) fn mark_return(&mut self, now: Instant) -> Duration {
        self.last_return_at = Some(now);
        self.busy_time(now)
    }

    pub(crate) fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.allocated_at)
    }

    /// Time spent idle since the last return, or since allocation
    pub(crate) fn idle_time(&self, now: Instant) -> Duration {
        let since = self.last_return_at.unwrap_or(self.allocated_at);
        now.saturating_duration_since(since)
    }

    /// Time spent busy since the last get
    pub(crate) fn busy_time(&self, now: Instant) -> Duration {
        self.last_get_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default()
    }
}
