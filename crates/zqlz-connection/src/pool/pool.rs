//! Resource pool implementation

use std::collections::{HashMap, VecDeque};
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use zqlz_core::{Result, ZqlzError};

use super::config::{PoolConfig, WaitPolicy};
use super::error::PoolError;
use super::provider::{PooledResource, ResourceId, ResourceProvider};
use super::scheduler;
use super::stats::{FailureKind, PoolStats, ResourceDescriptor, ResourceState, Statistics};

/// Everything guarded by the pool lock
pub(crate) struct PoolState<H> {
    pub(crate) config: PoolConfig,
    /// Front is the most recently returned resource
    pub(crate) idle: VecDeque<PooledResource<H>>,
    pub(crate) busy: HashMap<ResourceId, PooledResource<H>>,
    /// Resources waiting to be released by housekeeping
    pub(crate) dirty: Vec<PooledResource<H>>,
    /// Allocations in flight
    pub(crate) pending: usize,
    /// Idle resources taken out for a health check
    pub(crate) checking: usize,
    pub(crate) stats: Statistics,
    pub(crate) closed: bool,
}

impl<H> PoolState<H> {
    /// Resources that exist or are about to exist
    pub(crate) fn committed(&self) -> usize {
        self.idle.len() + self.busy.len() + self.pending + self.checking
    }

    fn at_capacity(&self) -> bool {
        let size_limited = self.config.is_bounded() && self.committed() >= self.config.max_size();
        let pending_limited =
            self.config.max_pending() > 0 && self.pending >= self.config.max_pending();
        size_limited || pending_limited
    }

    pub(crate) fn observe_size(&mut self) {
        let size = self.idle.len() + self.busy.len();
        self.stats.observe_size(size);
    }
}

pub(crate) struct PoolInner<P: ResourceProvider> {
    pub(crate) provider: Arc<P>,
    pub(crate) state: Mutex<PoolState<P::Handle>>,
    /// Signalled whenever capacity may have become available
    pub(crate) available: Notify,
    next_id: AtomicU64,
    pub(crate) housekeeper: Mutex<Option<JoinHandle<()>>>,
}

impl<P: ResourceProvider> PoolInner<P> {
    pub(crate) fn next_id(&self) -> ResourceId {
        ResourceId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn notify(&self) {
        self.available.notify_waiters();
    }

    /// Release through the provider, logging and counting failures
    pub(crate) async fn release(&self, resource: PooledResource<P::Handle>) {
        let id = resource.id;
        let started = Instant::now();
        let result = self.provider.release(resource.handle).await;
        let elapsed = started.elapsed();

        let mut state = self.state.lock();
        match result {
            Ok(()) => {
                state.stats.releases.record(elapsed);
                drop(state);
                tracing::debug!(resource_id = %id, "pooled resource released");
            }
            Err(e) => {
                state.stats.record_failure(FailureKind::Release);
                drop(state);
                tracing::warn!(resource_id = %id, error = %e, "failed to release pooled resource");
            }
        }
    }
}

impl<P: ResourceProvider> Drop for PoolInner<P> {
    fn drop(&mut self) {
        if let Some(task) = self.housekeeper.get_mut().take() {
            task.abort();
        }

        let state = self.state.get_mut();
        let leftovers: Vec<P::Handle> = state
            .idle
            .drain(..)
            .chain(state.dirty.drain(..))
            .map(|resource| resource.handle)
            .collect();
        if leftovers.is_empty() {
            return;
        }

        let provider = self.provider.clone();
        let spawned = scheduler::spawn(async move {
            for handle in leftovers {
                if let Err(e) = provider.release(handle).await {
                    tracing::warn!(error = %e, "failed to release resource of dropped pool");
                }
            }
        });
        if let Err(e) = spawned {
            tracing::error!(error = %e, "could not release resources of dropped pool");
        }
    }
}

/// What `acquire` does after inspecting the pool state
enum Step<P: ResourceProvider> {
    Ready(Pooled<P>),
    Check(PooledResource<P::Handle>),
    Allocate,
    Wait(Option<Instant>),
}

/// How a health check taken from idle ended
enum CheckOutcome<P: ResourceProvider> {
    Passed(Pooled<P>),
    Failed,
    Closed(PooledResource<P::Handle>),
}

/// Undoes a `pending` reservation if the allocating future is dropped
pub(crate) struct PendingSlot<'a, P: ResourceProvider> {
    inner: &'a PoolInner<P>,
    armed: bool,
}

impl<'a, P: ResourceProvider> PendingSlot<'a, P> {
    /// Take over a reservation already counted in `pending`
    pub(crate) fn new(inner: &'a PoolInner<P>) -> Self {
        Self { inner, armed: true }
    }

    /// Give the reservation back while the caller holds the lock
    pub(crate) fn complete(mut self, state: &mut PoolState<P::Handle>) {
        state.pending = state.pending.saturating_sub(1);
        self.armed = false;
    }
}

impl<P: ResourceProvider> Drop for PendingSlot<'_, P> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.inner.state.lock();
            state.pending = state.pending.saturating_sub(1);
            drop(state);
            self.inner.notify();
        }
    }
}

/// Holds an idle resource while it is being checked.
///
/// If the checking future is dropped the resource goes to the dirty set.
struct CheckingSlot<'a, P: ResourceProvider> {
    inner: &'a PoolInner<P>,
    resource: Option<PooledResource<P::Handle>>,
}

impl<'a, P: ResourceProvider> CheckingSlot<'a, P> {
    fn handle(&self) -> Option<P::Handle> {
        self.resource.as_ref().map(|r| r.handle.clone())
    }

    fn take(mut self, state: &mut PoolState<P::Handle>) -> Option<PooledResource<P::Handle>> {
        state.checking = state.checking.saturating_sub(1);
        self.resource.take()
    }
}

impl<P: ResourceProvider> Drop for CheckingSlot<'_, P> {
    fn drop(&mut self) {
        if let Some(mut resource) = self.resource.take() {
            resource.dirty = true;
            let mut state = self.inner.state.lock();
            state.checking = state.checking.saturating_sub(1);
            state.dirty.push(resource);
            drop(state);
            self.inner.notify();
        }
    }
}

/// A bounded pool of resources created by a [`ResourceProvider`]
///
/// Cloning is cheap; clones share the same pool.
pub struct ResourcePool<P: ResourceProvider> {
    pub(crate) inner: Arc<PoolInner<P>>,
}

impl<P: ResourceProvider> Clone for ResourcePool<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: ResourceProvider> ResourcePool<P> {
    /// Create a new pool and start its housekeeping task.
    ///
    /// The pool starts empty; the first housekeeping cycle tops it up to the
    /// configured minimums.
    pub fn new(config: PoolConfig, provider: P) -> Result<Self> {
        config.validate()?;
        let housekeeping = config.housekeeping_period();
        tracing::info!(
            min_size = config.min_size(),
            max_size = config.max_size(),
            "creating resource pool"
        );

        let pool = Self {
            inner: Arc::new(PoolInner {
                provider: Arc::new(provider),
                state: Mutex::new(PoolState {
                    config,
                    idle: VecDeque::new(),
                    busy: HashMap::new(),
                    dirty: Vec::new(),
                    pending: 0,
                    checking: 0,
                    stats: Statistics::new(),
                    closed: false,
                }),
                available: Notify::new(),
                next_id: AtomicU64::new(1),
                housekeeper: Mutex::new(None),
            }),
        };
        if housekeeping.is_some() {
            pool.start_housekeeping();
        }
        Ok(pool)
    }

    /// The provider backing this pool
    pub fn provider(&self) -> &P {
        &self.inner.provider
    }

    /// Get a resource from the pool
    ///
    /// This will:
    /// 1. Reuse the most recently returned idle resource, checking it first
    ///    when it has not been checked for `check_interval`
    /// 2. If none is idle and the pool has room, allocate a new one
    /// 3. Otherwise wait for capacity according to the pool's [`WaitPolicy`]
    ///
    /// A resource that fails its check is set aside and the request retried,
    /// so callers only see allocation failures and exhaustion.
    pub async fn acquire(&self) -> std::result::Result<Pooled<P>, PoolError> {
        let started = Instant::now();
        loop {
            let notified = self.inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let step = {
                let mut state = self.inner.state.lock();
                self.next_step(&mut state, started)?
            };

            match step {
                Step::Ready(pooled) => return Ok(pooled),
                Step::Allocate => return self.acquire_new(started).await,
                Step::Check(resource) => {
                    if let Some(pooled) = self.acquire_checked(resource, started).await? {
                        return Ok(pooled);
                    }
                }
                Step::Wait(None) => notified.await,
                Step::Wait(Some(deadline)) => {
                    // Expiry is detected on the next pass through `next_step`
                    let _ = tokio::time::timeout_at(deadline.into(), notified).await;
                }
            }
        }
    }

    fn next_step(
        &self,
        state: &mut PoolState<P::Handle>,
        started: Instant,
    ) -> std::result::Result<Step<P>, PoolError> {
        if state.closed {
            return Err(PoolError::Closed);
        }

        let now = Instant::now();
        if let Some(resource) = state.idle.pop_front() {
            if resource.needs_check(state.config.check_interval(), now) {
                state.checking += 1;
                return Ok(Step::Check(resource));
            }
            return Ok(Step::Ready(self.hand_out(state, resource, started)));
        }

        if state.at_capacity() {
            let deadline = match state.config.max_wait() {
                WaitPolicy::Forever => None,
                WaitPolicy::Never => return Err(Self::exhausted(state, started)),
                WaitPolicy::Bounded(budget) => {
                    let deadline = started + budget;
                    if now >= deadline {
                        return Err(Self::exhausted(state, started));
                    }
                    Some(deadline)
                }
            };
            return Ok(Step::Wait(deadline));
        }

        state.pending += 1;
        Ok(Step::Allocate)
    }

    fn exhausted(state: &mut PoolState<P::Handle>, started: Instant) -> PoolError {
        state.stats.record_failure(FailureKind::Exhausted);
        let waited = started.elapsed();
        tracing::debug!(waited_ms = waited.as_millis() as u64, "pool exhausted");
        PoolError::Exhausted { waited }
    }

    /// Move a resource into the busy map and wrap it for the caller
    fn hand_out(
        &self,
        state: &mut PoolState<P::Handle>,
        mut resource: PooledResource<P::Handle>,
        started: Instant,
    ) -> Pooled<P> {
        let now = Instant::now();
        resource.mark_get(now);
        state.stats.gets.record(now.saturating_duration_since(started));

        let id = resource.id;
        let handle = resource.handle.clone();
        state.busy.insert(id, resource);
        state.observe_size();

        Pooled {
            pool: self.clone(),
            id,
            handle,
            returned: false,
        }
    }

    async fn acquire_new(&self, started: Instant) -> std::result::Result<Pooled<P>, PoolError> {
        let slot = PendingSlot::new(&self.inner);
        let allocation_started = Instant::now();
        let result = self.inner.provider.allocate().await;
        let elapsed = allocation_started.elapsed();

        match result {
            Ok(handle) => {
                let resource = PooledResource::new(self.inner.next_id(), handle);
                let id = resource.id;
                let outcome = {
                    let mut state = self.inner.state.lock();
                    slot.complete(&mut state);
                    state.stats.allocations.record(elapsed);
                    if state.closed {
                        Err(resource)
                    } else {
                        Ok(self.hand_out(&mut state, resource, started))
                    }
                };
                self.inner.notify();

                match outcome {
                    Ok(pooled) => {
                        tracing::debug!(resource_id = %id, "allocated pooled resource");
                        Ok(pooled)
                    }
                    Err(resource) => {
                        self.inner.release(resource).await;
                        Err(PoolError::Closed)
                    }
                }
            }
            Err(e) => {
                {
                    let mut state = self.inner.state.lock();
                    slot.complete(&mut state);
                    state.stats.record_failure(FailureKind::Allocation);
                }
                self.inner.notify();
                tracing::warn!(error = %e, "failed to allocate pooled resource");
                Err(PoolError::Allocation(e))
            }
        }
    }

    /// Check a resource taken from idle. `Ok(None)` means retry.
    async fn acquire_checked(
        &self,
        resource: PooledResource<P::Handle>,
        started: Instant,
    ) -> std::result::Result<Option<Pooled<P>>, PoolError> {
        let id = resource.id;
        let check_timeout = self.inner.state.lock().config.check_timeout();
        let slot = CheckingSlot {
            inner: &self.inner,
            resource: Some(resource),
        };

        let check_started = Instant::now();
        let valid = match slot.handle() {
            Some(handle) => {
                tokio::time::timeout(check_timeout, self.inner.provider.check(&handle))
                    .await
                    .unwrap_or(false)
            }
            None => false,
        };
        let now = Instant::now();

        let outcome = {
            let mut state = self.inner.state.lock();
            let Some(mut resource) = slot.take(&mut state) else {
                return Ok(None);
            };
            state.stats.checks.record(now.saturating_duration_since(check_started));

            if state.closed {
                CheckOutcome::Closed(resource)
            } else if valid {
                resource.mark_checked(now);
                CheckOutcome::Passed(self.hand_out(&mut state, resource, started))
            } else {
                state.stats.record_failure(FailureKind::Check);
                resource.dirty = true;
                state.dirty.push(resource);
                CheckOutcome::Failed
            }
        };

        match outcome {
            CheckOutcome::Passed(pooled) => Ok(Some(pooled)),
            CheckOutcome::Closed(resource) => {
                self.inner.release(resource).await;
                Err(PoolError::Closed)
            }
            CheckOutcome::Failed => {
                self.inner.notify();
                tracing::warn!(resource_id = %id, "pooled resource failed its health check");
                Ok(None)
            }
        }
    }

    /// Give a busy resource back, to the front of idle or, with `to_end`, the back.
    ///
    /// A resource that would push the pool past `max_size` goes to the dirty
    /// set instead, so a lowered bound takes hold as resources come back.
    pub(crate) fn return_resource(&self, id: ResourceId, to_end: bool) {
        let now = Instant::now();
        let detached = {
            let mut state = self.inner.state.lock();
            let Some(mut resource) = state.busy.remove(&id) else {
                drop(state);
                tracing::warn!(resource_id = %id, "returned resource is not busy, ignoring");
                return;
            };

            let held = resource.mark_return(now);
            state.stats.returns.record(held);

            let over_capacity = state.config.is_bounded()
                && state.idle.len() + state.busy.len() >= state.config.max_size();
            if state.closed {
                Some(resource)
            } else {
                if over_capacity && !resource.dirty {
                    tracing::debug!(resource_id = %id, "pool above max size, retiring returned resource");
                    resource.dirty = true;
                }
                if resource.dirty {
                    state.dirty.push(resource);
                } else if to_end {
                    state.idle.push_back(resource);
                } else {
                    state.idle.push_front(resource);
                }
                None
            }
        };

        if let Some(resource) = detached {
            self.release_detached(resource);
        }
        self.inner.notify();
    }

    /// Take a busy resource out of circulation
    pub(crate) async fn remove_resource(&self, id: ResourceId, synchronous: bool) {
        let now = Instant::now();
        let release_now = {
            let mut state = self.inner.state.lock();
            let Some(mut resource) = state.busy.remove(&id) else {
                drop(state);
                tracing::warn!(resource_id = %id, "removed resource is not busy, ignoring");
                return;
            };

            let held = resource.mark_return(now);
            state.stats.returns.record(held);
            resource.dirty = true;

            if synchronous || state.closed {
                Some(resource)
            } else {
                state.dirty.push(resource);
                None
            }
        };
        self.inner.notify();

        if let Some(resource) = release_now {
            self.inner.release(resource).await;
        }
        tracing::debug!(resource_id = %id, synchronous, "pooled resource discarded");
    }

    /// Flag a busy resource so it is released instead of reused when returned
    pub(crate) fn mark_dirty(&self, id: ResourceId) {
        if let Some(resource) = self.inner.state.lock().busy.get_mut(&id) {
            resource.dirty = true;
        }
    }

    fn release_detached(&self, resource: PooledResource<P::Handle>) {
        let inner = self.inner.clone();
        if let Err(e) = scheduler::spawn(async move { inner.release(resource).await }) {
            tracing::error!(error = %e, "could not schedule release of pooled resource");
        }
    }

    /// Release every idle resource now and mark busy ones dirty.
    ///
    /// Busy resources are released when their holders give them back.
    pub async fn drop_all(&self) {
        let released: Vec<_> = {
            let mut state = self.inner.state.lock();
            for resource in state.busy.values_mut() {
                resource.dirty = true;
            }
            let mut released: Vec<_> = state.idle.drain(..).collect();
            released.append(&mut state.dirty);
            released
        };
        tracing::info!(released = released.len(), "dropping all pooled resources");

        for resource in released {
            self.inner.release(resource).await;
        }
        self.inner.notify();
    }

    /// Release every resource now, including busy ones.
    ///
    /// Holders of killed resources keep their handle, but giving it back is
    /// a no-op.
    pub async fn kill_all(&self) {
        let released: Vec<_> = {
            let mut state = self.inner.state.lock();
            let mut released: Vec<_> = state.idle.drain(..).collect();
            released.extend(state.busy.drain().map(|(_, resource)| resource));
            released.append(&mut state.dirty);
            released
        };
        tracing::info!(released = released.len(), "killing all pooled resources");

        for resource in released {
            self.inner.release(resource).await;
        }
        self.inner.notify();
    }

    /// Close the pool.
    ///
    /// Stops housekeeping, fails pending and future `acquire` calls with
    /// [`PoolError::Closed`] and releases idle and dirty resources. Busy
    /// resources are released as they come back.
    pub async fn close(&self) {
        let released: Vec<_> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let mut released: Vec<_> = state.idle.drain(..).collect();
            released.append(&mut state.dirty);
            released
        };
        if let Some(task) = self.inner.housekeeper.lock().take() {
            task.abort();
        }
        self.inner.notify();

        for resource in released {
            self.inner.release(resource).await;
        }
        tracing::info!("resource pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        let now = Instant::now();
        let (mut stats, handles) = {
            let state = self.inner.state.lock();
            let mut resources = Vec::new();
            let mut handles = Vec::new();
            let buckets = state
                .idle
                .iter()
                .map(|r| (r, ResourceState::Idle))
                .chain(state.busy.values().map(|r| (r, ResourceState::Busy)))
                .chain(state.dirty.iter().map(|r| (r, ResourceState::Dirty)));
            for (resource, resource_state) in buckets {
                resources.push(ResourceDescriptor {
                    id: resource.id,
                    state: resource_state,
                    age_ms: resource.age(now).as_millis() as u64,
                    since_check_ms: now
                        .saturating_duration_since(resource.last_checked_at)
                        .as_millis() as u64,
                    dirty: resource.dirty,
                    description: None,
                });
                handles.push(resource.handle.clone());
            }
            let stats = PoolStats::new(
                &state.stats,
                state.idle.len(),
                state.busy.len(),
                state.dirty.len(),
                state.pending,
                resources,
            );
            (stats, handles)
        };

        // Descriptions come from the provider, so ask outside the lock
        let descriptions: Vec<_> = handles
            .iter()
            .map(|handle| self.inner.provider.describe(handle))
            .collect();
        stats.set_descriptions(descriptions);
        stats
    }

    /// Handles of every resource the pool currently tracks
    pub(crate) fn handles(&self) -> Vec<P::Handle> {
        let state = self.inner.state.lock();
        state
            .idle
            .iter()
            .chain(state.busy.values())
            .chain(state.dirty.iter())
            .map(|resource| resource.handle.clone())
            .collect()
    }

    /// Get a copy of the pool configuration
    pub fn config(&self) -> PoolConfig {
        self.inner.state.lock().config.clone()
    }

    pub(crate) fn update_config(&self, update: impl FnOnce(&mut PoolConfig)) {
        update(&mut self.inner.state.lock().config);
    }

    /// Apply a change only if the resulting configuration still validates
    fn try_update_config(&self, update: impl FnOnce(&mut PoolConfig)) -> Result<()> {
        let mut state = self.inner.state.lock();
        let mut config = state.config.clone();
        update(&mut config);
        config.validate()?;
        state.config = config;
        Ok(())
    }

    /// Change the minimum pool size; housekeeping grows the pool to match
    pub fn set_min_size(&self, min_size: usize) -> Result<()> {
        self.try_update_config(|config| config.set_min_size(min_size))
    }

    /// Change the maximum pool size (0 = unbounded). Takes effect immediately.
    ///
    /// When lowered, returned resources above the bound are retired and the
    /// next housekeeping cycle reclaims the idle surplus.
    pub fn set_max_size(&self, max_size: usize) -> Result<()> {
        self.try_update_config(|config| config.set_max_size(max_size))?;
        self.inner.notify();
        Ok(())
    }

    /// Change the idle floor; housekeeping allocates to meet it
    pub fn set_min_idle(&self, min_idle: usize) -> Result<()> {
        self.try_update_config(|config| config.set_min_idle(min_idle))
    }

    /// Change the in-flight allocation limit (0 = unbounded). Takes effect immediately.
    pub fn set_max_pending(&self, max_pending: usize) {
        self.update_config(|config| config.set_max_pending(max_pending));
        self.inner.notify();
    }

    pub fn set_check_interval(&self, interval: Duration) {
        self.update_config(|config| config.set_check_interval(interval));
    }

    /// Change the wait policy. Callers already waiting keep their deadline.
    pub fn set_max_wait(&self, policy: WaitPolicy) {
        self.update_config(|config| config.set_max_wait(policy));
    }

    pub fn set_max_idle_time(&self, idle: Option<Duration>) {
        self.update_config(|config| config.set_max_idle_time(idle));
    }

    pub fn set_max_busy_time(&self, busy: Option<Duration>) {
        self.update_config(|config| config.set_max_busy_time(busy));
    }

    pub fn set_max_lifetime(&self, lifetime: Option<Duration>) {
        self.update_config(|config| config.set_max_lifetime(lifetime));
    }

    /// Change the housekeeping period, restarting the task. `None` stops it.
    pub fn set_housekeeping_period(&self, period: Option<Duration>) {
        self.update_config(|config| config.set_housekeeping_period(period));
        if let Some(task) = self.inner.housekeeper.lock().take() {
            task.abort();
        }
        if period.is_some() && !self.is_closed() {
            self.start_housekeeping();
        }
    }
}

/// A resource borrowed from a [`ResourcePool`]
///
/// When dropped, the resource is returned to the front of the idle queue.
pub struct Pooled<P: ResourceProvider> {
    pool: ResourcePool<P>,
    id: ResourceId,
    handle: P::Handle,
    returned: bool,
}

impl<P: ResourceProvider> Pooled<P> {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn handle(&self) -> &P::Handle {
        &self.handle
    }

    /// The pool this resource belongs to
    pub fn pool(&self) -> &ResourcePool<P> {
        &self.pool
    }

    /// Return the resource; `to_end` queues it behind the other idle resources
    pub fn release(mut self, to_end: bool) {
        self.returned = true;
        self.pool.return_resource(self.id, to_end);
    }

    /// Take the resource out of the pool.
    ///
    /// `synchronous` releases it before returning; otherwise housekeeping
    /// releases it later.
    pub async fn discard(mut self, synchronous: bool) {
        self.returned = true;
        self.pool.remove_resource(self.id, synchronous).await;
    }

    /// Release the resource instead of reusing it once it is returned
    pub fn mark_dirty(&self) {
        self.pool.mark_dirty(self.id);
    }
}

impl<P: ResourceProvider> Deref for Pooled<P> {
    type Target = P::Handle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl<P: ResourceProvider> Drop for Pooled<P> {
    fn drop(&mut self) {
        if !self.returned {
            self.pool.return_resource(self.id, false);
        }
    }
}

impl<P: ResourceProvider> std::fmt::Debug for Pooled<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pooled").field("id", &self.id).finish()
    }
}
