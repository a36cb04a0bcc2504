//! Periodic reclamation and top-up of pooled resources

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use super::pool::{PendingSlot, ResourcePool};
use super::provider::{PooledResource, ResourceId, ResourceProvider};
use super::scheduler;
use super::stats::FailureKind;

/// What one housekeeping cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HousekeepingReport {
    /// Idle resources reclaimed for exceeding `max_idle_time`
    pub idle_expired: usize,
    /// Idle resources reclaimed for exceeding `max_lifetime`
    pub lifetime_expired: usize,
    /// Busy resources flagged dirty for exceeding `max_lifetime`
    pub marked_dirty: usize,
    /// Busy resources forcibly reclaimed for exceeding `max_busy_time`
    pub busy_timeouts: usize,
    /// Idle resources reclaimed because the pool exceeded `max_size`
    pub over_capacity: usize,
    /// Dirty resources drained
    pub dirty_drained: usize,
    /// Resources handed to the provider for release
    pub released: usize,
    /// Resources allocated to restore the minimums
    pub allocated: usize,
}

impl HousekeepingReport {
    /// Whether the cycle changed anything
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl<P: ResourceProvider> ResourcePool<P> {
    /// Run one housekeeping cycle now.
    ///
    /// Reclaims expired idle resources (never shrinking below `min_size` or
    /// `min_idle`), retires resources past their lifetime, forcibly reclaims
    /// busy resources held past `max_busy_time`, trims idle resources above
    /// `max_size`, drains the dirty set, and then allocates until `min_idle`
    /// and `min_size` are met.
    pub async fn run_housekeeping(&self) -> HousekeepingReport {
        let mut report = HousekeepingReport::default();
        let now = Instant::now();

        let (reclaimed, wanted) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return report;
            }
            let config = state.config.clone();
            let mut reclaimed: Vec<PooledResource<P::Handle>> = Vec::new();

            // The back of the queue holds the least recently used resources
            if let Some(max_idle) = config.max_idle_time() {
                let mut index = state.idle.len();
                while index > 0 {
                    index -= 1;
                    let size = state.idle.len() + state.busy.len();
                    if size <= config.min_size() || state.idle.len() <= config.min_idle() {
                        break;
                    }
                    if state.idle[index].idle_time(now) > max_idle {
                        if let Some(resource) = state.idle.remove(index) {
                            report.idle_expired += 1;
                            reclaimed.push(resource);
                        }
                    }
                }
            }

            if let Some(max_lifetime) = config.max_lifetime() {
                let (expired, kept): (Vec<_>, Vec<_>) = state
                    .idle
                    .drain(..)
                    .partition(|resource| resource.age(now) > max_lifetime);
                state.idle = kept.into();
                report.lifetime_expired = expired.len();
                reclaimed.extend(expired);

                for resource in state.busy.values_mut() {
                    if !resource.dirty && resource.age(now) > max_lifetime {
                        resource.dirty = true;
                        report.marked_dirty += 1;
                    }
                }
            }

            if let Some(max_busy) = config.max_busy_time() {
                let overdue: Vec<ResourceId> = state
                    .busy
                    .values()
                    .filter(|resource| resource.busy_time(now) > max_busy)
                    .map(|resource| resource.id)
                    .collect();
                for id in overdue {
                    if let Some(resource) = state.busy.remove(&id) {
                        state.stats.record_failure(FailureKind::BusyTimeout);
                        tracing::error!(
                            resource_id = %id,
                            busy_ms = resource.busy_time(now).as_millis() as u64,
                            "resource held past max busy time, reclaiming"
                        );
                        report.busy_timeouts += 1;
                        reclaimed.push(resource);
                    }
                }
            }

            // A lowered max_size is enforced by trimming the oldest idle resources
            if config.is_bounded() {
                while state.idle.len() + state.busy.len() > config.max_size() {
                    let Some(resource) = state.idle.pop_back() else { break };
                    report.over_capacity += 1;
                    reclaimed.push(resource);
                }
            }

            report.dirty_drained = state.dirty.len();
            reclaimed.append(&mut state.dirty);

            let committed = state.committed();
            let idle_gap = config
                .min_idle()
                .saturating_sub(state.idle.len() + state.pending);
            let size_gap = config.min_size().saturating_sub(committed);
            let mut wanted = idle_gap.max(size_gap);
            if config.is_bounded() {
                wanted = wanted.min(config.max_size().saturating_sub(committed));
            }
            state.pending += wanted;

            (reclaimed, wanted)
        };

        let slots: Vec<_> = (0..wanted).map(|_| PendingSlot::new(&self.inner)).collect();
        if report.busy_timeouts > 0 {
            self.inner.notify();
        }

        report.released = reclaimed.len();
        for resource in reclaimed {
            self.inner.release(resource).await;
        }

        for slot in slots {
            if !self.top_up_one(slot).await {
                // Remaining slots give their reservations back on drop
                break;
            }
            report.allocated += 1;
        }

        if !report.is_empty() {
            tracing::debug!(?report, "housekeeping cycle finished");
        }
        report
    }

    /// Allocate one idle resource. Returns false when allocation failed.
    async fn top_up_one(&self, slot: PendingSlot<'_, P>) -> bool {
        let started = Instant::now();
        let result = self.inner.provider.allocate().await;
        let elapsed = started.elapsed();

        let rejected = {
            let mut state = self.inner.state.lock();
            slot.complete(&mut state);
            match result {
                Ok(handle) => {
                    state.stats.allocations.record(elapsed);
                    let resource = PooledResource::new(self.inner.next_id(), handle);
                    if state.closed {
                        Some(resource)
                    } else {
                        state.idle.push_back(resource);
                        state.observe_size();
                        None
                    }
                }
                Err(e) => {
                    state.stats.record_failure(FailureKind::Allocation);
                    drop(state);
                    self.inner.notify();
                    tracing::warn!(error = %e, "housekeeping failed to allocate pooled resource");
                    return false;
                }
            }
        };

        match rejected {
            Some(resource) => {
                self.inner.release(resource).await;
                false
            }
            None => {
                self.inner.notify();
                true
            }
        }
    }

    /// Spawn the housekeeping loop on the shared scheduler.
    ///
    /// The task only holds a weak reference, so it ends once the pool is
    /// dropped, closed, or its period is set to `None`.
    pub(crate) fn start_housekeeping(&self) {
        let weak = Arc::downgrade(&self.inner);
        let spawned = scheduler::spawn(async move {
            loop {
                let period = {
                    let Some(inner) = weak.upgrade() else { break };
                    let state = inner.state.lock();
                    if state.closed {
                        break;
                    }
                    match state.config.housekeeping_period() {
                        Some(period) => period,
                        None => break,
                    }
                };
                tokio::time::sleep(period).await;

                let Some(inner) = weak.upgrade() else { break };
                ResourcePool { inner }.run_housekeeping().await;
            }
            tracing::debug!("housekeeping task stopped");
        });

        match spawned {
            Ok(task) => {
                if let Some(previous) = self.inner.housekeeper.lock().replace(task) {
                    previous.abort();
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "housekeeping disabled, scheduler unavailable");
            }
        }
    }
}
