//! Pool statistics types

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::provider::ResourceId;

/// Count and cumulative duration of one kind of pool operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    count: u64,
    total_micros: u64,
}

impl Timing {
    pub(crate) fn record(&mut self, elapsed: Duration) {
        self.count += 1;
        self.total_micros = self
            .total_micros
            .saturating_add(u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX));
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn total(&self) -> Duration {
        Duration::from_micros(self.total_micros)
    }

    /// Mean duration, zero when nothing was recorded
    pub fn average(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(self.total_micros / self.count)
        }
    }
}

/// Categories of failures the pool absorbs or reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Allocation,
    Release,
    Check,
    BusyTimeout,
    Exhausted,
}

/// Failure counters per [`FailureKind`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCounts {
    pub allocation: u64,
    pub release: u64,
    pub check: u64,
    pub busy_timeout: u64,
    pub exhausted: u64,
}

impl FailureCounts {
    pub(crate) fn record(&mut self, kind: FailureKind) {
        *self.counter_mut(kind) += 1;
    }

    pub fn get(&self, kind: FailureKind) -> u64 {
        match kind {
            FailureKind::Allocation => self.allocation,
            FailureKind::Release => self.release,
            FailureKind::Check => self.check,
            FailureKind::BusyTimeout => self.busy_timeout,
            FailureKind::Exhausted => self.exhausted,
        }
    }

    pub fn total(&self) -> u64 {
        self.allocation + self.release + self.check + self.busy_timeout + self.exhausted
    }

    fn counter_mut(&mut self, kind: FailureKind) -> &mut u64 {
        match kind {
            FailureKind::Allocation => &mut self.allocation,
            FailureKind::Release => &mut self.release,
            FailureKind::Check => &mut self.check,
            FailureKind::BusyTimeout => &mut self.busy_timeout,
            FailureKind::Exhausted => &mut self.exhausted,
        }
    }
}

/// Running accumulator kept under the pool lock
#[derive(Debug, Clone)]
pub(crate) struct Statistics {
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) peak_size: usize,
    pub(crate) peak_at: Option<DateTime<Utc>>,
    pub(crate) allocations: Timing,
    pub(crate) releases: Timing,
    pub(crate) gets: Timing,
    pub(crate) returns: Timing,
    pub(crate) checks: Timing,
    pub(crate) failures: FailureCounts,
}

impl Statistics {
    pub(crate) fn new() -> Self {
        Self {
            created_at: Utc::now(),
            peak_size: 0,
            peak_at: None,
            allocations: Timing::default(),
            releases: Timing::default(),
            gets: Timing::default(),
            returns: Timing::default(),
            checks: Timing::default(),
            failures: FailureCounts::default(),
        }
    }

    pub(crate) fn observe_size(&mut self, size: usize) {
        if size > self.peak_size {
            self.peak_size = size;
            self.peak_at = Some(Utc::now());
        }
    }

    pub(crate) fn record_failure(&mut self, kind: FailureKind) {
        self.failures.record(kind);
    }
}

/// Which collection a resource currently sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Idle,
    Busy,
    Dirty,
}

/// Point-in-time description of one pooled resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub id: ResourceId,
    pub state: ResourceState,
    /// Milliseconds since the resource was allocated
    pub age_ms: u64,
    /// Milliseconds since the resource was last checked
    pub since_check_ms: u64,
    pub dirty: bool,
    pub description: Option<String>,
}

/// Statistics about a pool's current state
///
/// Provides insight into pool utilization and health. Every count is taken
/// under the pool lock, so a snapshot is internally consistent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    created_at: DateTime<Utc>,
    /// Total number of resources (idle + busy)
    total: usize,
    /// Number of idle resources available in the pool
    idle: usize,
    /// Number of resources currently in use
    busy: usize,
    /// Number of resources awaiting release
    dirty: usize,
    /// Number of allocations in flight
    pending: usize,
    peak_size: usize,
    peak_at: Option<DateTime<Utc>>,
    allocations: Timing,
    releases: Timing,
    gets: Timing,
    returns: Timing,
    checks: Timing,
    failures: FailureCounts,
    resources: Vec<ResourceDescriptor>,
}

impl PoolStats {
    pub(crate) fn new(
        stats: &Statistics,
        idle: usize,
        busy: usize,
        dirty: usize,
        pending: usize,
        resources: Vec<ResourceDescriptor>,
    ) -> Self {
        Self {
            created_at: stats.created_at,
            total: idle + busy,
            idle,
            busy,
            dirty,
            pending,
            peak_size: stats.peak_size,
            peak_at: stats.peak_at,
            allocations: stats.allocations,
            releases: stats.releases,
            gets: stats.gets,
            returns: stats.returns,
            checks: stats.checks,
            failures: stats.failures,
            resources,
        }
    }

    pub(crate) fn set_descriptions(&mut self, descriptions: Vec<Option<String>>) {
        for (resource, description) in self.resources.iter_mut().zip(descriptions) {
            resource.description = description;
        }
    }

    /// When the pool was created
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the total number of resources
    pub fn total(&self) -> usize {
        self.total
    }

    /// Get the number of idle resources
    pub fn idle(&self) -> usize {
        self.idle
    }

    /// Get the number of busy (in-use) resources
    pub fn busy(&self) -> usize {
        self.busy
    }

    pub fn dirty(&self) -> usize {
        self.dirty
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Largest total size observed and when it was first reached
    pub fn peak_size(&self) -> usize {
        self.peak_size
    }

    pub fn peak_at(&self) -> Option<DateTime<Utc>> {
        self.peak_at
    }

    pub fn allocations(&self) -> Timing {
        self.allocations
    }

    pub fn releases(&self) -> Timing {
        self.releases
    }

    pub fn gets(&self) -> Timing {
        self.gets
    }

    /// Returns, timed by how long each resource was held
    pub fn returns(&self) -> Timing {
        self.returns
    }

    pub fn checks(&self) -> Timing {
        self.checks
    }

    pub fn failures(&self) -> FailureCounts {
        self.failures
    }

    /// Per-resource descriptors, idle first, then busy, then dirty
    pub fn resources(&self) -> &[ResourceDescriptor] {
        &self.resources
    }

    /// Calculate pool utilization as a fraction (0.0 to 1.0)
    ///
    /// Returns 0.0 if total is 0 to avoid division by zero.
    pub fn utilization(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.busy as f64 / self.total as f64
        }
    }

    /// Check if the pool is fully utilized (all resources in use)
    pub fn is_full(&self) -> bool {
        self.idle == 0 && self.total > 0
    }
}
