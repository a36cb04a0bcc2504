//! Pool configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};
use zqlz_core::{Result, ZqlzError};

/// How long `acquire` may wait when the pool is at capacity.
///
/// Serialized as a signed millisecond count: `0` waits forever, a positive
/// value waits up to that many milliseconds, a negative value fails at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Block until a resource becomes available
    Forever,
    /// Block for at most this long, then fail with `PoolError::Exhausted`
    Bounded(Duration),
    /// Fail immediately when no resource can be handed out
    Never,
}

impl WaitPolicy {
    pub fn from_millis(millis: i64) -> Self {
        match millis {
            0 => WaitPolicy::Forever,
            ms if ms > 0 => WaitPolicy::Bounded(Duration::from_millis(ms as u64)),
            _ => WaitPolicy::Never,
        }
    }

    pub fn as_millis(&self) -> i64 {
        match self {
            WaitPolicy::Forever => 0,
            WaitPolicy::Bounded(budget) => i64::try_from(budget.as_millis())
                .unwrap_or(i64::MAX)
                .max(1),
            WaitPolicy::Never => -1,
        }
    }
}

/// Configuration for a resource pool
///
/// Controls pool sizing, admission, health checking and the housekeeping
/// timers. Sizes of `0` for `max_size` and `max_pending` mean unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Minimum number of resources to maintain in the pool
    min_size: usize,
    /// Maximum number of resources allowed in the pool (0 = unbounded)
    max_size: usize,
    /// Minimum number of idle resources housekeeping keeps ready
    min_idle: usize,
    /// Maximum number of allocations in flight at once (0 = unbounded)
    max_pending: usize,
    /// Idle resources not checked for this long are checked before reuse
    check_interval_ms: u64,
    /// Timeout in milliseconds for a single health check
    check_timeout_ms: u64,
    /// Wait budget for `acquire`, see [`WaitPolicy`]
    max_wait_ms: i64,
    /// Idle resources older than this are reclaimed by housekeeping
    max_idle_time_ms: Option<u64>,
    /// Busy resources held longer than this are forcibly reclaimed
    max_busy_time_ms: Option<u64>,
    /// Maximum lifetime of a resource before it's recycled
    max_lifetime_ms: Option<u64>,
    /// Period of the housekeeping task (0 disables it)
    housekeeping_period_ms: u64,
    /// Prepared statements cached per connection (0 disables caching)
    statement_cache_size: usize,
    /// Query used to validate connections instead of the native probe
    check_query: Option<String>,
}

impl PoolConfig {
    /// Create a new pool configuration with the given min and max sizes
    ///
    /// # Panics
    ///
    /// Panics if `max_size` is bounded and `min_size > max_size`.
    pub fn new(min_size: usize, max_size: usize) -> Self {
        assert!(
            max_size == 0 || min_size <= max_size,
            "min_size ({}) cannot exceed max_size ({})",
            min_size,
            max_size
        );

        Self {
            min_size,
            max_size,
            min_idle: 0,
            max_pending: 0,
            check_interval_ms: 30_000,
            check_timeout_ms: 5_000,
            max_wait_ms: 30_000,
            max_idle_time_ms: Some(600_000), // 10 minutes default
            max_busy_time_ms: None,
            max_lifetime_ms: None,
            housekeeping_period_ms: 30_000,
            statement_cache_size: 20,
            check_query: None,
        }
    }

    /// Parse a configuration from TOML. Missing keys take their defaults.
    pub fn from_toml(source: &str) -> Result<Self> {
        let config: PoolConfig = toml::from_str(source)
            .map_err(|e| ZqlzError::Configuration(format!("Invalid pool config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the size bounds without panicking
    pub fn validate(&self) -> Result<()> {
        if self.max_size != 0 && self.min_size > self.max_size {
            return Err(ZqlzError::Configuration(format!(
                "min_size ({}) cannot exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.max_size != 0 && self.min_idle > self.max_size {
            return Err(ZqlzError::Configuration(format!(
                "min_idle ({}) cannot exceed max_size ({})",
                self.min_idle, self.max_size
            )));
        }
        Ok(())
    }

    pub fn with_min_idle(mut self, min_idle: usize) -> Self {
        self.min_idle = min_idle;
        self
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    /// Set the check interval in milliseconds
    pub fn with_check_interval_ms(mut self, interval_ms: u64) -> Self {
        self.check_interval_ms = interval_ms;
        self
    }

    /// Set the health check timeout in milliseconds
    pub fn with_check_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.check_timeout_ms = timeout_ms;
        self
    }

    /// Set the acquire wait budget in milliseconds (0 forever, negative never)
    pub fn with_max_wait_ms(mut self, wait_ms: i64) -> Self {
        self.max_wait_ms = wait_ms;
        self
    }

    /// Set the idle timeout in milliseconds
    pub fn with_max_idle_time_ms(mut self, idle_ms: u64) -> Self {
        self.max_idle_time_ms = Some(idle_ms);
        self
    }

    /// Set the busy timeout in milliseconds
    pub fn with_max_busy_time_ms(mut self, busy_ms: u64) -> Self {
        self.max_busy_time_ms = Some(busy_ms);
        self
    }

    /// Set the maximum resource lifetime in milliseconds
    pub fn with_max_lifetime_ms(mut self, lifetime_ms: u64) -> Self {
        self.max_lifetime_ms = Some(lifetime_ms);
        self
    }

    /// Set the housekeeping period in milliseconds (0 disables housekeeping)
    pub fn with_housekeeping_period_ms(mut self, period_ms: u64) -> Self {
        self.housekeeping_period_ms = period_ms;
        self
    }

    pub fn with_statement_cache_size(mut self, size: usize) -> Self {
        self.statement_cache_size = size;
        self
    }

    pub fn with_check_query(mut self, query: impl Into<String>) -> Self {
        self.check_query = Some(query.into());
        self
    }

    /// Get the minimum pool size
    pub fn min_size(&self) -> usize {
        self.min_size
    }

    /// Get the maximum pool size
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn min_idle(&self) -> usize {
        self.min_idle
    }

    pub fn max_pending(&self) -> usize {
        self.max_pending
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }

    /// How `acquire` behaves when the pool is at capacity
    pub fn max_wait(&self) -> WaitPolicy {
        WaitPolicy::from_millis(self.max_wait_ms)
    }

    pub fn max_idle_time(&self) -> Option<Duration> {
        self.max_idle_time_ms.map(Duration::from_millis)
    }

    pub fn max_busy_time(&self) -> Option<Duration> {
        self.max_busy_time_ms.map(Duration::from_millis)
    }

    /// Get the maximum lifetime as a Duration if set
    pub fn max_lifetime(&self) -> Option<Duration> {
        self.max_lifetime_ms.map(Duration::from_millis)
    }

    /// Housekeeping period, `None` when housekeeping is disabled
    pub fn housekeeping_period(&self) -> Option<Duration> {
        (self.housekeeping_period_ms > 0).then(|| Duration::from_millis(self.housekeeping_period_ms))
    }

    pub fn statement_cache_size(&self) -> usize {
        self.statement_cache_size
    }

    pub fn check_query(&self) -> Option<&str> {
        self.check_query.as_deref()
    }

    /// Whether the pool has an upper bound on its size
    pub fn is_bounded(&self) -> bool {
        self.max_size > 0
    }

    pub(crate) fn set_min_size(&mut self, min_size: usize) {
        self.min_size = min_size;
    }

    pub(crate) fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
    }

    pub(crate) fn set_min_idle(&mut self, min_idle: usize) {
        self.min_idle = min_idle;
    }

    pub(crate) fn set_max_pending(&mut self, max_pending: usize) {
        self.max_pending = max_pending;
    }

    pub(crate) fn set_check_interval(&mut self, interval: Duration) {
        self.check_interval_ms = duration_millis(interval);
    }

    pub(crate) fn set_max_wait(&mut self, policy: WaitPolicy) {
        self.max_wait_ms = policy.as_millis();
    }

    pub(crate) fn set_max_idle_time(&mut self, idle: Option<Duration>) {
        self.max_idle_time_ms = idle.map(duration_millis);
    }

    pub(crate) fn set_max_busy_time(&mut self, busy: Option<Duration>) {
        self.max_busy_time_ms = busy.map(duration_millis);
    }

    pub(crate) fn set_max_lifetime(&mut self, lifetime: Option<Duration>) {
        self.max_lifetime_ms = lifetime.map(duration_millis);
    }

    pub(crate) fn set_housekeeping_period(&mut self, period: Option<Duration>) {
        self.housekeeping_period_ms = period.map(duration_millis).unwrap_or(0);
    }

    pub(crate) fn set_statement_cache_size(&mut self, size: usize) {
        self.statement_cache_size = size;
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Default for PoolConfig {
    /// Create a default pool configuration
    ///
    /// Defaults:
    /// - min_size: 1, max_size: 10, min_idle: 0, max_pending: unbounded
    /// - check_interval: 30 seconds, check_timeout: 5 seconds
    /// - max_wait: 30 seconds
    /// - max_idle_time: 10 minutes, max_busy_time and max_lifetime: None
    /// - housekeeping_period: 30 seconds
    /// - statement_cache_size: 20
    fn default() -> Self {
        Self::new(1, 10)
    }
}
