//! Pool configuration options

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for object pool behavior
///
/// # Examples
///
/// ```
/// use lifecycle_pool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_max_total(10)
///     .with_max_idle(10)
///     .with_borrow_timeout(Duration::from_secs(5))
///     .with_eviction(Duration::from_secs(30));
///
/// assert_eq!(config.max_total, Some(10));
/// assert_eq!(config.time_between_eviction_runs, Some(Duration::from_secs(30)));
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfiguration {
    /// Maximum number of objects the pool tracks at once (`None` or `0` = unbounded)
    pub max_total: Option<usize>,

    /// Maximum number of idle objects (`None` = unbounded)
    pub max_idle: Option<usize>,

    /// Number of idle objects the eviction runner tries to maintain
    pub min_idle: usize,

    /// Whether idle objects are reused most-recently-returned first
    pub lifo: bool,

    /// Whether an exhausted borrow waits for capacity instead of failing
    pub block_when_exhausted: bool,

    /// How long an exhausted borrow waits (`None` = until capacity frees up)
    pub borrow_timeout: Option<Duration>,

    /// Validate freshly created objects before lending them
    pub test_on_create: bool,

    /// Validate objects before lending them
    pub test_on_borrow: bool,

    /// Validate objects when they are returned
    pub test_on_return: bool,

    /// Validate idle objects during eviction runs
    pub test_while_idle: bool,

    /// Period of the eviction runner (`None` or zero disables it)
    pub time_between_eviction_runs: Option<Duration>,

    /// Idle objects examined per eviction run; `-n` examines `ceil(idle / n)`
    pub num_tests_per_eviction_run: isize,

    /// Idle time after which an object is always evicted
    pub min_evictable_idle_time: Option<Duration>,

    /// Idle time after which an object is evicted while more than `min_idle` are idle
    pub soft_min_evictable_idle_time: Option<Duration>,

    /// Objects, idle or freshly created, that may fail activation or validation
    /// within one borrow before it gives up with `ValidateFailed`
    pub borrow_attempts: usize,

    /// How long `close` waits for a running eviction cycle to finish
    pub evictor_shutdown_timeout: Duration,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            max_total: Some(8),
            max_idle: Some(8),
            min_idle: 0,
            lifo: true,
            block_when_exhausted: true,
            borrow_timeout: None,
            test_on_create: false,
            test_on_borrow: false,
            test_on_return: false,
            test_while_idle: false,
            time_between_eviction_runs: None,
            num_tests_per_eviction_run: 3,
            min_evictable_idle_time: Some(Duration::from_secs(30 * 60)),
            soft_min_evictable_idle_time: None,
            borrow_attempts: 3,
            evictor_shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of tracked objects; `0` means unbounded
    pub fn with_max_total(mut self, max: usize) -> Self {
        self.max_total = (max > 0).then_some(max);
        self
    }

    /// Remove the limit on tracked objects
    pub fn unbounded(mut self) -> Self {
        self.max_total = None;
        self
    }

    pub fn with_max_idle(mut self, max: usize) -> Self {
        self.max_idle = Some(max);
        self
    }

    pub fn with_min_idle(mut self, min: usize) -> Self {
        self.min_idle = min;
        self
    }

    /// Reuse idle objects first-in first-out instead of LIFO
    pub fn with_fifo(mut self) -> Self {
        self.lifo = false;
        self
    }

    /// Fail immediately with `PoolExhausted` instead of waiting
    pub fn with_fail_fast(mut self) -> Self {
        self.block_when_exhausted = false;
        self
    }

    /// Set how long an exhausted borrow waits for capacity
    pub fn with_borrow_timeout(mut self, timeout: Duration) -> Self {
        self.borrow_timeout = Some(timeout);
        self
    }

    pub fn with_test_on_create(mut self, enabled: bool) -> Self {
        self.test_on_create = enabled;
        self
    }

    pub fn with_test_on_borrow(mut self, enabled: bool) -> Self {
        self.test_on_borrow = enabled;
        self
    }

    pub fn with_test_on_return(mut self, enabled: bool) -> Self {
        self.test_on_return = enabled;
        self
    }

    pub fn with_test_while_idle(mut self, enabled: bool) -> Self {
        self.test_while_idle = enabled;
        self
    }

    /// Run the eviction runner every `period`; a zero period disables it
    pub fn with_eviction(mut self, period: Duration) -> Self {
        self.time_between_eviction_runs = (!period.is_zero()).then_some(period);
        self
    }

    pub fn with_num_tests_per_eviction_run(mut self, tests: isize) -> Self {
        self.num_tests_per_eviction_run = tests;
        self
    }

    pub fn with_min_evictable_idle_time(mut self, idle: Duration) -> Self {
        self.min_evictable_idle_time = Some(idle);
        self
    }

    pub fn with_soft_min_evictable_idle_time(mut self, idle: Duration) -> Self {
        self.soft_min_evictable_idle_time = Some(idle);
        self
    }

    pub fn with_borrow_attempts(mut self, attempts: usize) -> Self {
        self.borrow_attempts = attempts.max(1);
        self
    }

    pub fn with_evictor_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.evictor_shutdown_timeout = timeout;
        self
    }

    /// Number of idle objects the eviction runner keeps, capped by `max_idle`
    pub(crate) fn effective_min_idle(&self) -> usize {
        match self.max_idle {
            Some(max) => self.min_idle.min(max),
            None => self.min_idle,
        }
    }

    pub(crate) fn eviction_config(&self) -> EvictionConfig {
        EvictionConfig {
            idle_evict_time: self.min_evictable_idle_time,
            idle_soft_evict_time: self.soft_min_evictable_idle_time,
            min_idle: self.effective_min_idle(),
        }
    }
}

/// Thresholds handed to an [`EvictionPolicy`](crate::EvictionPolicy)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionConfig {
    pub idle_evict_time: Option<Duration>,
    pub idle_soft_evict_time: Option<Duration>,
    pub min_idle: usize,
}
