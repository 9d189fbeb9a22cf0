//! Metrics collection and export for object pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "serde")]
use serde::Serialize;

/// Metrics data for a pool
///
/// # Examples
///
/// ```
/// use lifecycle_pool::{simple_factory, FactoryError, ObjectPool};
///
/// # #[tokio::main]
/// # async fn main() {
/// let pool = ObjectPool::with_default_config(simple_factory(|| async { Ok::<_, FactoryError>(1u8) }));
///
/// let obj = pool.borrow_object().await.unwrap();
/// let metrics = pool.get_metrics();
/// assert_eq!(metrics.created, 1);
/// assert_eq!(metrics.borrowed, 1);
/// assert_eq!(metrics.active_objects, 1);
/// # pool.return_object(obj).await.unwrap();
/// # }
/// ```
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct PoolMetrics {
    /// Objects created by the factory
    pub created: u64,

    /// Objects removed from tracking and destroyed
    pub destroyed: u64,

    /// Objects destroyed by the eviction runner
    pub destroyed_by_evictor: u64,

    /// Objects destroyed because activation or validation failed on borrow
    pub destroyed_by_borrow_validation: u64,

    /// Objects dropped by their borrower without being returned
    pub abandoned: u64,

    /// Successful borrows
    pub borrowed: u64,

    /// Objects handed back through `return_object`
    pub returned: u64,

    /// Borrows that failed because no capacity was available
    pub exhausted_events: u64,

    /// Factory `make_object` failures
    pub create_failures: u64,

    /// Factory `destroy_object` failures
    pub destroy_failures: u64,

    /// Current idle objects
    pub idle_objects: usize,

    /// Current lent objects
    pub active_objects: usize,

    /// Borrowers currently waiting for capacity
    pub waiters: usize,

    /// Configured limit on tracked objects
    pub max_total: Option<usize>,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("created".to_string(), self.created.to_string());
        metrics.insert("destroyed".to_string(), self.destroyed.to_string());
        metrics.insert("destroyed_by_evictor".to_string(), self.destroyed_by_evictor.to_string());
        metrics.insert(
            "destroyed_by_borrow_validation".to_string(),
            self.destroyed_by_borrow_validation.to_string(),
        );
        metrics.insert("abandoned".to_string(), self.abandoned.to_string());
        metrics.insert("borrowed".to_string(), self.borrowed.to_string());
        metrics.insert("returned".to_string(), self.returned.to_string());
        metrics.insert("exhausted_events".to_string(), self.exhausted_events.to_string());
        metrics.insert("create_failures".to_string(), self.create_failures.to_string());
        metrics.insert("destroy_failures".to_string(), self.destroy_failures.to_string());
        metrics.insert("idle_objects".to_string(), self.idle_objects.to_string());
        metrics.insert("active_objects".to_string(), self.active_objects.to_string());
        metrics.insert("waiters".to_string(), self.waiters.to_string());
        metrics.insert(
            "max_total".to_string(),
            self.max_total.map_or_else(|| "unbounded".to_string(), |max| max.to_string()),
        );
        metrics
    }
}

/// Metrics exporter for Prometheus format
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use lifecycle_pool::{simple_factory, FactoryError, ObjectPool};
    /// use std::collections::HashMap;
    ///
    /// let pool = ObjectPool::with_default_config(simple_factory(|| async { Ok::<_, FactoryError>(1u8) }));
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = pool.export_metrics_prometheus("my_pool", Some(&tags)).unwrap();
    /// assert!(output.contains("objectpool_objects_active"));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> prometheus::Result<String> {
        use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

        let registry = Registry::new();
        let labels = Self::format_labels(pool_name, tags);
        let opts = |name: &str, help: &str| Opts::new(name, help).const_labels(labels.clone());

        let gauges = [
            ("objectpool_objects_active", "Current lent objects", metrics.active_objects),
            ("objectpool_objects_idle", "Current idle objects", metrics.idle_objects),
            ("objectpool_waiters", "Borrowers waiting for capacity", metrics.waiters),
        ];
        for (name, help, value) in gauges {
            let gauge = IntGauge::with_opts(opts(name, help))?;
            gauge.set(i64::try_from(value).unwrap_or(i64::MAX));
            registry.register(Box::new(gauge))?;
        }

        let counters = [
            ("objectpool_objects_created_total", "Objects created", metrics.created),
            ("objectpool_objects_destroyed_total", "Objects destroyed", metrics.destroyed),
            (
                "objectpool_objects_evicted_total",
                "Objects destroyed by the eviction runner",
                metrics.destroyed_by_evictor,
            ),
            (
                "objectpool_borrow_validation_failures_total",
                "Objects destroyed by borrow validation",
                metrics.destroyed_by_borrow_validation,
            ),
            ("objectpool_objects_abandoned_total", "Objects dropped without return", metrics.abandoned),
            ("objectpool_objects_borrowed_total", "Successful borrows", metrics.borrowed),
            ("objectpool_objects_returned_total", "Objects returned", metrics.returned),
            ("objectpool_events_exhausted_total", "Pool exhausted events", metrics.exhausted_events),
            ("objectpool_create_failures_total", "Factory create failures", metrics.create_failures),
            ("objectpool_destroy_failures_total", "Factory destroy failures", metrics.destroy_failures),
        ];
        for (name, help, value) in counters {
            let counter = IntCounter::with_opts(opts(name, help))?;
            counter.inc_by(value);
            registry.register(Box::new(counter))?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|err| prometheus::Error::Msg(err.to_string()))
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> HashMap<String, String> {
        let mut labels = tags.cloned().unwrap_or_default();
        labels.insert("pool".to_string(), pool_name.to_string());
        labels
    }
}

/// Internal metrics tracker
#[derive(Default)]
pub(crate) struct MetricsTracker {
    created: AtomicU64,
    destroyed: AtomicU64,
    destroyed_by_evictor: AtomicU64,
    destroyed_by_borrow_validation: AtomicU64,
    abandoned: AtomicU64,
    borrowed: AtomicU64,
    returned: AtomicU64,
    exhausted_events: AtomicU64,
    create_failures: AtomicU64,
    destroy_failures: AtomicU64,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_destroyed(&self) {
        self.destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self) {
        self.destroyed_by_evictor.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_borrow_validation_failure(&self) {
        self.destroyed_by_borrow_validation.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_borrowed(&self) {
        self.borrowed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_returned(&self) {
        self.returned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exhausted(&self) {
        self.exhausted_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_create_failure(&self) {
        self.create_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_destroy_failure(&self) {
        self.destroy_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(
        &self,
        idle: usize,
        active: usize,
        waiters: usize,
        max_total: Option<usize>,
    ) -> PoolMetrics {
        PoolMetrics {
            created: self.created.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            destroyed_by_evictor: self.destroyed_by_evictor.load(Ordering::Relaxed),
            destroyed_by_borrow_validation: self.destroyed_by_borrow_validation.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            borrowed: self.borrowed.load(Ordering::Relaxed),
            returned: self.returned.load(Ordering::Relaxed),
            exhausted_events: self.exhausted_events.load(Ordering::Relaxed),
            create_failures: self.create_failures.load(Ordering::Relaxed),
            destroy_failures: self.destroy_failures.load(Ordering::Relaxed),
            idle_objects: idle,
            active_objects: active,
            waiters,
            max_total,
        }
    }
}
