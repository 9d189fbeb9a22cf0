//! Idle object eviction

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};

use crate::config::EvictionConfig;
use crate::idle::IdleEntry;
use crate::object::ObjectInfo;
use crate::pool::{DestroyCause, Shared};

/// Decides whether an idle object should be destroyed during an eviction run
///
/// # Examples
///
/// ```
/// use lifecycle_pool::{EvictionConfig, EvictionPolicy, ObjectInfo};
///
/// /// Evict anything that has been borrowed more than 1000 times
/// struct MaxUses;
///
/// impl EvictionPolicy for MaxUses {
///     fn evict(&self, _config: &EvictionConfig, object: &ObjectInfo, _idle_count: usize) -> bool {
///         object.borrow_count() > 1000
///     }
/// }
/// ```
pub trait EvictionPolicy: Send + Sync {
    /// Called under the pool lock; `idle_count` includes `object`
    fn evict(&self, config: &EvictionConfig, object: &ObjectInfo, idle_count: usize) -> bool;
}

/// Evicts objects idle for at least `idle_evict_time`, or for at least
/// `idle_soft_evict_time` while more than `min_idle` objects are idle
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEvictionPolicy;

impl EvictionPolicy for DefaultEvictionPolicy {
    fn evict(&self, config: &EvictionConfig, object: &ObjectInfo, idle_count: usize) -> bool {
        let idle = object.idle_time();
        if let Some(hard) = config.idle_evict_time
            && idle >= hard
        {
            return true;
        }
        matches!(config.idle_soft_evict_time, Some(soft) if idle >= soft && idle_count > config.min_idle)
    }
}

/// Number of idle objects to examine in one run
pub(crate) fn num_tests(configured: isize, idle: usize) -> usize {
    if configured >= 0 {
        (configured as usize).min(idle)
    } else {
        idle.div_ceil(configured.unsigned_abs())
    }
}

/// Handle to the background eviction task
pub(crate) struct Evictor {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Evictor {
    /// Spawn the runner on the current tokio runtime
    pub fn spawn<T: Send + 'static>(pool: Weak<Shared<T>>, period: Duration) -> Option<Self> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::warn!("no tokio runtime available, idle eviction is disabled");
                return None;
            }
        };
        let (shutdown, mut stopped) = watch::channel(false);

        let handle = runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stopped.changed() => break,
                }
                let Some(pool) = pool.upgrade() else { break };
                pool.evict().await;
                pool.ensure_min_idle().await;
            }
            tracing::debug!("eviction runner stopped");
        });

        Some(Self { shutdown, handle })
    }

    /// Signal the runner and wait for a running cycle to finish
    pub async fn stop(self, wait: Duration) {
        let _ = self.shutdown.send(true);
        if timeout(wait, self.handle).await.is_err() {
            tracing::warn!(?wait, "eviction runner did not stop in time");
        }
    }
}

impl<T: Send + 'static> Shared<T> {
    /// Run one eviction cycle over the idle registry
    pub(crate) async fn evict(self: &Arc<Self>) {
        let config = self.config.eviction_config();
        let mut evicted = Vec::new();
        let mut survivors = Vec::new();
        let generation = {
            let mut state = self.state.lock();
            if state.closed || state.idle.is_empty() {
                return;
            }
            let mut idle_count = state.idle.len();
            let tests = num_tests(self.config.num_tests_per_eviction_run, idle_count);
            for entry in state.idle.claim_for_eviction(tests) {
                let Some(info) = state.objects.get_mut(&entry.id) else {
                    tracing::error!(object = %entry.id, "idle object missing from registry");
                    continue;
                };
                info.start_eviction_test();
                if self.eviction_policy.evict(&config, info, idle_count) {
                    idle_count -= 1;
                    evicted.push(entry);
                } else {
                    survivors.push(entry);
                }
            }
            state.generation
        };

        for entry in evicted {
            tracing::debug!(object = %entry.id, "evicting idle object");
            self.destroy(entry.id, entry.object, DestroyCause::Evicted).await;
        }

        let mut healthy = Vec::with_capacity(survivors.len());
        for mut entry in survivors {
            if self.config.test_while_idle && !self.test_idle(&mut entry).await {
                tracing::debug!(object = %entry.id, "idle object failed validation");
                self.destroy(entry.id, entry.object, DestroyCause::Evicted).await;
                continue;
            }
            healthy.push(entry);
        }

        // Returns may have refilled the idle set while these were claimed
        let mut discarded = Vec::new();
        {
            let mut state = self.state.lock();
            let retired = state.closed || state.generation != generation;
            for entry in healthy {
                let tested = state
                    .objects
                    .get_mut(&entry.id)
                    .is_some_and(|info| info.end_eviction_test());
                if retired || !tested {
                    discarded.push((entry, DestroyCause::Cleared));
                } else if !state.capacity.idle_has_room(state.idle.len()) {
                    discarded.push((entry, DestroyCause::MaxIdle));
                } else {
                    state.idle.restore(entry);
                }
            }
        }
        self.waiters.notify_all();

        for (entry, cause) in discarded {
            self.destroy(entry.id, entry.object, cause).await;
        }
    }

    async fn test_idle(&self, entry: &mut IdleEntry<T>) -> bool {
        if let Err(err) = self.factory.activate_object(&mut entry.object).await {
            tracing::warn!(object = %entry.id, error = %err, "activation failed during eviction test");
            return false;
        }
        if !self.factory.validate_object(&mut entry.object).await {
            return false;
        }
        if let Err(err) = self.factory.passivate_object(&mut entry.object).await {
            tracing::warn!(object = %entry.id, error = %err, "passivation failed during eviction test");
            return false;
        }
        true
    }

    /// Create idle objects until `min_idle` is met or capacity runs out
    pub(crate) async fn ensure_min_idle(self: &Arc<Self>) {
        let target = self.config.effective_min_idle();
        loop {
            let reservation = {
                let mut state = self.state.lock();
                if state.closed || state.idle.len() >= target || !state.capacity.try_reserve() {
                    return;
                }
                self.reservation()
            };

            let object = match self.factory.make_object().await {
                Ok(object) => object,
                Err(err) => {
                    self.metrics.record_create_failure();
                    tracing::warn!(error = %err, "failed to create idle object");
                    return;
                }
            };
            if let Err((err, object)) = self.register_idle(reservation, object) {
                tracing::debug!(error = %err, "discarding idle object");
                self.dispose(None, object).await;
                return;
            }
        }
    }
}
