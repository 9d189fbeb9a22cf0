//! Core object pool implementation

use crate::capacity::{Capacity, Waiters};
use crate::config::PoolConfiguration;
use crate::errors::{PoolError, PoolResult, ReturnError};
use crate::eviction::{DefaultEvictionPolicy, EvictionPolicy, Evictor};
use crate::factory::PooledObjectFactory;
use crate::idle::IdleRegistry;
use crate::metrics::{MetricsTracker, PoolMetrics};
#[cfg(feature = "metrics")]
use crate::metrics::MetricsExporter;
use crate::object::{ObjectId, ObjectInfo, PooledObjectState};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;

/// An object lent out by an [`ObjectPool`]
///
/// Hand it back with [`ObjectPool::return_object`] or
/// [`ObjectPool::invalidate_object`]. Dropping it instead abandons it: the
/// pool frees its slot and destroys the resource in the background.
pub struct PooledObject<T: Send + 'static> {
    value: Option<T>,
    info: ObjectInfo,
    pool: Weak<Shared<T>>,
}

impl<T: Send + 'static> PooledObject<T> {
    fn new(value: T, info: ObjectInfo, pool: Weak<Shared<T>>) -> Self {
        Self {
            value: Some(value),
            info,
            pool,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.info.id()
    }

    /// Metadata as of the moment the object was borrowed
    pub fn info(&self) -> &ObjectInfo {
        &self.info
    }

    fn into_parts(mut self) -> (ObjectId, T) {
        let value = self.value.take().expect("Value already taken");
        (self.info.id(), value)
    }
}

impl<T: Send + 'static> Deref for PooledObject<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.value.as_ref().expect("Value already taken")
    }
}

impl<T: Send + 'static> DerefMut for PooledObject<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.value.as_mut().expect("Value already taken")
    }
}

impl<T: Send + 'static> Drop for PooledObject<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            match self.pool.upgrade() {
                Some(pool) => pool.abandon(self.info.id(), value),
                None => drop(value),
            }
        }
    }
}

impl<T: Send + fmt::Debug + 'static> fmt::Debug for PooledObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledObject")
            .field("id", &self.info.id())
            .field("value", &self.value)
            .finish()
    }
}

/// Why an object left the pool, for metrics and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DestroyCause {
    BorrowValidation,
    ReturnValidation,
    Passivation,
    MaxIdle,
    Invalidated,
    Evicted,
    Cleared,
}

/// Bookkeeping guarded by the pool lock
pub(crate) struct PoolState<T> {
    pub idle: IdleRegistry<T>,
    pub objects: HashMap<ObjectId, ObjectInfo>,
    pub capacity: Capacity,
    pub closed: bool,
    /// Bumped by every `clear`; objects claimed before a bump are not restored
    pub generation: u64,
}

impl<T> PoolState<T> {
    fn num_active(&self) -> usize {
        self.objects.values().filter(|info| info.is_lent()).count()
    }

    /// Forget an object and give back its slot
    fn untrack(&mut self, id: ObjectId) -> bool {
        match self.objects.remove(&id) {
            Some(_) => {
                self.capacity.release();
                true
            }
            None => false,
        }
    }
}

pub(crate) struct Shared<T: Send + 'static> {
    pub config: PoolConfiguration,
    pub factory: Arc<dyn PooledObjectFactory<T>>,
    pub eviction_policy: Arc<dyn EvictionPolicy>,
    pub state: Mutex<PoolState<T>>,
    pub waiters: Waiters,
    pub metrics: MetricsTracker,
    evictor: Mutex<Option<Evictor>>,
}

/// A creation slot taken from the capacity controller.
///
/// Dropping it without [`commit`](Reservation::commit) gives the slot back,
/// so a failed or cancelled creation never leaks capacity. Never drop one
/// while holding the pool lock.
pub(crate) struct Reservation<T: Send + 'static> {
    pool: Arc<Shared<T>>,
    armed: bool,
}

impl<T: Send + 'static> Reservation<T> {
    fn commit(mut self) {
        self.armed = false;
    }
}

impl<T: Send + 'static> Drop for Reservation<T> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.state.lock().capacity.release();
            self.pool.waiters.notify_all();
        }
    }
}

enum Acquired<T: Send + 'static> {
    Idle(PooledObject<T>),
    Reserved(Reservation<T>),
}

/// What `return_object` found when it looked the object up
enum ReturnCheck {
    Allocated,
    Retired,
    Rejected(PoolError),
}

impl<T: Send + 'static> Shared<T> {
    /// Caller must have taken the slot from `state.capacity`
    pub(crate) fn reservation(self: &Arc<Self>) -> Reservation<T> {
        Reservation {
            pool: Arc::clone(self),
            armed: true,
        }
    }

    fn try_acquire(self: &Arc<Self>) -> PoolResult<Option<Acquired<T>>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PoolError::PoolClosed);
        }
        while let Some(entry) = state.idle.pop() {
            let allocated = state
                .objects
                .get_mut(&entry.id)
                .and_then(|info| info.allocate().then(|| info.clone()));
            match allocated {
                Some(info) => {
                    let handle = PooledObject::new(entry.object, info, Arc::downgrade(self));
                    return Ok(Some(Acquired::Idle(handle)));
                }
                None => {
                    tracing::error!(object = %entry.id, "idle object is not in the idle state, dropping it");
                    state.untrack(entry.id);
                }
            }
        }
        if state.capacity.try_reserve() {
            return Ok(Some(Acquired::Reserved(self.reservation())));
        }
        Ok(None)
    }

    /// Start tracking a freshly created object as lent
    fn register_allocated(self: &Arc<Self>, reservation: Reservation<T>, object: T) -> Result<PooledObject<T>, T> {
        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            drop(reservation);
            return Err(object);
        }
        let mut info = ObjectInfo::new(ObjectId::next(), PooledObjectState::Idle);
        info.allocate();
        state.objects.insert(info.id(), info.clone());
        reservation.commit();
        drop(state);

        self.metrics.record_created();
        tracing::debug!(object = %info.id(), "created pooled object");
        Ok(PooledObject::new(object, info, Arc::downgrade(self)))
    }

    /// Start tracking a freshly created object as idle
    pub(crate) fn register_idle(&self, reservation: Reservation<T>, object: T) -> Result<(), (PoolError, T)> {
        let mut state = self.state.lock();
        let rejected = if state.closed {
            Some(PoolError::PoolClosed)
        } else if !state.capacity.idle_has_room(state.idle.len()) {
            Some(PoolError::PoolExhausted)
        } else {
            None
        };
        if let Some(err) = rejected {
            drop(state);
            drop(reservation);
            return Err((err, object));
        }

        let info = ObjectInfo::new(ObjectId::next(), PooledObjectState::Idle);
        let id = info.id();
        state.objects.insert(id, info);
        state.idle.push(id, object);
        reservation.commit();
        drop(state);

        self.metrics.record_created();
        self.waiters.notify_all();
        tracing::debug!(object = %id, "created idle object");
        Ok(())
    }

    async fn borrow(self: &Arc<Self>, deadline: Option<Instant>) -> PoolResult<PooledObject<T>> {
        let mut failed_attempts = 0;
        loop {
            let notified = self.waiters.notified();
            let (handle, fresh) = match self.try_acquire()? {
                Some(Acquired::Idle(handle)) => (handle, false),
                Some(Acquired::Reserved(reservation)) => {
                    let object = match self.factory.make_object().await {
                        Ok(object) => object,
                        Err(err) => {
                            self.metrics.record_create_failure();
                            return Err(PoolError::create_failed(err));
                        }
                    };
                    match self.register_allocated(reservation, object) {
                        Ok(handle) => (handle, true),
                        Err(object) => {
                            self.dispose(None, object).await;
                            return Err(PoolError::PoolClosed);
                        }
                    }
                }
                None => {
                    if !self.config.block_when_exhausted {
                        self.metrics.record_exhausted();
                        return Err(PoolError::PoolExhausted);
                    }
                    if let Err(err) = self.waiters.wait(notified, deadline).await {
                        self.metrics.record_exhausted();
                        return Err(err);
                    }
                    continue;
                }
            };

            match self.prepare(handle, fresh).await {
                Ok(handle) => {
                    self.metrics.record_borrowed();
                    return Ok(handle);
                }
                Err(err) => {
                    failed_attempts += 1;
                    if failed_attempts >= self.config.borrow_attempts.max(1) {
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Activate and, when configured, validate an object before lending it
    async fn prepare(&self, mut handle: PooledObject<T>, fresh: bool) -> PoolResult<PooledObject<T>> {
        let healthy = match self.factory.activate_object(&mut *handle).await {
            Ok(()) => {
                let test = self.config.test_on_borrow || (fresh && self.config.test_on_create);
                !test || self.factory.validate_object(&mut *handle).await
            }
            Err(err) => {
                tracing::debug!(object = %handle.id(), error = %err, "activation failed");
                false
            }
        };
        if healthy {
            return Ok(handle);
        }

        self.metrics.record_borrow_validation_failure();
        let (id, object) = handle.into_parts();
        self.destroy(id, object, DestroyCause::BorrowValidation).await;
        Err(PoolError::ValidateFailed)
    }

    fn check_lent(&self, id: ObjectId) -> ReturnCheck {
        let state = self.state.lock();
        match state.objects.get(&id).map(ObjectInfo::state) {
            None => ReturnCheck::Rejected(PoolError::UnknownObject(id)),
            Some(PooledObjectState::Allocated) => ReturnCheck::Allocated,
            Some(PooledObjectState::Invalid) => ReturnCheck::Retired,
            Some(_) => ReturnCheck::Rejected(PoolError::DoubleReturn(id)),
        }
    }

    async fn return_object(&self, handle: PooledObject<T>) -> Result<(), ReturnError<T>> {
        let retired = match self.check_lent(handle.id()) {
            ReturnCheck::Allocated => false,
            ReturnCheck::Retired => true,
            ReturnCheck::Rejected(err) => return Err(ReturnError::new(err, handle)),
        };
        self.metrics.record_returned();
        let (id, mut object) = handle.into_parts();

        if retired {
            self.destroy(id, object, DestroyCause::Cleared).await;
            return Ok(());
        }
        if let Err(err) = self.factory.passivate_object(&mut object).await {
            tracing::warn!(object = %id, error = %err, "passivation failed");
            self.destroy(id, object, DestroyCause::Passivation).await;
            return Ok(());
        }
        if self.config.test_on_return && !self.factory.validate_object(&mut object).await {
            self.destroy(id, object, DestroyCause::ReturnValidation).await;
            return Ok(());
        }

        let leftover = {
            let mut state = self.state.lock();
            let state = &mut *state;
            let allocated = state
                .objects
                .get(&id)
                .is_some_and(|info| info.state() == PooledObjectState::Allocated);
            if !allocated || state.closed {
                Some((object, DestroyCause::Cleared))
            } else if !state.capacity.idle_has_room(state.idle.len()) {
                Some((object, DestroyCause::MaxIdle))
            } else {
                if let Some(info) = state.objects.get_mut(&id) {
                    info.deallocate();
                }
                state.idle.push(id, object);
                None
            }
        };

        match leftover {
            Some((object, cause)) => self.destroy(id, object, cause).await,
            None => self.waiters.notify_all(),
        }
        Ok(())
    }

    async fn invalidate_object(&self, handle: PooledObject<T>) -> Result<(), ReturnError<T>> {
        if let ReturnCheck::Rejected(err) = self.check_lent(handle.id()) {
            return Err(ReturnError::new(err, handle));
        }
        let (id, object) = handle.into_parts();
        self.destroy(id, object, DestroyCause::Invalidated).await;
        Ok(())
    }

    /// Remove an object from tracking, wake waiters and destroy it
    pub(crate) async fn destroy(&self, id: ObjectId, object: T, cause: DestroyCause) {
        let tracked = self.state.lock().untrack(id);
        if tracked {
            self.metrics.record_destroyed();
            if cause == DestroyCause::Evicted {
                self.metrics.record_evicted();
            }
            self.waiters.notify_all();
        }
        tracing::debug!(object = %id, ?cause, "destroying pooled object");
        self.dispose(Some(id), object).await;
    }

    /// Hand an object to the factory for destruction; failures are only logged
    pub(crate) async fn dispose(&self, id: Option<ObjectId>, object: T) {
        if let Err(err) = self.factory.destroy_object(object).await {
            self.metrics.record_destroy_failure();
            let err = PoolError::destroy_failed(err);
            match id {
                Some(id) => tracing::warn!(object = %id, error = %err, "destroy failed"),
                None => tracing::warn!(error = %err, "destroy failed"),
            }
        }
    }

    /// Release the slot of a handle dropped without being returned
    fn abandon(&self, id: ObjectId, object: T) {
        let tracked = {
            let mut state = self.state.lock();
            if let Some(info) = state.objects.get_mut(&id) {
                info.mark_abandoned();
            }
            state.untrack(id)
        };
        if !tracked {
            drop(object);
            return;
        }
        self.metrics.record_abandoned();
        self.metrics.record_destroyed();
        self.waiters.notify_all();
        tracing::warn!(object = %id, "pooled object dropped without being returned");

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let factory = Arc::clone(&self.factory);
                runtime.spawn(async move {
                    if let Err(err) = factory.destroy_object(object).await {
                        tracing::warn!(object = %id, error = %err, "destroy failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(object = %id, "no tokio runtime available, dropping abandoned object");
                drop(object);
            }
        }
    }

    async fn add_object(self: &Arc<Self>) -> PoolResult<()> {
        let reservation = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(PoolError::PoolClosed);
            }
            if !state.capacity.try_reserve() {
                return Err(PoolError::PoolExhausted);
            }
            self.reservation()
        };

        let mut object = match self.factory.make_object().await {
            Ok(object) => object,
            Err(err) => {
                self.metrics.record_create_failure();
                return Err(PoolError::create_failed(err));
            }
        };
        if let Err(err) = self.factory.passivate_object(&mut object).await {
            drop(reservation);
            self.dispose(None, object).await;
            return Err(PoolError::passivate_failed(err));
        }
        if let Err((err, object)) = self.register_idle(reservation, object) {
            self.dispose(None, object).await;
            return Err(err);
        }
        Ok(())
    }

    /// Destroy idle objects, including those under an eviction test, and mark
    /// lent objects for destruction on return
    async fn clear(&self) {
        let drained = {
            let mut state = self.state.lock();
            state.generation += 1;
            for info in state.objects.values_mut() {
                if info.state() == PooledObjectState::Allocated {
                    info.invalidate();
                }
            }
            state.idle.drain()
        };
        for entry in drained {
            self.destroy(entry.id, entry.object, DestroyCause::Cleared).await;
        }
    }

    async fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.waiters.notify_all();

        let evictor = self.evictor.lock().take();
        if let Some(evictor) = evictor {
            evictor.stop(self.config.evictor_shutdown_timeout).await;
        }
        self.clear().await;
        tracing::debug!("pool closed");
    }
}

/// Thread-safe pool of objects created and managed through a [`PooledObjectFactory`]
///
/// Cloning an `ObjectPool` yields another handle to the same pool.
pub struct ObjectPool<T: Send + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Clone for ObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> ObjectPool<T> {
    /// Create a pool bound to `factory`.
    ///
    /// When `time_between_eviction_runs` is set the eviction runner is spawned
    /// on the current tokio runtime.
    pub fn new<F>(factory: F, config: PoolConfiguration) -> Self
    where
        F: PooledObjectFactory<T> + 'static,
    {
        Self::with_eviction_policy(factory, config, DefaultEvictionPolicy)
    }

    /// Create a pool with the default configuration
    pub fn with_default_config<F>(factory: F) -> Self
    where
        F: PooledObjectFactory<T> + 'static,
    {
        Self::new(factory, PoolConfiguration::default())
    }

    /// Create a pool that uses a custom eviction policy
    pub fn with_eviction_policy<F, P>(factory: F, config: PoolConfiguration, policy: P) -> Self
    where
        F: PooledObjectFactory<T> + 'static,
        P: EvictionPolicy + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                idle: IdleRegistry::new(config.lifo),
                objects: HashMap::new(),
                capacity: Capacity::new(&config),
                closed: false,
                generation: 0,
            }),
            factory: Arc::new(factory),
            eviction_policy: Arc::new(policy),
            waiters: Waiters::new(),
            metrics: MetricsTracker::new(),
            evictor: Mutex::new(None),
            config,
        });

        let period = shared.config.time_between_eviction_runs.filter(|period| !period.is_zero());
        if let Some(period) = period {
            *shared.evictor.lock() = Evictor::spawn(Arc::downgrade(&shared), period);
        }
        Self { shared }
    }

    /// Borrow an object, waiting up to the configured `borrow_timeout` when exhausted
    pub async fn borrow_object(&self) -> PoolResult<PooledObject<T>> {
        let deadline = self.shared.config.borrow_timeout.map(|timeout| Instant::now() + timeout);
        self.shared.borrow(deadline).await
    }

    /// Borrow an object, waiting at most `timeout` when exhausted
    pub async fn borrow_object_timeout(&self, timeout: Duration) -> PoolResult<PooledObject<T>> {
        self.shared.borrow(Some(Instant::now() + timeout)).await
    }

    /// Give a borrowed object back to the pool
    pub async fn return_object(&self, object: PooledObject<T>) -> Result<(), ReturnError<T>> {
        self.shared.return_object(object).await
    }

    /// Destroy a borrowed object the caller found to be broken
    pub async fn invalidate_object(&self, object: PooledObject<T>) -> Result<(), ReturnError<T>> {
        self.shared.invalidate_object(object).await
    }

    /// Create an object and put it straight into the idle set
    pub async fn add_object(&self) -> PoolResult<()> {
        self.shared.add_object().await
    }

    /// Create idle objects until `min_idle` is reached
    pub async fn prepare_pool(&self) -> PoolResult<()> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }
        self.shared.ensure_min_idle().await;
        Ok(())
    }

    /// Destroy all idle objects; lent objects are destroyed when returned
    pub async fn clear(&self) {
        self.shared.clear().await
    }

    /// Stop eviction, destroy idle objects and reject further borrows
    pub async fn close(&self) {
        self.shared.close().await
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Number of idle objects
    pub fn num_idle(&self) -> usize {
        self.shared.state.lock().idle.len()
    }

    /// Number of objects currently lent out
    pub fn num_active(&self) -> usize {
        self.shared.state.lock().num_active()
    }

    /// Number of borrowers waiting for capacity
    pub fn num_waiters(&self) -> usize {
        self.shared.waiters.count()
    }

    pub fn config(&self) -> &PoolConfiguration {
        &self.shared.config
    }

    /// Get pool metrics
    pub fn get_metrics(&self) -> PoolMetrics {
        let (idle, active, max_total) = {
            let state = self.shared.state.lock();
            (state.idle.len(), state.num_active(), state.capacity.max_total())
        };
        self.shared
            .metrics
            .get_metrics(idle, active, self.shared.waiters.count(), max_total)
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.get_metrics().export()
    }

    /// Export metrics in Prometheus format
    #[cfg(feature = "metrics")]
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> prometheus::Result<String> {
        MetricsExporter::export_prometheus(&self.get_metrics(), pool_name, tags)
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<Shared<T>> {
        &self.shared
    }

    #[cfg(test)]
    pub(crate) fn total(&self) -> usize {
        self.shared.state.lock().capacity.total()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FactoryError;
    use crate::factory::simple_factory;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        created: AtomicUsize,
        destroyed: AtomicUsize,
        activated: AtomicUsize,
        passivated: AtomicUsize,
        fail_make: AtomicBool,
        fail_activate: AtomicBool,
        fail_validate: AtomicBool,
        fail_passivate: AtomicBool,
        fail_destroy: AtomicBool,
        make_delay_ms: AtomicU64,
        validate_delay_ms: AtomicU64,
    }

    async fn pause(delay_ms: &AtomicU64) {
        let delay = delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    struct TestFactory(Arc<Counters>);

    #[async_trait]
    impl PooledObjectFactory<usize> for TestFactory {
        async fn make_object(&self) -> Result<usize, FactoryError> {
            pause(&self.0.make_delay_ms).await;
            if self.0.fail_make.load(Ordering::SeqCst) {
                return Err("make failed".into());
            }
            Ok(self.0.created.fetch_add(1, Ordering::SeqCst) + 1)
        }

        async fn destroy_object(&self, _object: usize) -> Result<(), FactoryError> {
            self.0.destroyed.fetch_add(1, Ordering::SeqCst);
            if self.0.fail_destroy.load(Ordering::SeqCst) {
                return Err("destroy failed".into());
            }
            Ok(())
        }

        async fn validate_object(&self, _object: &mut usize) -> bool {
            pause(&self.0.validate_delay_ms).await;
            !self.0.fail_validate.load(Ordering::SeqCst)
        }

        async fn activate_object(&self, _object: &mut usize) -> Result<(), FactoryError> {
            self.0.activated.fetch_add(1, Ordering::SeqCst);
            if self.0.fail_activate.load(Ordering::SeqCst) {
                return Err("activate failed".into());
            }
            Ok(())
        }

        async fn passivate_object(&self, _object: &mut usize) -> Result<(), FactoryError> {
            self.0.passivated.fetch_add(1, Ordering::SeqCst);
            if self.0.fail_passivate.load(Ordering::SeqCst) {
                return Err("passivate failed".into());
            }
            Ok(())
        }
    }

    fn pool(config: PoolConfiguration) -> (ObjectPool<usize>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        (ObjectPool::new(TestFactory(Arc::clone(&counters)), config), counters)
    }

    #[tokio::test]
    async fn test_borrow_return_reuses_object() {
        let (pool, counters) = pool(PoolConfiguration::default());

        let obj = pool.borrow_object().await.unwrap();
        assert_eq!(*obj, 1);
        assert_eq!(pool.num_active(), 1);
        pool.return_object(obj).await.unwrap();
        assert_eq!(pool.num_idle(), 1);
        assert_eq!(pool.num_active(), 0);

        let obj = pool.borrow_object().await.unwrap();
        assert_eq!(*obj, 1);
        assert_eq!(obj.info().borrow_count(), 2);
        assert_eq!(counters.created.load(Ordering::SeqCst), 1);
        assert_eq!(counters.activated.load(Ordering::SeqCst), 2);
        assert_eq!(counters.passivated.load(Ordering::SeqCst), 1);
        pool.return_object(obj).await.unwrap();
    }

    #[tokio::test]
    async fn test_lifo_and_fifo_order() {
        let (lifo, _) = pool(PoolConfiguration::default());
        let a = lifo.borrow_object().await.unwrap();
        let b = lifo.borrow_object().await.unwrap();
        lifo.return_object(a).await.unwrap();
        lifo.return_object(b).await.unwrap();
        assert_eq!(*lifo.borrow_object().await.unwrap(), 2);

        let (fifo, _) = pool(PoolConfiguration::new().with_fifo());
        let a = fifo.borrow_object().await.unwrap();
        let b = fifo.borrow_object().await.unwrap();
        fifo.return_object(a).await.unwrap();
        fifo.return_object(b).await.unwrap();
        assert_eq!(*fifo.borrow_object().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fail_fast_when_exhausted() {
        let (pool, _) = pool(PoolConfiguration::new().with_max_total(1).with_fail_fast());

        let obj = pool.borrow_object().await.unwrap();
        assert!(matches!(pool.borrow_object().await, Err(PoolError::PoolExhausted)));
        assert_eq!(pool.get_metrics().exhausted_events, 1);
        pool.return_object(obj).await.unwrap();
        assert!(pool.borrow_object().await.is_ok());
    }

    #[tokio::test]
    async fn test_borrow_timeout_expires() {
        let (pool, _) = pool(PoolConfiguration::new().with_max_total(1));

        let _held = pool.borrow_object().await.unwrap();
        let result = pool.borrow_object_timeout(Duration::from_millis(30)).await;
        assert!(matches!(result, Err(PoolError::PoolExhausted)));
        assert_eq!(pool.num_waiters(), 0);
    }

    #[tokio::test]
    async fn test_waiter_woken_by_return() {
        let (pool, _) = pool(PoolConfiguration::new().with_max_total(1));
        let held = pool.borrow_object().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.borrow_object_timeout(Duration::from_secs(5)).await.map(|o| *o) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.return_object(held).await.unwrap();

        assert_eq!(waiter.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_create_failure_releases_slot() {
        let (pool, counters) = pool(PoolConfiguration::new().with_max_total(1));

        counters.fail_make.store(true, Ordering::SeqCst);
        assert!(matches!(pool.borrow_object().await, Err(PoolError::CreateFailed(_))));
        assert_eq!(pool.total(), 0);
        assert_eq!(pool.get_metrics().create_failures, 1);

        counters.fail_make.store(false, Ordering::SeqCst);
        assert!(pool.borrow_object().await.is_ok());
    }

    #[tokio::test]
    async fn test_validate_failure_is_bounded() {
        let config = PoolConfiguration::new().with_test_on_borrow(true).with_borrow_attempts(4);
        let (pool, counters) = pool(config);
        counters.fail_validate.store(true, Ordering::SeqCst);

        assert!(matches!(pool.borrow_object().await, Err(PoolError::ValidateFailed)));
        assert_eq!(counters.created.load(Ordering::SeqCst), 4);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 4);
        assert_eq!(pool.total(), 0);
        assert_eq!(pool.get_metrics().destroyed_by_borrow_validation, 4);
    }

    #[tokio::test]
    async fn test_invalid_idle_object_replaced_on_borrow() {
        let (pool, counters) = pool(PoolConfiguration::new().with_test_on_borrow(true));
        let obj = pool.borrow_object().await.unwrap();
        pool.return_object(obj).await.unwrap();

        counters.fail_validate.store(true, Ordering::SeqCst);
        let first_attempt = pool.borrow_object().await;
        assert!(matches!(first_attempt, Err(PoolError::ValidateFailed)));
        assert_eq!(pool.num_idle(), 0);

        counters.fail_validate.store(false, Ordering::SeqCst);
        let obj = pool.borrow_object().await.unwrap();
        assert!(*obj > 1);
    }

    #[tokio::test]
    async fn test_activation_failure_counts_as_validation_failure() {
        let (pool, counters) = pool(PoolConfiguration::new().with_borrow_attempts(2));
        let obj = pool.borrow_object().await.unwrap();
        pool.return_object(obj).await.unwrap();

        counters.fail_activate.store(true, Ordering::SeqCst);
        assert!(matches!(pool.borrow_object().await, Err(PoolError::ValidateFailed)));
        assert_eq!(pool.num_idle(), 0);
        assert_eq!(pool.total(), 0);
        assert_eq!(counters.created.load(Ordering::SeqCst), 2);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 2);
        assert_eq!(pool.get_metrics().destroyed_by_borrow_validation, 2);
    }

    #[tokio::test]
    async fn test_broken_idle_objects_share_the_attempt_budget() {
        let (pool, counters) = pool(PoolConfiguration::new().with_test_on_borrow(true));
        let held: Vec<_> = [
            pool.borrow_object().await.unwrap(),
            pool.borrow_object().await.unwrap(),
            pool.borrow_object().await.unwrap(),
            pool.borrow_object().await.unwrap(),
        ]
        .into();
        for obj in held {
            pool.return_object(obj).await.unwrap();
        }

        counters.fail_validate.store(true, Ordering::SeqCst);
        assert!(matches!(pool.borrow_object().await, Err(PoolError::ValidateFailed)));
        assert_eq!(pool.num_idle(), 1);
        assert_eq!(counters.created.load(Ordering::SeqCst), 4);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_on_create_validates_only_fresh_objects() {
        let (pool, counters) = pool(PoolConfiguration::new().with_test_on_create(true));
        let obj = pool.borrow_object().await.unwrap();
        pool.return_object(obj).await.unwrap();

        counters.fail_validate.store(true, Ordering::SeqCst);
        let reused = pool.borrow_object().await.unwrap();
        assert_eq!(*reused, 1);

        assert!(matches!(pool.borrow_object().await, Err(PoolError::ValidateFailed)));
        assert_eq!(counters.created.load(Ordering::SeqCst), 4);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 3);
        assert_eq!(pool.num_active(), 1);
        pool.return_object(reused).await.unwrap();
    }

    #[tokio::test]
    async fn test_destroy_failure_is_logged_not_surfaced() {
        let (pool, counters) = pool(PoolConfiguration::new().with_max_idle(1));
        let a = pool.borrow_object().await.unwrap();
        let b = pool.borrow_object().await.unwrap();
        let c = pool.borrow_object().await.unwrap();

        counters.fail_destroy.store(true, Ordering::SeqCst);
        pool.return_object(a).await.unwrap();
        pool.return_object(b).await.unwrap();
        pool.invalidate_object(c).await.unwrap();

        assert_eq!(pool.num_idle(), 1);
        assert_eq!(pool.num_active(), 0);
        assert_eq!(pool.total(), 1);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 2);
        let metrics = pool.get_metrics();
        assert_eq!(metrics.destroy_failures, 2);
        assert_eq!(metrics.destroyed, 2);
    }

    #[tokio::test]
    async fn test_passivate_failure_destroys() {
        let (pool, counters) = pool(PoolConfiguration::default());
        let obj = pool.borrow_object().await.unwrap();

        counters.fail_passivate.store(true, Ordering::SeqCst);
        pool.return_object(obj).await.unwrap();
        assert_eq!(pool.num_idle(), 0);
        assert_eq!(pool.total(), 0);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_test_on_return_destroys_invalid() {
        let (pool, counters) = pool(PoolConfiguration::new().with_test_on_return(true));
        let obj = pool.borrow_object().await.unwrap();

        counters.fail_validate.store(true, Ordering::SeqCst);
        pool.return_object(obj).await.unwrap();
        assert_eq!(pool.num_idle(), 0);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_max_idle_trims_on_return() {
        let (pool, counters) = pool(PoolConfiguration::new().with_max_idle(1));
        let a = pool.borrow_object().await.unwrap();
        let b = pool.borrow_object().await.unwrap();

        pool.return_object(a).await.unwrap();
        pool.return_object(b).await.unwrap();
        assert_eq!(pool.num_idle(), 1);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_object_rejected_untouched() {
        let (pool_a, _) = pool(PoolConfiguration::default());
        let (pool_b, counters_b) = pool(PoolConfiguration::default());

        let obj = pool_a.borrow_object().await.unwrap();
        let id = obj.id();
        let err = pool_b.return_object(obj).await.unwrap_err();
        assert!(matches!(err.error(), PoolError::UnknownObject(rejected) if *rejected == id));
        assert_eq!(counters_b.passivated.load(Ordering::SeqCst), 0);

        let obj = err.into_inner();
        assert_eq!(pool_a.num_active(), 1);
        pool_a.return_object(obj).await.unwrap();
        assert_eq!(pool_a.num_idle(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_destroys() {
        let (pool, counters) = pool(PoolConfiguration::default());
        let obj = pool.borrow_object().await.unwrap();

        pool.invalidate_object(obj).await.unwrap();
        assert_eq!(pool.num_active(), 0);
        assert_eq!(pool.num_idle(), 0);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_add_object_and_prepare_pool() {
        let (pool, counters) = pool(PoolConfiguration::new().with_min_idle(3));

        pool.add_object().await.unwrap();
        assert_eq!(pool.num_idle(), 1);
        assert_eq!(counters.passivated.load(Ordering::SeqCst), 1);

        pool.prepare_pool().await.unwrap();
        assert_eq!(pool.num_idle(), 3);
        assert_eq!(counters.created.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_add_object_respects_max_total() {
        let (pool, _) = pool(PoolConfiguration::new().with_max_total(1));
        pool.add_object().await.unwrap();
        assert!(matches!(pool.add_object().await, Err(PoolError::PoolExhausted)));
    }

    #[tokio::test]
    async fn test_clear_destroys_idle_and_retires_lent() {
        let (pool, counters) = pool(PoolConfiguration::default());
        let a = pool.borrow_object().await.unwrap();
        let b = pool.borrow_object().await.unwrap();
        pool.return_object(a).await.unwrap();

        pool.clear().await;
        assert_eq!(pool.num_idle(), 0);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);

        pool.return_object(b).await.unwrap();
        assert_eq!(pool.num_idle(), 0);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 2);
        assert_eq!(pool.total(), 0);
    }

    #[tokio::test]
    async fn test_close_rejects_borrow_and_retires_lent() {
        let (pool, counters) = pool(PoolConfiguration::default());
        let lent = pool.borrow_object().await.unwrap();
        let idle = pool.borrow_object().await.unwrap();
        pool.return_object(idle).await.unwrap();

        pool.close().await;
        assert!(pool.is_closed());
        assert!(matches!(pool.borrow_object().await, Err(PoolError::PoolClosed)));
        assert!(matches!(pool.add_object().await, Err(PoolError::PoolClosed)));

        pool.return_object(lent).await.unwrap();
        assert_eq!(pool.num_idle(), 0);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let (pool, _) = pool(PoolConfiguration::new().with_max_total(1));
        let _held = pool.borrow_object().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.borrow_object().await.map(|o| *o) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.close().await;

        assert!(matches!(waiter.await.unwrap(), Err(PoolError::PoolClosed)));
    }

    #[tokio::test]
    async fn test_dropped_object_is_abandoned() {
        let (pool, counters) = pool(PoolConfiguration::new().with_max_total(1));
        let obj = pool.borrow_object().await.unwrap();
        drop(obj);

        assert_eq!(pool.num_active(), 0);
        assert_eq!(pool.total(), 0);
        assert_eq!(pool.get_metrics().abandoned, 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
        assert!(pool.borrow_object_timeout(Duration::from_millis(50)).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_wait_does_not_leak() {
        let (pool, _) = pool(PoolConfiguration::new().with_max_total(1));
        let held = pool.borrow_object().await.unwrap();

        let cancelled = tokio::time::timeout(Duration::from_millis(20), pool.borrow_object()).await;
        assert!(cancelled.is_err());
        assert_eq!(pool.num_waiters(), 0);

        pool.return_object(held).await.unwrap();
        assert_eq!(pool.total(), 1);
        assert!(pool.borrow_object_timeout(Duration::from_millis(50)).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_creation_releases_slot() {
        let (pool, counters) = pool(PoolConfiguration::new().with_max_total(1));
        counters.make_delay_ms.store(200, Ordering::SeqCst);

        let cancelled = tokio::time::timeout(Duration::from_millis(20), pool.borrow_object()).await;
        assert!(cancelled.is_err());
        assert_eq!(pool.total(), 0);
        assert_eq!(pool.num_active(), 0);
        assert_eq!(counters.created.load(Ordering::SeqCst), 0);

        counters.make_delay_ms.store(0, Ordering::SeqCst);
        let obj = pool.borrow_object_timeout(Duration::from_millis(50)).await.unwrap();
        assert_eq!(*obj, 1);
        pool.return_object(obj).await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_limits_in_raw_config() {
        let mut config = PoolConfiguration::new().with_fail_fast();
        config.max_total = Some(0);
        config.time_between_eviction_runs = Some(Duration::ZERO);
        let (pool, _) = pool(config);
        assert!(pool.shared().evictor.lock().is_none());

        let mut held = Vec::new();
        for _ in 0..10 {
            held.push(pool.borrow_object().await.unwrap());
        }
        assert_eq!(pool.num_active(), 10);
        assert_eq!(pool.get_metrics().max_total, None);
        for obj in held {
            pool.return_object(obj).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_evict_destroys_old_idle_objects() {
        let config = PoolConfiguration::new()
            .with_min_evictable_idle_time(Duration::from_millis(10))
            .with_num_tests_per_eviction_run(-1);
        let (pool, counters) = pool(config);
        let a = pool.borrow_object().await.unwrap();
        let b = pool.borrow_object().await.unwrap();
        let lent = pool.borrow_object().await.unwrap();
        pool.return_object(a).await.unwrap();
        pool.return_object(b).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        pool.shared().evict().await;

        assert_eq!(pool.num_idle(), 0);
        assert_eq!(pool.num_active(), 1);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 2);
        assert_eq!(pool.get_metrics().destroyed_by_evictor, 2);
        pool.return_object(lent).await.unwrap();
    }

    #[tokio::test]
    async fn test_evict_keeps_fresh_objects_and_validates() {
        let config = PoolConfiguration::new().with_test_while_idle(true);
        let (pool, counters) = pool(config);
        let obj = pool.borrow_object().await.unwrap();
        pool.return_object(obj).await.unwrap();

        pool.shared().evict().await;
        assert_eq!(pool.num_idle(), 1);

        counters.fail_validate.store(true, Ordering::SeqCst);
        pool.shared().evict().await;
        assert_eq!(pool.num_idle(), 0);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_soft_eviction_keeps_min_idle() {
        let config = PoolConfiguration::new()
            .with_min_idle(1)
            .with_soft_min_evictable_idle_time(Duration::from_millis(10))
            .with_num_tests_per_eviction_run(-1);
        let (pool, counters) = pool(config);
        let a = pool.borrow_object().await.unwrap();
        let b = pool.borrow_object().await.unwrap();
        let c = pool.borrow_object().await.unwrap();
        pool.return_object(a).await.unwrap();
        pool.return_object(b).await.unwrap();
        pool.return_object(c).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        pool.shared().evict().await;

        assert_eq!(pool.num_idle(), 1);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 2);
        assert_eq!(pool.get_metrics().destroyed_by_evictor, 2);
    }

    #[tokio::test]
    async fn test_eviction_restore_respects_max_idle() {
        let config = PoolConfiguration::new()
            .with_max_idle(2)
            .with_test_while_idle(true)
            .with_num_tests_per_eviction_run(2);
        let (pool, counters) = pool(config);
        let a = pool.borrow_object().await.unwrap();
        let b = pool.borrow_object().await.unwrap();
        pool.return_object(a).await.unwrap();
        pool.return_object(b).await.unwrap();

        counters.validate_delay_ms.store(100, Ordering::SeqCst);
        let shared = Arc::clone(pool.shared());
        let cycle = tokio::spawn(async move { shared.evict().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.num_idle(), 0);

        let c = pool.borrow_object().await.unwrap();
        let d = pool.borrow_object().await.unwrap();
        pool.return_object(c).await.unwrap();
        pool.return_object(d).await.unwrap();
        assert_eq!(pool.num_idle(), 2);

        cycle.await.unwrap();
        assert_eq!(pool.num_idle(), 2);
        assert_eq!(pool.total(), 2);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clear_during_eviction_test() {
        let (pool, counters) = pool(PoolConfiguration::new().with_test_while_idle(true));
        let obj = pool.borrow_object().await.unwrap();
        pool.return_object(obj).await.unwrap();

        counters.validate_delay_ms.store(100, Ordering::SeqCst);
        let shared = Arc::clone(pool.shared());
        let cycle = tokio::spawn(async move { shared.evict().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        pool.clear().await;
        assert_eq!(pool.num_active(), 0);
        assert_eq!(pool.num_idle(), 0);

        cycle.await.unwrap();
        assert_eq!(pool.num_idle(), 0);
        assert_eq!(pool.total(), 0);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_simple_factory_pool() {
        let pool = ObjectPool::with_default_config(simple_factory(|| async {
            Ok::<_, FactoryError>(String::from("1"))
        }));
        let obj = pool.borrow_object().await.unwrap();
        assert_eq!(obj.as_str(), "1");
        pool.return_object(obj).await.unwrap();
        assert_eq!(pool.num_idle(), 1);
        assert_eq!(pool.num_active(), 0);
    }
}
