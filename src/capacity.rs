//! Capacity limits and the wait condition for exhausted borrows

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

use crate::config::PoolConfiguration;
use crate::errors::{PoolError, PoolResult};

/// Object counts, mutated only under the pool lock.
///
/// `total` covers every tracked object plus creations still in flight, so a
/// slot is taken before the factory runs and given back if creation fails.
#[derive(Debug)]
pub(crate) struct Capacity {
    max_total: Option<usize>,
    max_idle: Option<usize>,
    total: usize,
}

impl Capacity {
    pub fn new(config: &PoolConfiguration) -> Self {
        Self {
            max_total: config.max_total.filter(|max| *max > 0),
            max_idle: config.max_idle,
            total: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn max_total(&self) -> Option<usize> {
        self.max_total
    }

    pub fn try_reserve(&mut self) -> bool {
        if self.max_total.is_some_and(|max| self.total >= max) {
            return false;
        }
        self.total += 1;
        true
    }

    pub fn release(&mut self) {
        debug_assert!(self.total > 0, "capacity released more often than reserved");
        self.total = self.total.saturating_sub(1);
    }

    pub fn idle_has_room(&self, idle: usize) -> bool {
        self.max_idle.is_none_or(|max| idle < max)
    }
}

/// Broadcast wakeup for borrowers waiting on capacity.
///
/// Every capacity-freeing event wakes all waiters; each one re-checks the
/// pool state and goes back to sleep if someone else got there first.
pub(crate) struct Waiters {
    notify: Notify,
    waiting: AtomicUsize,
}

impl Waiters {
    pub fn new() -> Self {
        Self {
            notify: Notify::new(),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Register interest before checking the pool state
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    pub fn notify_all(&self) {
        self.notify.notify_waiters();
    }

    pub fn count(&self) -> usize {
        self.waiting.load(Ordering::Relaxed)
    }

    /// Wait for the next capacity event or fail with `PoolExhausted` at `deadline`
    pub async fn wait(&self, notified: Notified<'_>, deadline: Option<Instant>) -> PoolResult<()> {
        self.waiting.fetch_add(1, Ordering::Relaxed);
        let _waiting = WaitingGuard(&self.waiting);

        match deadline {
            Some(deadline) => timeout_at(deadline, notified)
                .await
                .map_err(|_| PoolError::PoolExhausted),
            None => {
                notified.await;
                Ok(())
            }
        }
    }
}

struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}
