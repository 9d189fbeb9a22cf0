//! Identity and lifecycle metadata of pooled objects

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique identity of a pooled object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    pub(crate) fn next() -> Self {
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value of the id
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a pooled object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PooledObjectState {
    /// In the idle registry, available for borrowing
    Idle,

    /// Lent to a borrower
    Allocated,

    /// Claimed by the eviction runner
    EvictionTest,

    /// Marked for destruction; lent or under test objects are destroyed when they come back
    Invalid,

    /// The borrower dropped the object without returning it
    Abandoned,
}

/// Pool-managed metadata of a single object
///
/// A snapshot is attached to every [`PooledObject`](crate::PooledObject) and
/// handed to [`EvictionPolicy`](crate::EvictionPolicy) implementations.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    id: ObjectId,
    state: PooledObjectState,
    created_at: Instant,
    last_borrow: Instant,
    last_return: Instant,
    last_use: Instant,
    borrow_count: u64,
}

impl ObjectInfo {
    pub(crate) fn new(id: ObjectId, state: PooledObjectState) -> Self {
        let now = Instant::now();
        Self {
            id,
            state,
            created_at: now,
            last_borrow: now,
            last_return: now,
            last_use: now,
            borrow_count: 0,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn state(&self) -> PooledObjectState {
        self.state
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_borrow(&self) -> Instant {
        self.last_borrow
    }

    pub fn last_return(&self) -> Instant {
        self.last_return
    }

    pub fn last_use(&self) -> Instant {
        self.last_use
    }

    /// Number of times the object has been lent out
    pub fn borrow_count(&self) -> u64 {
        self.borrow_count
    }

    /// Time since the object last entered the idle registry
    pub fn idle_time(&self) -> Duration {
        self.last_return.elapsed()
    }

    /// Time the object has been lent out, or was during its last loan
    pub fn active_time(&self) -> Duration {
        if self.last_return > self.last_borrow {
            self.last_return - self.last_borrow
        } else {
            self.last_borrow.elapsed()
        }
    }

    /// Whether a borrower currently holds the object
    pub fn is_lent(&self) -> bool {
        matches!(self.state, PooledObjectState::Allocated | PooledObjectState::Invalid)
    }

    pub(crate) fn allocate(&mut self) -> bool {
        if self.state != PooledObjectState::Idle {
            return false;
        }
        let now = Instant::now();
        self.state = PooledObjectState::Allocated;
        self.last_borrow = now;
        self.last_use = now;
        self.borrow_count += 1;
        true
    }

    pub(crate) fn deallocate(&mut self) -> bool {
        if self.state != PooledObjectState::Allocated {
            return false;
        }
        let now = Instant::now();
        self.state = PooledObjectState::Idle;
        self.last_return = now;
        self.last_use = now;
        true
    }

    pub(crate) fn start_eviction_test(&mut self) -> bool {
        if self.state != PooledObjectState::Idle {
            return false;
        }
        self.state = PooledObjectState::EvictionTest;
        true
    }

    pub(crate) fn end_eviction_test(&mut self) -> bool {
        if self.state != PooledObjectState::EvictionTest {
            return false;
        }
        self.state = PooledObjectState::Idle;
        true
    }

    pub(crate) fn invalidate(&mut self) {
        self.state = PooledObjectState::Invalid;
    }

    pub(crate) fn mark_abandoned(&mut self) {
        self.state = PooledObjectState::Abandoned;
    }
}
