//! Error types for the object pool

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::object::ObjectId;
use crate::pool::PooledObject;

/// Error type returned by [`PooledObjectFactory`](crate::PooledObjectFactory) hooks
pub type FactoryError = Box<dyn StdError + Send + Sync + 'static>;

/// Shared form of a factory error, kept inside [`PoolError`] so it stays `Clone`
pub type FactoryCause = Arc<dyn StdError + Send + Sync + 'static>;

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Pool is exhausted - no capacity available")]
    PoolExhausted,

    #[error("Pool is closed")]
    PoolClosed,

    #[error("Failed to create pooled object: {0}")]
    CreateFailed(FactoryCause),

    #[error("Object validation failed")]
    ValidateFailed,

    #[error("Failed to passivate pooled object: {0}")]
    PassivateFailed(FactoryCause),

    #[error("Failed to destroy pooled object: {0}")]
    DestroyFailed(FactoryCause),

    #[error("Object {0} is not currently allocated")]
    DoubleReturn(ObjectId),

    #[error("Object {0} is not tracked by this pool")]
    UnknownObject(ObjectId),
}

impl PoolError {
    pub(crate) fn create_failed(err: FactoryError) -> Self {
        Self::CreateFailed(Arc::from(err))
    }

    pub(crate) fn passivate_failed(err: FactoryError) -> Self {
        Self::PassivateFailed(Arc::from(err))
    }

    pub(crate) fn destroy_failed(err: FactoryError) -> Self {
        Self::DestroyFailed(Arc::from(err))
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

/// A rejected return or invalidation.
///
/// The pool leaves the object untouched and hands it back; use
/// [`into_inner`](ReturnError::into_inner) to recover it, or convert into a
/// [`PoolError`] with `?` (which drops the handle, abandoning it to its own pool).
#[derive(Error)]
#[error("{error}")]
pub struct ReturnError<T: Send + 'static> {
    error: PoolError,
    object: PooledObject<T>,
}

impl<T: Send + 'static> ReturnError<T> {
    pub(crate) fn new(error: PoolError, object: PooledObject<T>) -> Self {
        Self { error, object }
    }

    /// The reason the object was rejected
    pub fn error(&self) -> &PoolError {
        &self.error
    }

    /// Take the rejected object back
    pub fn into_inner(self) -> PooledObject<T> {
        self.object
    }
}

impl<T: Send + 'static> fmt::Debug for ReturnError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReturnError")
            .field("error", &self.error)
            .field("object", &self.object.id())
            .finish()
    }
}

impl<T: Send + 'static> From<ReturnError<T>> for PoolError {
    fn from(err: ReturnError<T>) -> Self {
        err.error
    }
}
