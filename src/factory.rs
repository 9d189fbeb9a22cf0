//! Lifecycle hooks supplied by the pool's user

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use crate::errors::FactoryError;

/// Creates, checks and disposes of the resources a pool manages.
///
/// Only [`make_object`](PooledObjectFactory::make_object) is required; every
/// other hook defaults to a no-op that succeeds. The pool never runs two hooks
/// for the same object at once, but hooks for distinct objects may run
/// concurrently.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use lifecycle_pool::{FactoryError, PooledObjectFactory};
///
/// struct Buffers;
///
/// #[async_trait]
/// impl PooledObjectFactory<Vec<u8>> for Buffers {
///     async fn make_object(&self) -> Result<Vec<u8>, FactoryError> {
///         Ok(Vec::with_capacity(4096))
///     }
///
///     async fn passivate_object(&self, buf: &mut Vec<u8>) -> Result<(), FactoryError> {
///         buf.clear();
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait PooledObjectFactory<T: Send + 'static>: Send + Sync {
    /// Create a new resource
    async fn make_object(&self) -> Result<T, FactoryError>;

    /// Release a resource the pool no longer needs
    async fn destroy_object(&self, object: T) -> Result<(), FactoryError> {
        drop(object);
        Ok(())
    }

    /// Check that a resource is still usable
    async fn validate_object(&self, _object: &mut T) -> bool {
        true
    }

    /// Prepare a resource just before it is lent; failure counts as a validation failure
    async fn activate_object(&self, _object: &mut T) -> Result<(), FactoryError> {
        Ok(())
    }

    /// Reset a resource before it goes back to the idle set; failure destroys it
    async fn passivate_object(&self, _object: &mut T) -> Result<(), FactoryError> {
        Ok(())
    }
}

/// Factory built from a creation closure, see [`simple_factory`]
pub struct SimpleFactory<T, F> {
    make: F,
    _marker: PhantomData<fn() -> T>,
}

/// Build a factory that only knows how to create objects
///
/// ```
/// use lifecycle_pool::{simple_factory, FactoryError, ObjectPool};
///
/// # #[tokio::main]
/// # async fn main() {
/// let pool = ObjectPool::with_default_config(simple_factory(|| async {
///     Ok::<_, FactoryError>(String::from("resource"))
/// }));
///
/// let obj = pool.borrow_object().await.unwrap();
/// assert_eq!(obj.as_str(), "resource");
/// pool.return_object(obj).await.unwrap();
/// assert_eq!(pool.num_idle(), 1);
/// # }
/// ```
pub fn simple_factory<T, F, Fut>(make: F) -> SimpleFactory<T, F>
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FactoryError>> + Send + 'static,
{
    SimpleFactory {
        make,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<T, F, Fut> PooledObjectFactory<T> for SimpleFactory<T, F>
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FactoryError>> + Send + 'static,
{
    async fn make_object(&self) -> Result<T, FactoryError> {
        (self.make)().await
    }
}
