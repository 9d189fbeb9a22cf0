//! # lifecycle_pool
//!
//! Generic, thread-safe async object pool for sharing a small number of
//! expensive resources (database connections, sockets, parsers) between many
//! concurrent tasks.
//!
//! ## Features
//!
//! - Factory-driven lifecycle: make, activate, validate, passivate, destroy
//! - `max_total` / `max_idle` / `min_idle` capacity limits
//! - Blocking borrow with timeout and cancellation, or fail-fast
//! - LIFO or FIFO reuse of idle objects
//! - Background eviction of idle objects with a pluggable policy
//! - Abandoned-object recovery when a borrower drops an object
//! - Metrics and Prometheus export
//!
//! ## Quick Start
//!
//! ```rust
//! use lifecycle_pool::{simple_factory, FactoryError, ObjectPool, PoolConfiguration};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let pool = ObjectPool::new(
//!     simple_factory(|| async { Ok::<_, FactoryError>(vec![0u8; 16]) }),
//!     PoolConfiguration::new().with_max_total(4),
//! );
//!
//! let mut buf = pool.borrow_object().await.unwrap();
//! buf[0] = 42;
//! pool.return_object(buf).await.unwrap();
//!
//! assert_eq!(pool.num_idle(), 1);
//! assert_eq!(pool.num_active(), 0);
//! # }
//! ```

mod capacity;
mod config;
mod errors;
mod eviction;
mod factory;
mod idle;
mod metrics;
mod object;
mod pool;

pub use config::{EvictionConfig, PoolConfiguration};
pub use errors::{FactoryCause, FactoryError, PoolError, PoolResult, ReturnError};
pub use eviction::{DefaultEvictionPolicy, EvictionPolicy};
pub use factory::{simple_factory, PooledObjectFactory, SimpleFactory};
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use metrics::PoolMetrics;
pub use object::{ObjectId, ObjectInfo, PooledObjectState};
pub use pool::{ObjectPool, PooledObject};
