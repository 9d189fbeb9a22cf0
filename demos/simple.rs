//! Smallest possible pool: a factory that only creates objects

use lifecycle_pool::{simple_factory, FactoryError, ObjectPool};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct MyPoolObject {
    s: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let counter = Arc::new(AtomicU64::new(0));
    let factory = simple_factory(move || {
        let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
        async move { Ok::<_, FactoryError>(MyPoolObject { s: n.to_string() }) }
    });

    let pool = ObjectPool::with_default_config(factory);

    let obj = pool.borrow_object().await?;
    println!("{}", obj.s);
    pool.return_object(obj).await?;

    println!("idle: {}, active: {}", pool.num_idle(), pool.num_active());
    pool.close().await;
    Ok(())
}
