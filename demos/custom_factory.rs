//! A full lifecycle factory shared by 100 concurrent tasks
//!
//! The "client" stands in for a database connection; every hook logs what
//! the pool asks of it.

use async_trait::async_trait;
use lifecycle_pool::{FactoryError, ObjectPool, PoolConfiguration, PoolError, PooledObjectFactory};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

struct Client {
    id: u64,
    queries: u64,
}

impl Client {
    async fn query(&mut self, sql: &str) -> String {
        self.queries += 1;
        tokio::time::sleep(Duration::from_millis(5)).await;
        format!("client {} answered {sql:?} (query #{})", self.id, self.queries)
    }
}

#[derive(Default)]
struct ClientFactory {
    next_id: AtomicU64,
}

#[async_trait]
impl PooledObjectFactory<Client> for ClientFactory {
    async fn make_object(&self) -> Result<Client, FactoryError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(client = id, "connecting");
        Ok(Client { id, queries: 0 })
    }

    async fn destroy_object(&self, client: Client) -> Result<(), FactoryError> {
        tracing::info!(client = client.id, "disconnecting");
        Ok(())
    }

    async fn validate_object(&self, _client: &mut Client) -> bool {
        true
    }

    async fn activate_object(&self, client: &mut Client) -> Result<(), FactoryError> {
        tracing::debug!(client = client.id, "activating");
        Ok(())
    }

    async fn passivate_object(&self, client: &mut Client) -> Result<(), FactoryError> {
        tracing::debug!(client = client.id, "returning to pool");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), PoolError> {
    tracing_subscriber::fmt::init();

    let pool = ObjectPool::new(
        ClientFactory::default(),
        PoolConfiguration::new().with_max_total(10).with_max_idle(10),
    );

    let mut tasks = Vec::new();
    for task in 0..100u64 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            let mut client = pool.borrow_object().await?;
            println!("{}", client.query("SELECT version()").await);

            let pause = Duration::from_millis((task * 37) % 10 * 100);
            println!("task {task} pausing {pause:?}");
            tokio::time::sleep(pause).await;

            pool.return_object(client).await?;
            Ok::<_, PoolError>(())
        }));
    }
    for task in tasks {
        task.await.expect("task panicked")?;
    }

    println!("idle: {}, active: {}", pool.num_idle(), pool.num_active());
    println!("{:?}", pool.get_metrics());
    pool.close().await;
    Ok(())
}
