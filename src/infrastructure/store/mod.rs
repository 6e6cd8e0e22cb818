// Backing store adapters
//
// The broker and the session repository sit on a shared key/list store with
// publish/subscribe. `MemoryStore` serves single-process deployments and
// tests; `RedisStore` (feature `redis`) shares state across processes.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

/// Failures of the backing store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("store command failed: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Primitive operations of the shared store.
///
/// Lists are FIFO: `push` appends at the tail and every pop takes from the
/// head. A zero `wait` on a blocking call means "block until something
/// arrives". `move_blocking` is the only operation required to be atomic.
#[async_trait]
pub trait Store: Send + Sync {
    /// Append a value to the tail of a list
    async fn push(&self, key: &str, value: String) -> StoreResult<()>;

    /// Take the head of a list, if any
    async fn pop(&self, key: &str) -> StoreResult<Option<String>>;

    /// Take the head of a list, waiting up to `wait` for one to arrive
    async fn pop_blocking(&self, key: &str, wait: Duration) -> StoreResult<Option<String>>;

    /// Atomically take the head of `source` and append it to `destination`
    async fn move_blocking(
        &self,
        source: &str,
        destination: &str,
        wait: Duration,
    ) -> StoreResult<Option<String>>;

    /// All values of a list
    async fn range(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Remove one occurrence of `value`; returns how many were removed
    async fn remove(&self, key: &str, value: &str) -> StoreResult<usize>;

    async fn len(&self, key: &str) -> StoreResult<usize>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: String) -> StoreResult<()>;

    /// Delete a key of any kind; returns whether it existed
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Keys starting with `prefix`
    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Broadcast to current subscribers; returns how many received it
    async fn publish(&self, channel: &str, payload: String) -> StoreResult<usize>;

    /// Open a subscription. The receiver closes when the store goes away.
    async fn subscribe(&self, channel: &str) -> StoreResult<mpsc::UnboundedReceiver<String>>;

    /// Connectivity check
    async fn ping(&self) -> StoreResult<()>;
}

/// Open the shared store: Redis when a URL is given, in-process otherwise
#[cfg(feature = "redis")]
pub async fn connect(redis_url: Option<&str>) -> StoreResult<Arc<dyn Store>> {
    match redis_url {
        Some(url) => {
            tracing::info!("Connecting to Redis...");
            let store = RedisStore::connect(url).await?;
            tracing::info!("Redis connected successfully");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("REDIS_URL not set, using the in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Open the shared store. Without the `redis` feature it is always in-process.
#[cfg(not(feature = "redis"))]
pub async fn connect(redis_url: Option<&str>) -> StoreResult<Arc<dyn Store>> {
    if redis_url.is_some() {
        tracing::warn!("REDIS_URL is set but the redis feature is disabled; using the in-memory store");
    }
    Ok(Arc::new(MemoryStore::new()))
}
