use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, FromRedisValue};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::StreamExt;

use super::{Store, StoreError, StoreResult};

/// Idle blocking connections kept for reuse
const MAX_IDLE_BLOCKING: usize = 8;

/// Redis-backed [`Store`]
///
/// Uses the list layout the agents have always shared: producers LPUSH,
/// consumers RPOP / BRPOP, claims go through BRPOPLPUSH.
pub struct RedisStore {
    client: Client,
    connection: MultiplexedConnection,
    blocking: Mutex<Vec<MultiplexedConnection>>,
}

impl RedisStore {
    /// Connect and verify the server answers
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let store = Self {
            client,
            connection,
            blocking: Mutex::new(Vec::new()),
        };
        store.ping().await?;
        Ok(store)
    }

    async fn query<T: FromRedisValue>(&self, command: &redis::Cmd) -> StoreResult<T> {
        let mut connection = self.connection.clone();
        command
            .query_async::<_, T>(&mut connection)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Blocking commands run on a connection of their own so they do not
    /// stall the shared one. Connections are checked out of a small idle
    /// pool and returned after a successful reply; one that failed is
    /// dropped.
    async fn query_blocking<T: FromRedisValue>(&self, command: &redis::Cmd) -> StoreResult<T> {
        let idle = self.blocking.lock().await.pop();
        let mut connection = match idle {
            Some(connection) => connection,
            None => self
                .client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| StoreError::Connection(e.to_string()))?,
        };

        let reply = command
            .query_async::<_, T>(&mut connection)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut pool = self.blocking.lock().await;
        if pool.len() < MAX_IDLE_BLOCKING {
            pool.push(connection);
        }
        Ok(reply)
    }

    /// Connections currently parked for blocking commands
    pub async fn idle_blocking_connections(&self) -> usize {
        self.blocking.lock().await.len()
    }
}

/// Redis treats 0 as "forever"; keep short waits from rounding down to it.
fn wait_seconds(wait: Duration) -> f64 {
    if wait.is_zero() {
        0.0
    } else {
        wait.as_secs_f64().max(0.001)
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn push(&self, key: &str, value: String) -> StoreResult<()> {
        self.query::<i64>(redis::cmd("LPUSH").arg(key).arg(value))
            .await
            .map(|_| ())
    }

    async fn pop(&self, key: &str) -> StoreResult<Option<String>> {
        self.query(redis::cmd("RPOP").arg(key)).await
    }

    async fn pop_blocking(&self, key: &str, wait: Duration) -> StoreResult<Option<String>> {
        let popped: Option<(String, String)> = self
            .query_blocking(redis::cmd("BRPOP").arg(key).arg(wait_seconds(wait)))
            .await?;
        Ok(popped.map(|(_, value)| value))
    }

    async fn move_blocking(
        &self,
        source: &str,
        destination: &str,
        wait: Duration,
    ) -> StoreResult<Option<String>> {
        self.query_blocking(
            redis::cmd("BRPOPLPUSH")
                .arg(source)
                .arg(destination)
                .arg(wait_seconds(wait)),
        )
        .await
    }

    async fn range(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut values: Vec<String> = self
            .query(redis::cmd("LRANGE").arg(key).arg(0).arg(-1))
            .await?;
        // LPUSH keeps the newest entry on the left; report oldest first.
        values.reverse();
        Ok(values)
    }

    async fn remove(&self, key: &str, value: &str) -> StoreResult<usize> {
        self.query(redis::cmd("LREM").arg(key).arg(1).arg(value))
            .await
    }

    async fn len(&self, key: &str) -> StoreResult<usize> {
        self.query(redis::cmd("LLEN").arg(key)).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.query(redis::cmd("GET").arg(key)).await
    }

    async fn set(&self, key: &str, value: String) -> StoreResult<()> {
        self.query::<()>(redis::cmd("SET").arg(key).arg(value)).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let removed: usize = self.query(redis::cmd("DEL").arg(key)).await?;
        Ok(removed > 0)
    }

    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .query(redis::cmd("KEYS").arg(format!("{prefix}*")))
            .await?;
        keys.sort();
        Ok(keys)
    }

    async fn publish(&self, channel: &str, payload: String) -> StoreResult<usize> {
        self.query(redis::cmd("PUBLISH").arg(channel).arg(payload))
            .await
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<mpsc::UnboundedReceiver<String>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let channel = channel.to_string();
        tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(message) = stream.next().await {
                match message.get_payload::<String>() {
                    Ok(payload) => {
                        if sender.send(payload).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(channel = %channel, error = %e, "Undecodable pub/sub payload");
                    }
                }
            }
        });
        Ok(receiver)
    }

    async fn ping(&self) -> StoreResult<()> {
        self.query::<String>(&redis::cmd("PING"))
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}
