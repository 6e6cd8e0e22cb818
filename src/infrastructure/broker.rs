// Message broker
//
// Reliable queues (list-backed, claim/ack) and best-effort publish/subscribe
// on top of a shared `Store`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::agents::messages::Message;
use crate::infrastructure::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("message encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Queue names for one agent role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    pub tasks: String,
    pub processing: String,
    pub dlq: String,
}

impl QueueNames {
    pub fn for_agent(agent: &str) -> Self {
        Self {
            tasks: format!("tasks:{agent}"),
            processing: format!("processing:{agent}"),
            dlq: format!("dlq:{agent}"),
        }
    }
}

/// Reply channel consumed by `consumer`
pub fn results_channel(consumer: &str) -> String {
    format!("results:{consumer}")
}

/// Pub/sub channel carrying lifecycle events of `agent`
pub fn events_channel(agent: &str) -> String {
    format!("events:{agent}")
}

/// A task taken off a main queue and parked on a processing queue.
///
/// The processing-queue entry is matched on `message_id`, never on the
/// serialized content, so later edits to the message (a bumped retry count)
/// do not orphan it.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub message: Message,
    pub raw: String,
    pub claimed_at: DateTime<Utc>,
}

impl ClaimedTask {
    pub fn message_id(&self) -> Uuid {
        self.message.header.message_id
    }

    /// Unique identity of this claim, for logs and operators
    pub fn claim_id(&self) -> String {
        format!("{}@{}", self.message_id(), self.claimed_at.to_rfc3339())
    }
}

/// Handler for pub/sub messages
pub type Callback = Arc<dyn Fn(Message) + Send + Sync>;

/// Broker over a shared store. Cheap to clone; clones share subscriptions.
#[derive(Clone)]
pub struct MessageBroker {
    store: Arc<dyn Store>,
    callbacks: Arc<RwLock<HashMap<String, Callback>>>,
    listeners: Arc<RwLock<HashMap<String, JoinHandle<()>>>>,
}

impl MessageBroker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            callbacks: Arc::new(RwLock::new(HashMap::new())),
            listeners: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Append a message to the tail of a reliable queue
    pub async fn enqueue(&self, queue: &str, message: &Message) -> BrokerResult<()> {
        let payload = message.to_json()?;
        self.store.push(queue, payload).await?;
        tracing::info!(
            queue,
            correlation_id = %message.header.correlation_id,
            message_id = %message.header.message_id,
            "Enqueued message"
        );
        Ok(())
    }

    /// Fire-and-forget broadcast
    pub async fn publish(&self, channel: &str, message: &Message) -> BrokerResult<()> {
        let payload = message.to_json()?;
        let receivers = self.store.publish(channel, payload).await?;
        tracing::debug!(channel, receivers, "Published message");
        Ok(())
    }

    /// Register `callback` for `channel`. A later subscription to the same
    /// channel replaces the earlier callback; the listener task is shared.
    pub async fn subscribe<F>(&self, channel: &str, callback: F) -> BrokerResult<()>
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.callbacks
            .write()
            .await
            .insert(channel.to_string(), Arc::new(callback));

        let mut listeners = self.listeners.write().await;
        if listeners
            .get(channel)
            .is_some_and(|handle| !handle.is_finished())
        {
            return Ok(());
        }

        let mut receiver = self.store.subscribe(channel).await?;
        let callbacks = Arc::clone(&self.callbacks);
        let channel_name = channel.to_string();
        let handle = tokio::spawn(async move {
            while let Some(raw) = receiver.recv().await {
                let message = match Message::from_json(&raw) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::error!(channel = %channel_name, error = %e, "Dropping malformed pub/sub message");
                        continue;
                    }
                };
                let callback = callbacks.read().await.get(&channel_name).cloned();
                if let Some(callback) = callback {
                    tracing::debug!(channel = %channel_name, "Dispatching pub/sub message");
                    callback(message);
                }
            }
        });
        listeners.insert(channel.to_string(), handle);
        tracing::info!(channel, "Subscribed to channel");
        Ok(())
    }

    /// Stop every listener and forget all callbacks
    pub async fn unsubscribe_all(&self) {
        for (_, handle) in self.listeners.write().await.drain() {
            handle.abort();
        }
        self.callbacks.write().await.clear();
        tracing::info!("Unsubscribed from all channels");
    }

    /// Pop the head of `queue` without waiting
    pub async fn dequeue_nonblocking(&self, queue: &str) -> BrokerResult<Option<Message>> {
        let raw = self.store.pop(queue).await?;
        Ok(raw.and_then(|raw| decode_or_log(queue, &raw)))
    }

    /// Pop the head of `queue`, waiting up to `wait` (zero waits forever)
    pub async fn pop_blocking(&self, queue: &str, wait: Duration) -> BrokerResult<Option<Message>> {
        let raw = self.store.pop_blocking(queue, wait).await?;
        Ok(raw.and_then(|raw| decode_or_log(queue, &raw)))
    }

    /// Atomically move the head of `main_queue` onto `processing_queue` and
    /// return it. Blocks up to `timeout`; zero blocks indefinitely.
    ///
    /// An undecodable entry is removed from the processing queue and logged
    /// rather than requeued, so a poison message cannot loop.
    pub async fn claim(
        &self,
        main_queue: &str,
        processing_queue: &str,
        timeout: Duration,
    ) -> BrokerResult<Option<ClaimedTask>> {
        let Some(raw) = self
            .store
            .move_blocking(main_queue, processing_queue, timeout)
            .await?
        else {
            return Ok(None);
        };

        match Message::from_json(&raw) {
            Ok(message) => {
                let claimed = ClaimedTask {
                    message,
                    raw,
                    claimed_at: Utc::now(),
                };
                tracing::info!(
                    queue = main_queue,
                    claim_id = %claimed.claim_id(),
                    correlation_id = %claimed.message.header.correlation_id,
                    "Claimed task"
                );
                Ok(Some(claimed))
            }
            Err(e) => {
                tracing::error!(
                    queue = main_queue,
                    error = %e,
                    raw = %raw,
                    "Dropping malformed task"
                );
                self.store.remove(processing_queue, &raw).await?;
                Ok(None)
            }
        }
    }

    /// Mark a claimed task complete. Returns `false` (after a warning) when
    /// the entry is already gone, e.g. a duplicate ack.
    pub async fn ack(&self, processing_queue: &str, task: &ClaimedTask) -> BrokerResult<bool> {
        let removed = self.remove_claimed(processing_queue, task).await?;
        if removed {
            tracing::info!(
                queue = processing_queue,
                claim_id = %task.claim_id(),
                correlation_id = %task.message.header.correlation_id,
                "Acknowledged task"
            );
        } else {
            tracing::warn!(
                queue = processing_queue,
                claim_id = %task.claim_id(),
                "Nothing to acknowledge; task already removed"
            );
        }
        Ok(removed)
    }

    /// Put a failed task back on the tail of `main_queue` as `next`.
    /// The new entry lands before the old one is removed, so a crash in
    /// between duplicates the task instead of losing it.
    pub async fn retry(
        &self,
        processing_queue: &str,
        main_queue: &str,
        task: &ClaimedTask,
        next: &Message,
    ) -> BrokerResult<()> {
        self.enqueue(main_queue, next).await?;
        self.remove_claimed(processing_queue, task).await?;
        tracing::warn!(
            from = processing_queue,
            to = main_queue,
            claim_id = %task.claim_id(),
            correlation_id = %task.message.header.correlation_id,
            "Requeued failed task"
        );
        Ok(())
    }

    /// Park a task on the dead-letter queue, ending automatic processing
    pub async fn deadletter(
        &self,
        processing_queue: &str,
        dlq: &str,
        task: &ClaimedTask,
        last: &Message,
    ) -> BrokerResult<()> {
        self.enqueue(dlq, last).await?;
        self.remove_claimed(processing_queue, task).await?;
        tracing::error!(
            from = processing_queue,
            dlq,
            claim_id = %task.claim_id(),
            correlation_id = %task.message.header.correlation_id,
            "Moved task to dead-letter queue"
        );
        Ok(())
    }

    pub async fn depth(&self, queue: &str) -> BrokerResult<usize> {
        Ok(self.store.len(queue).await?)
    }

    /// Decoded contents of a queue, oldest first. Malformed entries are skipped.
    pub async fn peek(&self, queue: &str) -> BrokerResult<Vec<Message>> {
        let entries = self.store.range(queue).await?;
        Ok(entries
            .iter()
            .filter_map(|raw| decode_or_log(queue, raw))
            .collect())
    }

    /// Requeue everything claimed but never acknowledged. Meant for a
    /// supervisor after the owning worker died.
    pub async fn recover_in_flight(
        &self,
        processing_queue: &str,
        main_queue: &str,
    ) -> BrokerResult<usize> {
        let mut recovered = 0;
        while self
            .store
            .move_blocking(processing_queue, main_queue, Duration::from_millis(1))
            .await?
            .is_some()
        {
            recovered += 1;
        }
        if recovered > 0 {
            tracing::warn!(from = processing_queue, to = main_queue, recovered, "Recovered in-flight tasks");
        }
        Ok(recovered)
    }

    async fn remove_claimed(&self, processing_queue: &str, task: &ClaimedTask) -> BrokerResult<bool> {
        let entries = self.store.range(processing_queue).await?;
        let target = if entries.iter().any(|entry| *entry == task.raw) {
            Some(task.raw.clone())
        } else {
            entries.into_iter().find(|entry| {
                Message::from_json(entry)
                    .map(|m| m.header.message_id == task.message_id())
                    .unwrap_or(false)
            })
        };

        match target {
            Some(entry) => Ok(self.store.remove(processing_queue, &entry).await? > 0),
            None => Ok(false),
        }
    }
}

fn decode_or_log(queue: &str, raw: &str) -> Option<Message> {
    match Message::from_json(raw) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::error!(queue, error = %e, raw, "Dropping malformed message");
            None
        }
    }
}
