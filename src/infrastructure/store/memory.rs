use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::Instant;

use super::{Store, StoreResult};

#[derive(Default)]
struct Inner {
    lists: HashMap<String, VecDeque<String>>,
    values: HashMap<String, String>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<String>>>,
}

/// In-process implementation of [`Store`]
///
/// Lists, plain values and subscriptions live behind one async mutex. Blocked
/// pops park on a `Notify` that every push wakes.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    pushed: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `attempt` until it yields a value or `wait` runs out.
    /// A zero wait blocks indefinitely.
    async fn wait_for<F>(&self, wait: Duration, mut attempt: F) -> Option<String>
    where
        F: FnMut(&mut Inner) -> Option<String>,
    {
        let deadline = (!wait.is_zero()).then(|| Instant::now() + wait);

        loop {
            // Register for wakeups before looking, so a push landing between
            // the check and the await is not missed.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock().await;
                if let Some(value) = attempt(&mut *inner) {
                    return Some(value);
                }
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return None;
                    }
                }
                None => notified.await,
            }
        }
    }
}

fn pop_front(inner: &mut Inner, key: &str) -> Option<String> {
    let list = inner.lists.get_mut(key)?;
    let value = list.pop_front();
    if list.is_empty() {
        inner.lists.remove(key);
    }
    value
}

#[async_trait]
impl Store for MemoryStore {
    async fn push(&self, key: &str, value: String) -> StoreResult<()> {
        self.inner
            .lock()
            .await
            .lists
            .entry(key.to_string())
            .or_default()
            .push_back(value);
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn pop(&self, key: &str) -> StoreResult<Option<String>> {
        let mut inner = self.inner.lock().await;
        Ok(pop_front(&mut inner, key))
    }

    async fn pop_blocking(&self, key: &str, wait: Duration) -> StoreResult<Option<String>> {
        Ok(self.wait_for(wait, |inner| pop_front(inner, key)).await)
    }

    async fn move_blocking(
        &self,
        source: &str,
        destination: &str,
        wait: Duration,
    ) -> StoreResult<Option<String>> {
        let moved = self
            .wait_for(wait, |inner| {
                let value = pop_front(inner, source)?;
                inner
                    .lists
                    .entry(destination.to_string())
                    .or_default()
                    .push_back(value.clone());
                Some(value)
            })
            .await;
        if moved.is_some() {
            self.pushed.notify_waiters();
        }
        Ok(moved)
    }

    async fn range(&self, key: &str) -> StoreResult<Vec<String>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn remove(&self, key: &str, value: &str) -> StoreResult<usize> {
        let mut inner = self.inner.lock().await;
        let Some(list) = inner.lists.get_mut(key) else {
            return Ok(0);
        };
        let removed = match list.iter().position(|entry| entry == value) {
            Some(index) => {
                list.remove(index);
                1
            }
            None => 0,
        };
        if list.is_empty() {
            inner.lists.remove(key);
        }
        Ok(removed)
    }

    async fn len(&self, key: &str) -> StoreResult<usize> {
        let inner = self.inner.lock().await;
        Ok(inner.lists.get(key).map_or(0, VecDeque::len))
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.inner.lock().await.values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> StoreResult<()> {
        self.inner
            .lock()
            .await
            .values
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let had_value = inner.values.remove(key).is_some();
        let had_list = inner.lists.remove(key).is_some();
        Ok(had_value || had_list)
    }

    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let inner = self.inner.lock().await;
        let mut keys: Vec<String> = inner
            .values
            .keys()
            .chain(inner.lists.keys())
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn publish(&self, channel: &str, payload: String) -> StoreResult<usize> {
        let mut inner = self.inner.lock().await;
        let Some(subscribers) = inner.subscribers.get_mut(channel) else {
            return Ok(0);
        };
        subscribers.retain(|subscriber| subscriber.send(payload.clone()).is_ok());
        Ok(subscribers.len())
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<mpsc::UnboundedReceiver<String>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner
            .lock()
            .await
            .subscribers
            .entry(channel.to_string())
            .or_default()
            .push(sender);
        Ok(receiver)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn lists_are_fifo() {
        let store = MemoryStore::new();
        store.push("q", "a".to_string()).await.unwrap();
        store.push("q", "b".to_string()).await.unwrap();

        assert_eq!(store.pop("q").await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.pop("q").await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.pop("q").await.unwrap(), None);
    }

    #[tokio::test]
    async fn pop_blocking_times_out_on_empty_list() {
        let store = MemoryStore::new();
        let started = Instant::now();

        let value = store
            .pop_blocking("q", Duration::from_millis(50))
            .await
            .unwrap();

        assert!(value.is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn pop_blocking_wakes_on_push() {
        let store = Arc::new(MemoryStore::new());
        let producer = Arc::clone(&store);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.push("q", "late".to_string()).await.unwrap();
        });

        let value = store.pop_blocking("q", Duration::ZERO).await.unwrap();
        assert_eq!(value.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn move_blocking_transfers_between_lists() {
        let store = MemoryStore::new();
        store.push("main", "job".to_string()).await.unwrap();

        let moved = store
            .move_blocking("main", "processing", Duration::from_millis(10))
            .await
            .unwrap();

        assert_eq!(moved.as_deref(), Some("job"));
        assert_eq!(store.len("main").await.unwrap(), 0);
        assert_eq!(store.range("processing").await.unwrap(), vec!["job"]);
    }

    #[tokio::test]
    async fn remove_takes_a_single_occurrence() {
        let store = MemoryStore::new();
        store.push("q", "x".to_string()).await.unwrap();
        store.push("q", "x".to_string()).await.unwrap();

        assert_eq!(store.remove("q", "x").await.unwrap(), 1);
        assert_eq!(store.len("q").await.unwrap(), 1);
        assert_eq!(store.remove("missing", "x").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let store = MemoryStore::new();
        let mut first = store.subscribe("events").await.unwrap();
        let mut second = store.subscribe("events").await.unwrap();

        let delivered = store.publish("events", "hello".to_string()).await.unwrap();

        assert_eq!(delivered, 2);
        assert_eq!(first.recv().await.as_deref(), Some("hello"));
        assert_eq!(second.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let store = MemoryStore::new();
        assert_eq!(store.publish("nobody", "x".to_string()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn keys_filters_by_prefix() {
        let store = MemoryStore::new();
        store.set("session:a", "1".to_string()).await.unwrap();
        store.set("session:b", "2".to_string()).await.unwrap();
        store.set("other", "3".to_string()).await.unwrap();

        assert_eq!(
            store.keys("session:").await.unwrap(),
            vec!["session:a", "session:b"]
        );
        assert!(store.delete("session:a").await.unwrap());
        assert!(!store.delete("session:a").await.unwrap());
    }
}
