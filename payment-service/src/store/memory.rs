use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;

use super::{Store, Subscription};
use crate::error::{StoreError, StoreResult};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Default)]
struct Inner {
    keys: HashMap<String, (Vec<u8>, Option<Instant>)>,
    lists: HashMap<String, VecDeque<String>>,
}

impl Inner {
    fn live_value(&mut self, key: &str) -> Option<&Vec<u8>> {
        let expired = matches!(self.keys.get(key), Some((_, Some(at))) if *at <= Instant::now());
        if expired {
            self.keys.remove(key);
        }
        self.keys.get(key).map(|(value, _)| value)
    }
}

/// Process-local store with the same list and pub/sub semantics as redis.
///
/// All mutations happen under a single lock, so `atomic_move` is indivisible
/// across any number of concurrent workers sharing one instance.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
    pushed: Arc<Notify>,
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.lock().live_value(key).is_some())
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> StoreResult<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.lock().keys.insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.lock().live_value(key).cloned())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.lock().keys.remove(key);
        Ok(())
    }

    async fn push_head(&self, list: &str, value: &str) -> StoreResult<()> {
        self.lock()
            .lists
            .entry(list.to_string())
            .or_default()
            .push_front(value.to_string());
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn remove_by_value(&self, list: &str, count: i64, value: &str) -> StoreResult<u64> {
        let mut inner = self.lock();
        let Some(items) = inner.lists.get_mut(list) else {
            return Ok(0);
        };
        let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() as usize };
        let mut removed = 0usize;
        if count >= 0 {
            items.retain(|item| {
                if removed < limit && item == value {
                    removed += 1;
                    false
                } else {
                    true
                }
            });
        } else {
            let mut kept: VecDeque<String> = VecDeque::with_capacity(items.len());
            while let Some(item) = items.pop_back() {
                if removed < limit && item == value {
                    removed += 1;
                } else {
                    kept.push_front(item);
                }
            }
            *items = kept;
        }
        Ok(removed as u64)
    }

    async fn atomic_move(&self, source: &str, dest: &str, timeout: Duration) -> StoreResult<String> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before inspecting the list so a push between
            // the check and the await is never missed.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut inner = self.lock();
                if let Some(value) = inner.lists.get_mut(source).and_then(|l| l.pop_back()) {
                    inner
                        .lists
                        .entry(dest.to_string())
                        .or_default()
                        .push_front(value.clone());
                    return Ok(value);
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(StoreError::Timeout(format!("{source} -> {dest}")));
            }
        }
    }

    async fn list_members(&self, list: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .lock()
            .lists
            .get(list)
            .map(|items| items.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> StoreResult<()> {
        // No subscribers is not an error, same as PUBLISH returning 0.
        let _ = self.sender(channel).send(payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
        let rx = self.sender(channel).subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => return Some((msg, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "in-memory subscriber lagged; messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn move_takes_from_tail_and_pushes_to_head() {
        let store = InMemoryStore::new();
        store.push_head("src", "a").await.unwrap();
        store.push_head("src", "b").await.unwrap();
        store.push_head("dst", "z").await.unwrap();

        let moved = store.atomic_move("src", "dst", Duration::from_secs(1)).await.unwrap();
        assert_eq!(moved, "a");
        assert_eq!(store.list_members("src").await.unwrap(), vec!["b"]);
        assert_eq!(store.list_members("dst").await.unwrap(), vec!["a", "z"]);
    }

    #[tokio::test(start_paused = true)]
    async fn move_times_out_on_empty_list() {
        let store = InMemoryStore::new();
        let err = store.atomic_move("src", "dst", Duration::from_secs(3600)).await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout(_)));
    }

    #[tokio::test]
    async fn blocked_move_wakes_on_push() {
        let store = InMemoryStore::new();
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.atomic_move("src", "dst", Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        store.push_head("src", "late").await.unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), "late");
        assert_eq!(store.list_members("dst").await.unwrap(), vec!["late"]);
    }

    #[tokio::test]
    async fn remove_by_value_follows_lrem_direction() {
        let store = InMemoryStore::new();
        for v in ["x", "y", "x", "x"] {
            store.push_head("l", v).await.unwrap();
        }
        // head first: x x y x
        assert_eq!(store.remove_by_value("l", 1, "x").await.unwrap(), 1);
        assert_eq!(store.list_members("l").await.unwrap(), vec!["x", "y", "x"]);
        assert_eq!(store.remove_by_value("l", -1, "x").await.unwrap(), 1);
        assert_eq!(store.list_members("l").await.unwrap(), vec!["x", "y"]);
        assert_eq!(store.remove_by_value("l", 0, "x").await.unwrap(), 1);
        assert_eq!(store.list_members("l").await.unwrap(), vec!["y"]);
        assert_eq!(store.remove_by_value("missing", 0, "x").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expires_keys() {
        let store = InMemoryStore::new();
        store.set("k", b"v".to_vec(), Some(Duration::from_secs(10))).await.unwrap();
        assert!(store.exists("k").await.unwrap());
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!store.exists("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn publish_reaches_subscribers() {
        let store = InMemoryStore::new();
        let mut sub = store.subscribe("events").await.unwrap();
        store.publish("events", b"hello".to_vec()).await.unwrap();
        assert_eq!(sub.next().await.unwrap(), b"hello".to_vec());
    }
}
