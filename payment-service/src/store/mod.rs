//! Key-value / list / pub-sub port the settlement pipeline is written against.
//!
//! Every operation is independently atomic; nothing here spans more than one
//! call. `atomic_move` must be indivisible on the backing store because it is
//! the only thing stopping two workers from claiming the same payment id.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;

use crate::error::StoreResult;

pub mod memory;
pub mod redis_store;

pub use self::memory::InMemoryStore;
pub use self::redis_store::RedisStore;

/// Messages received on a subscribed channel.
pub type Subscription = BoxStream<'static, Vec<u8>>;

#[async_trait]
pub trait Store: Send + Sync {
    async fn exists(&self, key: &str) -> StoreResult<bool>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> StoreResult<()>;
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;
    async fn delete(&self, key: &str) -> StoreResult<()>;

    async fn push_head(&self, list: &str, value: &str) -> StoreResult<()>;
    /// LREM semantics: `count > 0` from the head, `count < 0` from the tail, `0` removes all.
    async fn remove_by_value(&self, list: &str, count: i64, value: &str) -> StoreResult<u64>;
    /// Blocking move of one element from the tail of `source` to the head of `dest`.
    /// Fails with `StoreError::Timeout` when nothing arrives within `timeout`.
    async fn atomic_move(&self, source: &str, dest: &str, timeout: Duration) -> StoreResult<String>;
    /// Snapshot of a list, head first.
    async fn list_members(&self, list: &str) -> StoreResult<Vec<String>>;

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> StoreResult<()>;
    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription>;
}
