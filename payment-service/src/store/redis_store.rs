use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::info;

use super::{Store, Subscription};
use crate::error::{StoreError, StoreResult};

/// Redis-backed store. Regular commands share one managed multiplexed
/// connection; blocking `BLMOVE` and subscriptions get their own so they
/// never stall other callers.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    manager: ConnectionManager,
}

impl RedisStore {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let mut manager = ConnectionManager::new(client.clone())
            .await
            .context("Failed to create Redis connection manager")?;
        let pong: String = redis::cmd("PING")
            .query_async(&mut manager)
            .await
            .context("Redis did not answer PING")?;
        info!(reply = %pong, "Connected to Redis");
        Ok(Self { client, manager })
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.manager.clone();
        Ok(conn.exists(key).await?)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        match ttl {
            Some(ttl) => {
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("EX")
                    .arg(ttl.as_secs().max(1))
                    .query_async::<_, ()>(&mut conn)
                    .await?
            }
            None => conn.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.manager.clone();
        Ok(conn.get(key).await?)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn push_head(&self, list: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        conn.lpush::<_, _, ()>(list, value).await?;
        Ok(())
    }

    async fn remove_by_value(&self, list: &str, count: i64, value: &str) -> StoreResult<u64> {
        let mut conn = self.manager.clone();
        let removed: i64 = conn.lrem(list, count as isize, value).await?;
        Ok(removed.max(0) as u64)
    }

    async fn atomic_move(&self, source: &str, dest: &str, timeout: Duration) -> StoreResult<String> {
        let mut conn = self.client.get_multiplexed_tokio_connection().await?;
        let moved: Option<String> = redis::cmd("BLMOVE")
            .arg(source)
            .arg(dest)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;
        moved.ok_or_else(|| StoreError::Timeout(format!("{source} -> {dest}")))
    }

    async fn list_members(&self, list: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.lrange(list, 0, -1).await?)
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        conn.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
        let mut pubsub = self.client.get_async_connection().await?.into_pubsub();
        pubsub.subscribe(channel).await?;
        let stream = pubsub
            .into_on_message()
            .map(|msg| msg.get_payload_bytes().to_vec());
        Ok(stream.boxed())
    }
}
