//! Redis implementation of the key-value store abstraction.

use std::time::Duration;

use activekg_core::kv::KvStore;
use activekg_core::{Error, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Redis-backed [`KvStore`].
///
/// Ordinary commands share a multiplexed [`ConnectionManager`]; blocking
/// pops and pub/sub subscriptions open dedicated connections so they cannot
/// stall the shared pipeline.
pub struct RedisKv {
    client: redis::Client,
    manager: ConnectionManager,
}

impl RedisKv {
    /// Connect to Redis by URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Config(format!("invalid redis url: {e}")))?;
        let manager = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| Error::Dependency(format!("redis connect failed: {e}")))?;
        Ok(Self { client, manager })
    }

    fn dep(context: &str, e: &redis::RedisError) -> Error {
        Error::Dependency(format!("redis {context}: {e}"))
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(|e| Self::dep("get", &e))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::dep("set_ex", &e))
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.manager.clone();
        let set: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::dep("set_nx_ex", &e))?;
        Ok(set.is_some())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.del(key).await.map_err(|e| Self::dep("del", &e))
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64> {
        let mut conn = self.manager.clone();
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::dep("incr", &e))?;
        Ok(count)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<i64> {
        let mut conn = self.manager.clone();
        conn.lpush(key, value).await.map_err(|e| Self::dep("lpush", &e))
    }

    async fn brpop(&self, keys: &[String], timeout: Duration) -> Result<Option<(String, String)>> {
        // Dedicated connection: BRPOP would block the shared manager
        let mut conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| Self::dep("brpop connect", &e))?;
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(keys)
            .arg(timeout.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::dep("brpop", &e))?;
        Ok(popped)
    }

    async fn llen(&self, key: &str) -> Result<i64> {
        let mut conn = self.manager.clone();
        conn.llen(key).await.map_err(|e| Self::dep("llen", &e))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.zadd(key, member, score)
            .await
            .map_err(|e| Self::dep("zadd", &e))
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.zrem(key, member).await.map_err(|e| Self::dep("zrem", &e))
    }

    async fn zcard_prune(&self, key: &str, min_score: f64) -> Result<i64> {
        let mut conn = self.manager.clone();
        let (_, count): (i64, i64) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(format!("({min_score}"))
            .cmd("ZCARD")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::dep("zcard_prune", &e))?;
        Ok(count)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.publish(channel, payload)
            .await
            .map_err(|e| Self::dep("publish", &e))
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>> {
        let conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| Self::dep("subscribe connect", &e))?;
        let mut pubsub = conn.into_pubsub();
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| Self::dep("subscribe", &e))?;

        let (tx, rx) = mpsc::channel(64);
        let channel = channel.to_string();
        tokio::spawn(async move {
            use futures::StreamExt;
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                match msg.get_payload::<String>() {
                    Ok(payload) => {
                        if tx.send(payload).await.is_err() {
                            debug!(channel, "subscriber receiver dropped");
                            break;
                        }
                    }
                    Err(e) => warn!(channel, error = %e, "non-string pub/sub payload"),
                }
            }
            // Channel closes here; the owning subscriber loop reconnects
        });
        Ok(rx)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| Self::dep("ping", &e))?;
        Ok(())
    }
}
